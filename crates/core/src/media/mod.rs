//! RTP/RTCP media plumbing for both legs.
//!
//! ## Receive path (RTSP leg)
//!
//! Each inbound RTP datagram is parsed ([`rtp::RtpPacket`]), folded into
//! the per-kind [`stats::MediaStats`], and forwarded to the host. Every
//! ~10 s, and whenever the server sends RTCP, a 32-byte receiver report
//! ([`rtcp::ReceiverReport`]) is built from the stats and the window reset.
//!
//! ## Send path (SIP leg)
//!
//! Host audio frames are wrapped in a 12-byte RTP header by
//! [`rtp::AudioSender`] once the dialog has enabled media.
//!
//! ## Port layout
//!
//! | Socket | Local port |
//! |--------|------------|
//! | RTP | even `n` |
//! | RTCP | `n + 1` |

pub mod codec;
pub mod rtcp;
pub mod rtp;
pub mod stats;

pub use codec::{Codec, CodecSet};
pub use rtcp::ReceiverReport;
pub use rtp::{AudioSender, RtpHeader, RtpPacket};
pub use stats::MediaStats;

/// Media type of an SDP section or socket pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Which socket of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Rtp,
    Rtcp,
}
