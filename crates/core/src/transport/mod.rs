//! Sockets owned by the orchestrator.
//!
//! Each leg has one control channel and up to two media pairs:
//!
//! - **TCP** ([`tcp`]): RTSP requests and responses, accumulated across
//!   reads until a whole message (headers plus `Content-Length` body)
//!   is available.
//!
//! - **UDP** ([`udp`]): SIP datagrams (one message each) and the RTP/RTCP
//!   pairs, bound on an even/odd port pair.
//!
//! All reads are readiness-driven: wait on `readable()`, then drain with
//! `try_read`/`try_recv` until `WouldBlock`.

pub mod tcp;
pub mod udp;

use crate::error::Result;
use crate::protocol::Message;
pub use tcp::StreamControl;
pub use udp::{DatagramControl, MediaPair, MediaSockets};

/// Control channel of a leg.
#[derive(Debug)]
pub enum ControlChannel {
    Stream(StreamControl),
    Datagram(DatagramControl),
}

impl ControlChannel {
    pub async fn readable(&self) -> Result<()> {
        match self {
            Self::Stream(stream) => stream.readable().await,
            Self::Datagram(datagram) => datagram.readable().await,
        }
    }

    /// Pull everything the socket holds without blocking.
    pub fn try_receive(&mut self) -> Result<usize> {
        match self {
            Self::Stream(stream) => stream.try_receive(),
            Self::Datagram(datagram) => datagram.try_receive(),
        }
    }

    pub fn next_message(&mut self) -> Result<Option<Message>> {
        match self {
            Self::Stream(stream) => stream.next_message(),
            Self::Datagram(datagram) => datagram.next_message(),
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            Self::Stream(stream) => stream.send(bytes).await,
            Self::Datagram(datagram) => datagram.send(bytes).await,
        }
    }
}
