//! Control-leg state machines and the per-leg session wrapper.
//!
//! Both legs are sans-IO: they consume parsed [`Message`]s and timer
//! ticks and queue [`LegEvent`]s describing what the orchestrator must do
//! (bytes to send, sockets to connect, media to enable). The orchestrator
//! in [`crate::client`] owns every socket.
//!
//! ## RTSP leg ([`rtsp`])
//!
//! ```text
//! Idle -> Describe -> SetupAudio -> SetupVideo (optional) -> Play -> Playing -> Released
//!            |  401: Basic, then Digest, each once
//!            '- any other non-2xx ends the session
//! ```
//!
//! ## SIP leg ([`sip`])
//!
//! ```text
//! Idle -> Options -> Invite -> InDialog -> Bye -> Idle
//!                       '---> Failed
//! ```
//!
//! [`Session`] pairs one state machine with its control channel, its media
//! sockets and the reception statistics of each media kind, so the socket
//! plumbing is written once for both legs.

pub mod dialog;
pub mod rtsp;
pub mod sip;
pub mod transport;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::RngCore;

use crate::error::Result;
use crate::media::{Channel, Codec, MediaKind, MediaStats};
use crate::protocol::{Message, Method};
use crate::transport::{ControlChannel, MediaSockets};
pub use transport::{PortPair, TransportHeader};

/// Injected random source for correlators and SSRCs.
pub type SharedRng = Box<dyn RngCore + Send>;

/// Most distinct RTSP session ids retained (one per SETUP).
pub const MAX_SESSION_IDS: usize = 2;

/// Local RTP/RTCP ports of each media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaPorts {
    pub audio: PortPair,
    pub video: PortPair,
}

impl MediaPorts {
    pub fn get(&self, kind: MediaKind) -> PortPair {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }
}

/// RTSP `Session` ids in SETUP order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIds(Vec<String>);

impl SessionIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the id from a `Session` header value, dropping parameters
    /// such as `;timeout=60`. Returns `false` if the id was already known
    /// or the list is full.
    pub fn add(&mut self, header: &str) -> bool {
        let id = header.split(';').next().unwrap_or("").trim();
        if id.is_empty() || self.0.iter().any(|known| known == id) {
            return false;
        }
        if self.0.len() == MAX_SESSION_IDS {
            tracing::warn!(id, "session id limit reached, id ignored");
            return false;
        }
        self.0.push(id.to_string());
        true
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-method `CSeq` counters of the SIP leg. The first request of each
/// method uses 1.
#[derive(Debug, Clone, Default)]
pub struct CSeqCounters {
    counters: HashMap<Method, u32>,
}

impl CSeqCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, method: &Method) -> u32 {
        let counter = self.counters.entry(method.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Number used by the latest request of `method`, 0 if none was sent.
    pub fn last(&self, method: &Method) -> u32 {
        self.counters.get(method).copied().unwrap_or(0)
    }
}

/// Work a state machine hands to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegEvent {
    /// Serialized message for the control channel.
    Transmit(Vec<u8>),
    /// Connect a local media socket to this port on the peer host.
    ConnectMedia {
        kind: MediaKind,
        channel: Channel,
        port: u16,
    },
    /// Send an empty RTP packet and a receiver report on the video pair.
    OpenVideoPath,
    /// A track was negotiated.
    FormatSelected {
        kind: MediaKind,
        codec: Codec,
        payload_type: Option<u8>,
    },
    /// PLAY issued. `None` means no playback cap.
    Playing { duration: Option<Duration> },
    /// Periodic receiver reports are due.
    ReportsDue,
    /// SIP answer accepted; send outbound audio to this peer port.
    MediaEnabled { payload_type: u8, peer_port: u16 },
    /// SIP dialog closed by the peer.
    MediaDisabled,
}

/// A control-leg state machine.
pub trait ControlProtocol {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// Feed one complete inbound message.
    fn handle_message(&mut self, message: Message, now: Instant) -> Result<()>;

    /// Called once the instant returned by [`poll_timeout`] has passed.
    ///
    /// [`poll_timeout`]: ControlProtocol::poll_timeout
    fn handle_timeout(&mut self, now: Instant) -> Result<()>;

    /// Next queued event.
    fn poll_event(&mut self) -> Option<LegEvent>;

    /// When [`handle_timeout`] should next be called.
    ///
    /// [`handle_timeout`]: ControlProtocol::handle_timeout
    fn poll_timeout(&self) -> Option<Instant>;
}

/// One leg: a state machine plus the sockets and statistics it drives.
pub struct Session<P> {
    pub machine: P,
    pub control: ControlChannel,
    pub media: MediaSockets,
    stats: [MediaStats; 2],
}

impl<P: ControlProtocol> Session<P> {
    pub fn new(machine: P, control: ControlChannel, media: MediaSockets, now: Instant) -> Self {
        Self {
            machine,
            control,
            media,
            stats: [MediaStats::new(now), MediaStats::new(now)],
        }
    }

    pub fn name(&self) -> &'static str {
        self.machine.name()
    }

    pub fn stats(&self, kind: MediaKind) -> &MediaStats {
        &self.stats[kind as usize]
    }

    pub fn stats_mut(&mut self, kind: MediaKind) -> &mut MediaStats {
        &mut self.stats[kind as usize]
    }

    pub fn reset_stats(&mut self, now: Instant) {
        for stats in &mut self.stats {
            stats.reset(now);
        }
    }

    /// Drain every complete message buffered on the control channel into
    /// the state machine.
    pub fn dispatch_inbound(&mut self, now: Instant) -> Result<()> {
        while let Some(message) = self.control.next_message()? {
            tracing::debug!(
                leg = self.machine.name(),
                start_line = ?message.start_line,
                "message received"
            );
            self.machine.handle_message(message, now)?;
        }
        Ok(())
    }

    /// Run the timer hook if its deadline has passed.
    pub fn fire_timer(&mut self, now: Instant) -> Result<()> {
        match self.machine.poll_timeout() {
            Some(deadline) if deadline <= now => self.machine.handle_timeout(now),
            _ => Ok(()),
        }
    }

    /// Send a receiver report for `kind` on its RTCP socket and restart
    /// the statistics window.
    pub fn send_receiver_report(&mut self, kind: MediaKind, reporter_ssrc: u32, now: Instant) {
        let report = self.stats(kind).receiver_report(reporter_ssrc, now);
        if let Some(pair) = self.media.get(kind) {
            if let Err(error) = pair.try_send(Channel::Rtcp, &report.to_bytes()) {
                tracing::warn!(leg = self.machine.name(), ?kind, %error, "receiver report not sent");
            } else {
                tracing::trace!(leg = self.machine.name(), ?kind, ?report, "receiver report sent");
            }
        }
        self.stats_mut(kind).reset(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_strip_params_and_dedupe() {
        let mut ids = SessionIds::new();
        assert!(ids.add("12345678;timeout=60"));
        assert!(!ids.add("12345678"));
        assert!(ids.add(" abcdef "));
        assert!(!ids.add("third"));
        assert_eq!(ids.iter().collect::<Vec<_>>(), ["12345678", "abcdef"]);
        assert_eq!(ids.last(), Some("abcdef"));
    }

    #[test]
    fn empty_session_header_ignored() {
        let mut ids = SessionIds::new();
        assert!(!ids.add(";timeout=60"));
        assert!(ids.is_empty());
    }

    #[test]
    fn cseq_per_method() {
        let mut cseq = CSeqCounters::new();
        assert_eq!(cseq.last(&Method::Invite), 0);
        assert_eq!(cseq.next(&Method::Options), 1);
        assert_eq!(cseq.next(&Method::Invite), 1);
        assert_eq!(cseq.next(&Method::Invite), 2);
        assert_eq!(cseq.next(&Method::Options), 2);
        assert_eq!(cseq.last(&Method::Invite), 2);
    }
}
