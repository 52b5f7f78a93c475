//! SDP (Session Description Protocol) handling (RFC 4566).
//!
//! Two directions are covered:
//!
//! - [`decode`] reads the body of a DESCRIBE response or a SIP answer
//!   into per-media format lists.
//! - [`build_offer`] produces the audio offer carried by INVITE.
//!
//! A media section looks like:
//!
//! ```text
//! m=audio 0 RTP/AVP 0 8        ← type, port, transport, format slots
//! a=rtpmap:0 PCMU/8000         ← binds slot 1
//! a=rtpmap:8 PCMA/8000         ← binds slot 2
//! a=control:trackID=1          ← SETUP suffix for the bound slots
//! ```

use std::net::IpAddr;

use crate::media::{Codec, CodecSet, MediaKind};

/// One format slot of a media section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdpFormat {
    /// RTP payload number from `a=rtpmap`, `None` while unbound.
    pub payload: Option<u8>,
    /// Matched codec, `None` while unbound.
    pub codec: Option<Codec>,
    /// Control suffix (relative path or absolute `rtsp://` URL).
    pub control: Option<String>,
}

/// Decoded `m=` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub kind: MediaKind,
    pub formats: Vec<SdpFormat>,
    /// Union of every bound codec.
    pub capabilities: CodecSet,
    /// Peer RTP port from `m=audio <port>`, SIP answers only.
    pub peer_port: Option<u16>,
    bound: usize,
}

impl MediaDescription {
    fn new(kind: MediaKind, slots: usize) -> Self {
        Self {
            kind,
            formats: vec![SdpFormat::default(); slots],
            capabilities: CodecSet::empty(),
            peer_port: None,
            bound: 0,
        }
    }

    /// Slots bound by an `a=rtpmap` line, in encounter order.
    pub fn bound_formats(&self) -> impl Iterator<Item = &SdpFormat> {
        self.formats.iter().take(self.bound)
    }

    /// First bound format whose codec the host can handle.
    pub fn first_compatible(&self, supported: CodecSet) -> Option<&SdpFormat> {
        self.bound_formats()
            .find(|f| f.codec.is_some_and(|c| supported.contains(c)))
    }

    fn bind_rtpmap(&mut self, value: &str) {
        if self.bound == self.formats.len() {
            tracing::debug!(kind = ?self.kind, "rtpmap beyond declared formats ignored");
            return;
        }
        let Some((payload, encoding)) = value.split_once(' ') else {
            return;
        };
        let Some(payload) = leading_number(payload) else {
            return;
        };
        let name = encoding.trim().split('/').next().unwrap_or("");
        let Some(codec) = Codec::from_name(name) else {
            tracing::debug!(name, payload, "rtpmap with unknown codec skipped");
            return;
        };

        self.formats[self.bound].payload = u8::try_from(payload).ok();
        self.formats[self.bound].codec = Some(codec);
        self.capabilities.insert(codec);
        self.bound += 1;
    }

    /// Before any rtpmap the suffix covers every slot. Afterwards it
    /// belongs to the most recently bound slot and is inherited by earlier
    /// bound slots that have none.
    fn apply_control(&mut self, suffix: &str) {
        if self.bound == 0 {
            for format in &mut self.formats {
                format.control = Some(suffix.to_string());
            }
            return;
        }
        let last = self.bound - 1;
        for (i, format) in self.formats.iter_mut().take(self.bound).enumerate() {
            if i == last || format.control.is_none() {
                format.control = Some(suffix.to_string());
            }
        }
    }
}

/// Decoded session description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdpContent {
    pub audio: Option<MediaDescription>,
    pub video: Option<MediaDescription>,
}

impl SdpContent {
    pub fn media(&self, kind: MediaKind) -> Option<&MediaDescription> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }

    fn media_mut(&mut self, kind: MediaKind) -> &mut Option<MediaDescription> {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }
}

/// Decode an SDP body.
///
/// Lines may end in CRLF, LF or CR. A section needs at least one format
/// token after `m=<type> <port> <proto>`; a later section of the same
/// type replaces an earlier one. With `sip_mode`, the audio port is kept
/// as the peer's RTP port when the transport token starts with `RTP`.
pub fn decode(body: &str, sip_mode: bool) -> SdpContent {
    let mut content = SdpContent::default();
    let mut current: Option<MediaKind> = None;

    for line in body.split(['\r', '\n']).filter(|l| !l.is_empty()) {
        if let Some(rest) = line.strip_prefix("m=") {
            current = None;
            let mut tokens = rest.split_whitespace();
            let kind = match tokens.next() {
                Some("audio") => MediaKind::Audio,
                Some("video") => MediaKind::Video,
                _ => continue,
            };
            let tokens: Vec<&str> = tokens.collect();
            if tokens.len() < 3 {
                tracing::debug!(?kind, line, "media section without formats");
                *content.media_mut(kind) = None;
                continue;
            }

            let mut media = MediaDescription::new(kind, tokens.len() - 2);
            if sip_mode && kind == MediaKind::Audio {
                media.peer_port = peer_port(tokens[0], tokens[1]);
            }
            *content.media_mut(kind) = Some(media);
            current = Some(kind);
        } else if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            if let Some(media) = current_media(&mut content, current) {
                media.bind_rtpmap(rest);
            }
        } else if let Some(rest) = line.strip_prefix("a=control:") {
            if let Some(media) = current_media(&mut content, current) {
                media.apply_control(rest.trim());
            }
        }
    }

    content
}

fn current_media(content: &mut SdpContent, current: Option<MediaKind>) -> Option<&mut MediaDescription> {
    match current {
        Some(kind) => content.media_mut(kind).as_mut(),
        None => None,
    }
}

fn peer_port(port: &str, transport: &str) -> Option<u16> {
    let port = leading_number(port).and_then(|p| u16::try_from(p).ok());
    match port {
        None | Some(0) => {
            tracing::warn!("peer RTP port not provided in SDP answer");
            None
        }
        Some(_) if !transport.starts_with("RTP") => {
            tracing::warn!(transport, "SDP answer transport is not RTP, peer port discarded");
            None
        }
        port => port,
    }
}

fn leading_number(text: &str) -> Option<u32> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    text[..end].parse().ok()
}

/// Build the INVITE audio offer for a PCMU or PCMA stream.
///
/// ```text
/// v=0
/// o=SIP 15812345678 424 IN IP4 10.0.0.9
/// s=SIPUA
/// c=IN IP4 10.0.0.9
/// t=0 0
/// m=audio 40002 RTP/AVP 0
/// b=AS:64
/// a=rtpmap:0 PCMU/8000
/// a=sendonly
/// ```
///
/// Returns `None` for any other codec.
pub fn build_offer(session_id: &str, address: IpAddr, rtp_port: u16, codec: Codec) -> Option<String> {
    if !matches!(codec, Codec::Pcmu | Codec::Pcma) {
        return None;
    }
    let payload_type = codec.static_payload_type()?;
    let family = match address {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    };

    let mut sdp: Vec<String> = Vec::new();
    sdp.push("v=0".to_string());
    sdp.push(format!("o=SIP {} 424 IN {} {}", session_id, family, address));
    sdp.push("s=SIPUA".to_string());
    sdp.push(format!("c=IN {} {}", family, address));
    sdp.push("t=0 0".to_string());
    sdp.push(format!("m=audio {} RTP/AVP {}", rtp_port, payload_type));
    sdp.push("b=AS:64".to_string());
    sdp.push(format!("a=rtpmap:{} {}/8000", payload_type, codec.name()));
    sdp.push("a=sendonly".to_string());

    tracing::debug!("SDP offer: {}", sdp.join("\r\n"));

    Some(format!("{}\r\n", sdp.join("\r\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_with_shared_control() {
        let body = "m=audio 0 RTP/AVP 0 8\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\na=control:trackID=0\r\n";
        let sdp = decode(body, false);
        assert!(sdp.video.is_none());
        let audio = sdp.audio.unwrap();
        let bound: Vec<_> = audio.bound_formats().collect();
        assert_eq!(bound.len(), 2);
        assert_eq!(bound[0].codec, Some(Codec::Pcmu));
        assert_eq!(bound[0].payload, Some(0));
        assert_eq!(bound[1].codec, Some(Codec::Pcma));
        assert_eq!(bound[1].payload, Some(8));
        assert!(bound.iter().all(|f| f.control.as_deref() == Some("trackID=0")));
        assert!(audio.capabilities.contains(Codec::Pcma));
        assert_eq!(audio.peer_port, None);
    }

    #[test]
    fn control_before_rtpmap_covers_all_slots() {
        let body = "m=video 0 RTP/AVP 96 97\na=control:track1\na=rtpmap:96 H264/90000\n";
        let video = decode(body, false).video.unwrap();
        assert_eq!(video.formats.len(), 2);
        assert!(video.formats.iter().all(|f| f.control.as_deref() == Some("track1")));
        assert_eq!(video.formats[0].codec, Some(Codec::H264));
        assert_eq!(video.formats[1].codec, None);
    }

    #[test]
    fn control_binds_to_latest_slot() {
        let body = "m=audio 0 RTP/AVP 0 8\r\na=rtpmap:0 PCMU/8000\r\na=control:a\r\na=rtpmap:8 PCMA/8000\r\na=control:b\r\n";
        let audio = decode(body, false).audio.unwrap();
        assert_eq!(audio.formats[0].control.as_deref(), Some("a"));
        assert_eq!(audio.formats[1].control.as_deref(), Some("b"));
    }

    #[test]
    fn unknown_codec_leaves_slot_unbound() {
        let body = "m=audio 0 RTP/AVP 97 0\r\na=rtpmap:97 opus/48000/2\r\na=rtpmap:0 PCMU/8000\r\n";
        let audio = decode(body, false).audio.unwrap();
        assert_eq!(audio.formats[0].codec, Some(Codec::Pcmu));
        assert_eq!(audio.formats[1], SdpFormat::default());
        assert_eq!(audio.bound_formats().count(), 1);
    }

    #[test]
    fn extra_rtpmap_ignored() {
        let body = "m=audio 0 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\n";
        let audio = decode(body, false).audio.unwrap();
        assert_eq!(audio.formats.len(), 1);
        assert!(!audio.capabilities.contains(Codec::Pcma));
    }

    #[test]
    fn section_without_formats_is_absent() {
        let sdp = decode("m=audio 0 RTP/AVP\r\na=rtpmap:0 PCMU/8000\r\n", false);
        assert!(sdp.audio.is_none());
    }

    #[test]
    fn sip_mode_reads_peer_port() {
        let body = "v=0\r\nm=audio 49170 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";
        assert_eq!(decode(body, true).audio.unwrap().peer_port, Some(49170));
        assert_eq!(decode(body, false).audio.unwrap().peer_port, None);
    }

    #[test]
    fn sip_mode_discards_port_for_non_rtp_transport() {
        let body = "m=audio 49170 udp 0\r\na=rtpmap:0 PCMU/8000\r\n";
        assert_eq!(decode(body, true).audio.unwrap().peer_port, None);
    }

    #[test]
    fn first_compatible_respects_capability() {
        let body = "m=audio 0 RTP/AVP 0 8\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\n";
        let audio = decode(body, false).audio.unwrap();
        let only_alaw: CodecSet = [Codec::Pcma].into_iter().collect();
        assert_eq!(
            audio.first_compatible(only_alaw).and_then(|f| f.codec),
            Some(Codec::Pcma)
        );
        assert!(audio.first_compatible(CodecSet::empty()).is_none());
    }

    #[test]
    fn offer_for_pcma() {
        let sdp = build_offer("15800001234", "10.0.0.9".parse().unwrap(), 40002, Codec::Pcma).unwrap();
        assert!(sdp.starts_with("v=0\r\no=SIP 15800001234 424 IN IP4 10.0.0.9\r\n"));
        assert!(sdp.contains("m=audio 40002 RTP/AVP 8\r\n"));
        assert!(sdp.contains("a=rtpmap:8 PCMA/8000\r\n"));
        assert!(sdp.ends_with("a=sendonly\r\n"));
    }

    #[test]
    fn offer_rejects_other_codecs() {
        assert!(build_offer("1", "10.0.0.9".parse().unwrap(), 40002, Codec::G722).is_none());
    }
}
