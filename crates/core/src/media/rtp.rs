use rand::Rng;
use rand::RngCore;

/// Size of the fixed RTP header.
pub const RTP_HEADER_LEN: usize = 12;

/// RTP fixed header builder (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Version is always 2. Padding, extension and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
    timestamp: u64,
}

impl RtpHeader {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self {
            pt: pt & 0x7f,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// SSRC drawn from the session's random source (RFC 3550 §8.1).
    pub fn with_random_ssrc(pt: u8, rng: &mut dyn RngCore) -> Self {
        let ssrc = rng.random::<u32>();
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self::new(pt, ssrc)
    }

    /// Sequence number the next [`write`](Self::write) will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: u16) {
        self.sequence = sequence;
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp;
    }

    /// Serialize the header and advance the sequence number.
    pub fn write(&mut self, marker: bool) -> [u8; RTP_HEADER_LEN] {
        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = 2 << 6;
        header[1] = ((marker as u8) << 7) | self.pt;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&(self.timestamp as u32).to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }
}

/// Empty version-2 packet sent towards the server's video ports so that
/// NAT bindings exist before media flows.
pub fn start_packet() -> [u8; RTP_HEADER_LEN] {
    RtpHeader::new(0, 0).write(false)
}

/// Borrowed view of an inbound RTP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse a version-2 packet, skipping the CSRC list.
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        if buf.len() < RTP_HEADER_LEN || buf[0] >> 6 != 2 {
            return None;
        }
        let csrc_count = (buf[0] & 0x0f) as usize;
        let header_len = RTP_HEADER_LEN + 4 * csrc_count;
        if buf.len() < header_len {
            return None;
        }
        Some(Self {
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7f,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            payload: &buf[header_len..],
        })
    }
}

/// Frames the host's outbound audio for the SIP leg.
///
/// Frames arriving before media is enabled are counted and dropped. Once
/// enabled, the sequence number is the total frame count so far, the
/// timestamp is the sample count of all previously sent frames, and only
/// the first sent frame carries the marker bit.
#[derive(Debug, Default)]
pub struct AudioSender {
    header: Option<RtpHeader>,
    pre_enable: u16,
    post_enable: u16,
    samples: u64,
    send_errors: u32,
}

impl AudioSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self, payload_type: u8, rng: &mut dyn RngCore) {
        tracing::info!(payload_type, dropped = self.pre_enable, "outbound audio enabled");
        self.header = Some(RtpHeader::with_random_ssrc(payload_type, rng));
    }

    pub fn disable(&mut self) {
        if self.header.take().is_some() {
            tracing::info!(sent = self.post_enable, errors = self.send_errors, "outbound audio disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.header.is_some()
    }

    /// RTP packet for one host frame, or `None` while disabled.
    pub fn on_frame(&mut self, payload: &[u8], samples: u32) -> Option<Vec<u8>> {
        let Some(header) = self.header.as_mut() else {
            self.pre_enable = self.pre_enable.wrapping_add(1);
            return None;
        };
        self.post_enable = self.post_enable.wrapping_add(1);
        header.set_sequence(self.pre_enable.wrapping_add(self.post_enable));
        header.set_timestamp(self.samples);
        self.samples = self.samples.wrapping_add(u64::from(samples));

        let mut packet = Vec::with_capacity(RTP_HEADER_LEN + payload.len());
        packet.extend_from_slice(&header.write(self.post_enable == 1));
        packet.extend_from_slice(payload);
        Some(packet)
    }

    pub fn record_send_error(&mut self) {
        self.send_errors += 1;
    }

    pub fn send_errors(&self) -> u32 {
        self.send_errors
    }

    /// Frames dropped before enabling and frames sent after.
    pub fn frame_counts(&self) -> (u16, u16) {
        (self.pre_enable, self.post_enable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn make_header() -> RtpHeader {
        RtpHeader::new(96, 0xAABBCCDD)
    }

    #[test]
    fn version_marker_and_type() {
        let mut h = make_header();
        let buf = h.write(false);
        assert_eq!(buf[0] >> 6, 2);
        assert_eq!(buf[1] & 0x80, 0);
        assert_eq!(buf[1] & 0x7f, 96);
        assert_eq!(h.write(true)[1] & 0x80, 0x80);
    }

    #[test]
    fn sequence_wraps() {
        let mut h = make_header();
        h.set_sequence(u16::MAX);
        let buf = h.write(false);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), u16::MAX);
        assert_eq!(h.sequence(), 0);
    }

    #[test]
    fn seeded_ssrc_is_reproducible() {
        let a = RtpHeader::with_random_ssrc(0, &mut StdRng::seed_from_u64(9));
        let b = RtpHeader::with_random_ssrc(0, &mut StdRng::seed_from_u64(9));
        assert_eq!(a.ssrc, b.ssrc);
    }

    #[test]
    fn start_packet_is_bare_v2() {
        assert_eq!(start_packet(), [0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn parse_round_trip_with_csrc() {
        let mut raw = vec![0x82, 0x80 | 96, 0x01, 0x02, 0, 0, 0x0b, 0xb8, 1, 2, 3, 4];
        raw.extend_from_slice(&[0; 8]);
        raw.extend_from_slice(b"nal");
        let pkt = RtpPacket::parse(&raw).unwrap();
        assert!(pkt.marker);
        assert_eq!(pkt.payload_type, 96);
        assert_eq!(pkt.sequence, 0x0102);
        assert_eq!(pkt.timestamp, 3000);
        assert_eq!(pkt.ssrc, 0x01020304);
        assert_eq!(pkt.payload, b"nal");
    }

    #[test]
    fn parse_rejects_short_or_wrong_version() {
        assert!(RtpPacket::parse(&[0x80; 11]).is_none());
        assert!(RtpPacket::parse(&[0x40; 12]).is_none());
        assert!(RtpPacket::parse(&[0x81, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn sender_counts_and_marks_first_frame() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut sender = AudioSender::new();
        assert!(sender.on_frame(&[0xff; 160], 160).is_none());
        assert!(sender.on_frame(&[0xff; 160], 160).is_none());

        sender.enable(8, &mut rng);
        let first = sender.on_frame(&[0xd5; 160], 160).unwrap();
        let second = sender.on_frame(&[0xd5; 160], 160).unwrap();

        let p1 = RtpPacket::parse(&first).unwrap();
        let p2 = RtpPacket::parse(&second).unwrap();
        assert!(p1.marker);
        assert!(!p2.marker);
        assert_eq!(p1.payload_type, 8);
        assert_eq!(p1.sequence, 3);
        assert_eq!(p2.sequence, 4);
        assert_eq!(p1.timestamp, 0);
        assert_eq!(p2.timestamp, 160);
        assert_eq!(p1.ssrc, p2.ssrc);
        assert_eq!(p1.payload.len(), 160);
        assert_eq!(sender.frame_counts(), (2, 2));
    }

    #[test]
    fn sender_error_counter() {
        let mut sender = AudioSender::new();
        sender.record_send_error();
        sender.record_send_error();
        assert_eq!(sender.send_errors(), 2);
        sender.disable();
        assert!(!sender.is_enabled());
    }
}
