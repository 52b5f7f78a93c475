//! RTCP receiver reports and inbound compound scanning (RFC 3550 §6).

/// Packet type of a receiver report.
pub const PT_RR: u8 = 201;
/// Packet type of a goodbye.
pub const PT_BYE: u8 = 203;

/// Size of an RR with exactly one report block.
pub const RR_LEN: usize = 32;

/// Jitter is not measured; this constant goes on the wire instead.
pub const JITTER_PLACEHOLDER: u32 = 0xFF;

/// Receiver report with one report block (RFC 3550 §6.4.2).
///
/// ```text
///  0                   1                   2                   3
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|  RC=1   |   PT=RR=201   |          length=7             |
/// |                     SSRC of packet sender                     |
/// |                 SSRC_1 (SSRC of first source)                 |
/// | fraction lost |       cumulative number of packets lost       |
/// |           extended highest sequence number received           |
/// |                      interarrival jitter                      |
/// |                         last SR (LSR)                         |
/// |                   delay since last SR (DLSR)                  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverReport {
    pub reporter_ssrc: u32,
    pub source_ssrc: u32,
    pub fraction_lost: u8,
    /// Signed, truncated to 24 bits on the wire.
    pub cumulative_lost: i32,
    pub highest_sequence: u32,
    pub jitter: u32,
    pub last_sr: u32,
    pub delay_since_last_sr: u32,
}

impl ReceiverReport {
    pub fn to_bytes(&self) -> [u8; RR_LEN] {
        let mut out = [0u8; RR_LEN];
        out[0] = (2 << 6) | 1;
        out[1] = PT_RR;
        out[2..4].copy_from_slice(&7u16.to_be_bytes());
        out[4..8].copy_from_slice(&self.reporter_ssrc.to_be_bytes());
        out[8..12].copy_from_slice(&self.source_ssrc.to_be_bytes());

        let lost = self.cumulative_lost.clamp(-0x80_0000, 0x7F_FFFF) as u32 & 0x00FF_FFFF;
        out[12..16].copy_from_slice(&((u32::from(self.fraction_lost) << 24) | lost).to_be_bytes());
        out[16..20].copy_from_slice(&self.highest_sequence.to_be_bytes());
        out[20..24].copy_from_slice(&self.jitter.to_be_bytes());
        out[24..28].copy_from_slice(&self.last_sr.to_be_bytes());
        out[28..32].copy_from_slice(&self.delay_since_last_sr.to_be_bytes());
        out
    }
}

/// Walk a compound RTCP datagram and report whether it holds a BYE.
///
/// Each packet advances by `(length + 1) * 4` bytes.
pub fn contains_bye(buf: &[u8]) -> bool {
    let mut offset = 0;
    while offset + 4 <= buf.len() {
        let pt = buf[offset + 1];
        if pt == PT_BYE {
            return true;
        }
        let length = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        offset += (length + 1) * 4;
    }
    false
}
