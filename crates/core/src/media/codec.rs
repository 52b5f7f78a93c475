use std::fmt;

use super::MediaKind;

/// Codecs recognised in SDP `a=rtpmap` lines (RFC 3551 §6 names plus the
/// common dynamic ones).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    G723,
    Gsm,
    Pcmu,
    Pcma,
    G726,
    Dvi4,
    L16,
    Lpc,
    G729,
    Speex,
    Ilbc,
    G722,
    G726Aal2,
    Amr,
    Jpeg,
    Png,
    H261,
    H263,
    H263Plus,
    H264,
    Mp4v,
}

impl Codec {
    pub const ALL: [Codec; 21] = [
        Codec::G723,
        Codec::Gsm,
        Codec::Pcmu,
        Codec::Pcma,
        Codec::G726,
        Codec::Dvi4,
        Codec::L16,
        Codec::Lpc,
        Codec::G729,
        Codec::Speex,
        Codec::Ilbc,
        Codec::G722,
        Codec::G726Aal2,
        Codec::Amr,
        Codec::Jpeg,
        Codec::Png,
        Codec::H261,
        Codec::H263,
        Codec::H263Plus,
        Codec::H264,
        Codec::Mp4v,
    ];

    /// Encoding name as written in `a=rtpmap`.
    pub fn name(self) -> &'static str {
        match self {
            Self::G723 => "G723",
            Self::Gsm => "GSM",
            Self::Pcmu => "PCMU",
            Self::Pcma => "PCMA",
            Self::G726 => "G726-32",
            Self::Dvi4 => "DVI4",
            Self::L16 => "L16",
            Self::Lpc => "LPC",
            Self::G729 => "G729",
            Self::Speex => "speex",
            Self::Ilbc => "iLBC",
            Self::G722 => "G722",
            Self::G726Aal2 => "AAL2-G726-32",
            Self::Amr => "AMR",
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::H261 => "H261",
            Self::H263 => "H263",
            Self::H263Plus => "H263-2000",
            Self::H264 => "H264",
            Self::Mp4v => "MP4V-ES",
        }
    }

    /// Case-insensitive lookup by encoding name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|codec| codec.name().eq_ignore_ascii_case(name))
    }

    pub fn kind(self) -> MediaKind {
        match self {
            Self::Jpeg | Self::Png | Self::H261 | Self::H263 | Self::H263Plus | Self::H264 | Self::Mp4v => {
                MediaKind::Video
            }
            _ => MediaKind::Audio,
        }
    }

    /// Static payload type from the RFC 3551 table, if one is assigned.
    pub fn static_payload_type(self) -> Option<u8> {
        match self {
            Self::Pcmu => Some(0),
            Self::Gsm => Some(3),
            Self::G723 => Some(4),
            Self::Dvi4 => Some(5),
            Self::Lpc => Some(7),
            Self::Pcma => Some(8),
            Self::G722 => Some(9),
            Self::L16 => Some(11),
            Self::G729 => Some(18),
            Self::Jpeg => Some(26),
            Self::H261 => Some(31),
            Self::H263 => Some(34),
            _ => None,
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of codecs, used both for SDP capability aggregates and for the
/// host's advertised capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecSet(u32);

impl CodecSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, codec: Codec) {
        self.0 |= codec.bit();
    }

    pub fn contains(self, codec: Codec) -> bool {
        self.0 & codec.bit() != 0
    }

    pub fn union(self, other: CodecSet) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Members in table order.
    pub fn iter(self) -> impl Iterator<Item = Codec> {
        Codec::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Codec> for CodecSet {
    fn from_iter<I: IntoIterator<Item = Codec>>(iter: I) -> Self {
        let mut set = Self::empty();
        for codec in iter {
            set.insert(codec);
        }
        set
    }
}
