/// Port pairs from an RTSP `Transport` header (RFC 2326 §12.39).
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP/UDP;unicast;client_port=40000-40001
///
/// Server → Client:
///   Transport: RTP/AVP/UDP;unicast;client_port=40000-40001;server_port=6970-6971
/// ```
///
/// The client connects its RTCP socket (and for video its RTP socket too)
/// to the server pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHeader {
    pub client_ports: Option<PortPair>,
    pub server_ports: Option<PortPair>,
}

/// An RTP/RTCP port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub rtp: u16,
    pub rtcp: u16,
}

impl PortPair {
    /// Parse `RTP-RTCP`; a lone `RTP` implies `RTCP = RTP + 1`.
    pub fn parse(text: &str) -> Option<Self> {
        match text.split_once('-') {
            Some((rtp, rtcp)) => Some(Self {
                rtp: rtp.trim().parse().ok()?,
                rtcp: rtcp.trim().parse().ok()?,
            }),
            None => {
                let rtp: u16 = text.trim().parse().ok()?;
                Some(Self {
                    rtp,
                    rtcp: rtp.checked_add(1)?,
                })
            }
        }
    }
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp_sip::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001;server_port=6970-6971");
    /// assert_eq!(th.server_ports.unwrap().rtcp, 6971);
    /// assert_eq!(th.client_ports.unwrap().rtp, 8000);
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").server_ports.is_none());
    /// ```
    pub fn parse(header: &str) -> Self {
        let mut parsed = Self::default();
        for part in header.split(';').map(str::trim) {
            if let Some(ports) = part.strip_prefix("client_port=") {
                parsed.client_ports = PortPair::parse(ports);
            } else if let Some(ports) = part.strip_prefix("server_port=") {
                parsed.server_ports = PortPair::parse(ports);
            }
        }
        parsed
    }

    /// Value the client sends in SETUP.
    pub fn request(client: PortPair) -> String {
        format!("RTP/AVP/UDP;unicast;client_port={}-{}", client.rtp, client.rtcp)
    }
}
