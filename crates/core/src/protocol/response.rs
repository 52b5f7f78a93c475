use super::request::Version;

/// An outbound response, used by the SIP leg to answer unsolicited
/// BYE and INFO requests (RFC 3261 §8.2.6).
///
/// ```text
/// SIP/2.0 200 OK\r\n
/// Via: SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bK77;rport=5060;received=10.0.0.2\r\n
/// Call-ID: 1f2e@10.0.0.2\r\n
/// CSeq: 3 BYE\r\n
/// Content-Length: 0\r\n
/// \r\n
/// ```
///
/// Builder methods mirror [`Request`](super::Request). Responses carry no
/// body, so SIP gets `Content-Length: 0` and RTSP no length at all.
#[must_use]
#[derive(Debug, Clone)]
pub struct Response {
    pub version: Version,
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
}

impl Response {
    pub fn new(version: Version, status_code: u16, status_text: &str) -> Self {
        Self {
            version,
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
        }
    }

    /// 200 OK (RFC 3261 §21.2.1).
    pub fn ok(version: Version) -> Self {
        Self::new(version, 200, "OK")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn serialize(&self) -> String {
        let mut out = format!(
            "{} {} {}\r\n",
            self.version.as_str(),
            self.status_code,
            self.status_text
        );

        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }

        if self.version == Version::Sip20 {
            out.push_str("Content-Length: 0\r\n");
        }
        out.push_str("\r\n");
        out
    }
}
