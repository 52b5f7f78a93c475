use std::fmt;

/// Identification string sent in every outbound RTSP request (RFC 2326 §12.41).
pub const USER_AGENT: &str = "rtsp-sip-rs/0.1";

/// Request methods used by either leg.
///
/// RTSP: OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN (RFC 2326 §10).
/// SIP: OPTIONS, INVITE, ACK, BYE generated; BYE, INFO, CANCEL accepted
/// (RFC 3261 §7.1, RFC 6086).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Teardown,
    Invite,
    Ack,
    Bye,
    Cancel,
    Info,
    Other(String),
}

impl Method {
    /// Method tokens are case-sensitive (RFC 3261 §7.1).
    pub fn parse(token: &str) -> Self {
        match token {
            "OPTIONS" => Self::Options,
            "DESCRIBE" => Self::Describe,
            "SETUP" => Self::Setup,
            "PLAY" => Self::Play,
            "TEARDOWN" => Self::Teardown,
            "INVITE" => Self::Invite,
            "ACK" => Self::Ack,
            "BYE" => Self::Bye,
            "CANCEL" => Self::Cancel,
            "INFO" => Self::Info,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Teardown => "TEARDOWN",
            Self::Invite => "INVITE",
            Self::Ack => "ACK",
            Self::Bye => "BYE",
            Self::Cancel => "CANCEL",
            Self::Info => "INFO",
            Self::Other(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol version carried on the start line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Rtsp10,
    Sip20,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rtsp10 => "RTSP/1.0",
            Self::Sip20 => "SIP/2.0",
        }
    }
}

/// An outbound request.
///
/// ```text
/// SETUP rtsp://10.0.0.2:554/live/trackID=0 RTSP/1.0\r\n
/// CSeq: 3\r\n
/// Transport: RTP/AVP/UDP;unicast;client_port=40000-40001\r\n
/// \r\n
/// ```
///
/// Built by chaining [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then calling [`serialize`](Self::serialize).
/// SIP requests always carry `Content-Length` (RFC 3261 §20.14); RTSP
/// requests only when a body is present.
#[must_use]
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub version: Version,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<String>, version: Version) -> Self {
        Self {
            method,
            uri: uri.into(),
            version,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn add_header(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Append the header only when a value is present.
    pub fn add_optional_header(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.add_header(name, value),
            None => self,
        }
    }

    pub fn with_body(mut self, content_type: &str, body: String) -> Self {
        self.headers
            .push(("Content-Type".to_string(), content_type.to_string()));
        self.body = Some(body);
        self
    }

    pub fn serialize(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, self.uri, self.version.as_str());

        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }

        let body = self.body.as_deref().unwrap_or("");
        if self.body.is_some() || self.version == Version::Sip20 {
            out.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtsp_request_without_body() {
        let req = Request::new(Method::Describe, "rtsp://cam/live", Version::Rtsp10)
            .add_header("CSeq", 1)
            .add_header("Accept", "application/sdp");
        let s = req.serialize();
        assert_eq!(
            s,
            "DESCRIBE rtsp://cam/live RTSP/1.0\r\nCSeq: 1\r\nAccept: application/sdp\r\n\r\n"
        );
    }

    #[test]
    fn sip_request_always_has_content_length() {
        let s = Request::new(Method::Options, "sip:cam@10.0.0.2:5060", Version::Sip20)
            .add_header("CSeq", "1 OPTIONS")
            .serialize();
        assert!(s.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn body_sets_type_and_length() {
        let s = Request::new(Method::Invite, "sip:a@b", Version::Sip20)
            .with_body("application/sdp", "v=0\r\n".to_string())
            .serialize();
        assert!(s.contains("Content-Type: application/sdp\r\n"));
        assert!(s.contains("Content-Length: 5\r\n\r\nv=0\r\n"));
    }

    #[test]
    fn optional_header_skipped_when_none() {
        let s = Request::new(Method::Play, "rtsp://cam/live", Version::Rtsp10)
            .add_optional_header("Authorization", None)
            .add_optional_header("Session", Some("12345"))
            .serialize();
        assert!(!s.contains("Authorization"));
        assert!(s.contains("Session: 12345\r\n"));
    }

    #[test]
    fn method_tokens() {
        assert_eq!(Method::parse("BYE"), Method::Bye);
        assert_eq!(Method::parse("bye"), Method::Other("bye".to_string()));
        assert_eq!(Method::Teardown.to_string(), "TEARDOWN");
    }
}
