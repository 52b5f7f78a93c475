use std::borrow::Cow;

use super::headers::{HeaderList, locate_headers, parse_header_block};
use super::request::Method;
use crate::error::{Error, ParseErrorKind, Result};

/// Upper bound on bytes held while waiting for a complete message.
pub const MAX_MESSAGE_BUFFER: usize = 16 * 1024;

/// First line of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// `<version> <3-digit-code> <reason>`
    Response {
        version: String,
        code: u16,
        reason: String,
    },
    /// `<method> <uri> <version>`
    Request {
        method: Method,
        uri: String,
        version: String,
    },
}

impl StartLine {
    pub fn parse(line: &str) -> Result<Self> {
        let invalid = || Error::parse(ParseErrorKind::InvalidStartLine);
        let mut parts = line.trim().splitn(3, ' ');
        let first = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;

        if is_version(first) {
            let code = parts.next().ok_or_else(invalid)?;
            if code.len() != 3 {
                return Err(invalid());
            }
            let code: u16 = code.parse().map_err(|_| invalid())?;
            let reason = parts.next().unwrap_or("").trim().to_string();
            return Ok(Self::Response {
                version: first.to_string(),
                code,
                reason,
            });
        }

        let uri = parts.next().ok_or_else(invalid)?;
        let version = parts.next().map(str::trim).ok_or_else(invalid)?;
        if !is_version(version) {
            tracing::warn!(version, "unexpected protocol version in request line");
            return Err(invalid());
        }
        Ok(Self::Request {
            method: Method::parse(first),
            uri: uri.to_string(),
            version: version.to_string(),
        })
    }
}

fn is_version(token: &str) -> bool {
    token.starts_with("RTSP/") || token.starts_with("SIP/")
}

/// A complete inbound message: start line, headers and body.
#[derive(Debug, Clone)]
pub struct Message {
    pub start_line: StartLine,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

impl Message {
    /// Parse one complete message, e.g. a SIP datagram.
    ///
    /// The body is cut to `Content-Length`; fewer bytes than announced is
    /// [`ParseErrorKind::IncompleteBody`].
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let start_end = locate_headers(raw)?;
        let start_line = StartLine::parse(&String::from_utf8_lossy(&raw[..start_end - 2]))?;
        let (headers, header_len) = parse_header_block(&raw[start_end..])?;

        let body_start = start_end + header_len.unwrap_or(raw.len() - start_end);
        let available = &raw[body_start..];
        let wanted = headers.content_length();
        if available.len() < wanted {
            return Err(Error::parse(ParseErrorKind::IncompleteBody));
        }

        Ok(Self {
            start_line,
            headers,
            body: available[..wanted].to_vec(),
        })
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.start_line {
            StartLine::Response { code, .. } => Some(*code),
            StartLine::Request { .. } => None,
        }
    }

    pub fn method(&self) -> Option<&Method> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Case-insensitive prefix match on `Content-Type`, so parameters such
    /// as `; charset=utf-8` are tolerated.
    pub fn has_content_type(&self, mime: &str) -> bool {
        self.header("Content-Type").is_some_and(|value| {
            value
                .as_bytes()
                .get(..mime.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(mime.as_bytes()))
        })
    }
}

/// Accumulates stream bytes until whole messages are available.
///
/// A message is complete once its header block is terminated and
/// `Content-Length` body bytes have arrived. Consumed bytes are drained
/// and the residual shifted to the front.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    data: Vec<u8>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        if self.data.len() + bytes.len() > MAX_MESSAGE_BUFFER {
            return Err(Error::violation(format!(
                "message exceeds {} bytes",
                MAX_MESSAGE_BUFFER
            )));
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Next complete message, or `None` while more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        let Some(head_end) = self.data.windows(4).position(|w| w == b"\r\n\r\n") else {
            return Ok(None);
        };
        let head_len = head_end + 4;

        let start_end = locate_headers(&self.data)?;
        let (headers, _) = parse_header_block(&self.data[start_end..head_len])?;
        let total = head_len
            .checked_add(headers.content_length())
            .filter(|&total| total <= MAX_MESSAGE_BUFFER)
            .ok_or_else(|| {
                Error::violation(format!(
                    "announced message exceeds {} bytes",
                    MAX_MESSAGE_BUFFER
                ))
            })?;
        if self.data.len() < total {
            tracing::trace!(
                buffered = self.data.len(),
                needed = total,
                "waiting for body bytes"
            );
            return Ok(None);
        }

        let message = Message::parse(&self.data[..total])?;
        self.data.drain(..total);
        Ok(Some(message))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIBE_OK: &[u8] = b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Type: application/sdp\r\nContent-Length: 10\r\n\r\nv=0\r\ns=x\r\n";

    #[test]
    fn parse_status_line() {
        let line = StartLine::parse("RTSP/1.0 401 Unauthorized").unwrap();
        assert_eq!(
            line,
            StartLine::Response {
                version: "RTSP/1.0".into(),
                code: 401,
                reason: "Unauthorized".into()
            }
        );
    }

    #[test]
    fn parse_request_line() {
        let line = StartLine::parse("BYE sip:rtsp-sip@10.0.0.9:5060 SIP/2.0").unwrap();
        match line {
            StartLine::Request { method, uri, .. } => {
                assert_eq!(method, Method::Bye);
                assert_eq!(uri, "sip:rtsp-sip@10.0.0.9:5060");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reject_bad_start_lines() {
        assert!(StartLine::parse("").is_err());
        assert!(StartLine::parse("RTSP/1.0 20 OK").is_err());
        assert!(StartLine::parse("GET / HTTP/1.1").is_err());
    }

    #[test]
    fn parse_complete_message() {
        let msg = Message::parse(DESCRIBE_OK).unwrap();
        assert_eq!(msg.status_code(), Some(200));
        assert!(msg.has_content_type("application/sdp"));
        assert_eq!(msg.body_text(), "v=0\r\ns=x\r\n");
    }

    #[test]
    fn short_body_is_incomplete() {
        let raw = b"SIP/2.0 200 OK\r\nContent-Length: 50\r\n\r\nv=0\r\n";
        assert!(matches!(
            Message::parse(raw),
            Err(Error::Parse {
                kind: ParseErrorKind::IncompleteBody
            })
        ));
    }

    #[test]
    fn buffer_waits_for_headers_then_body() {
        let mut buf = MessageBuffer::new();
        let (a, rest) = DESCRIBE_OK.split_at(20);
        let (b, c) = rest.split_at(rest.len() - 4);

        buf.extend(a).unwrap();
        assert!(buf.next_message().unwrap().is_none());
        buf.extend(b).unwrap();
        assert!(buf.next_message().unwrap().is_none());
        buf.extend(c).unwrap();
        let msg = buf.next_message().unwrap().unwrap();
        assert_eq!(msg.headers.cseq(), Some(2));
        assert!(buf.is_empty());
    }

    #[test]
    fn residual_bytes_shift_to_front() {
        let mut buf = MessageBuffer::new();
        let mut raw = b"RTSP/1.0 200 OK\r\nCSeq: 5\r\nSession: 1\r\n\r\n".to_vec();
        raw.extend_from_slice(b"RTSP/1.0 200 OK\r\nCSeq: 6\r\n");
        buf.extend(&raw).unwrap();

        let first = buf.next_message().unwrap().unwrap();
        assert_eq!(first.headers.cseq(), Some(5));
        assert!(buf.next_message().unwrap().is_none());

        buf.extend(b"\r\n").unwrap();
        let second = buf.next_message().unwrap().unwrap();
        assert_eq!(second.headers.cseq(), Some(6));
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn content_type_with_multibyte_value() {
        let raw = "RTSP/1.0 200 OK\r\nContent-Type: abcdefghijklmnôx\r\n\r\n";
        let msg = Message::parse(raw.as_bytes()).unwrap();
        assert!(!msg.has_content_type("application/sdp"));

        let raw = "RTSP/1.0 200 OK\r\nContent-Type: APPLICATION/SDP; charset=é\r\n\r\n";
        let msg = Message::parse(raw.as_bytes()).unwrap();
        assert!(msg.has_content_type("application/sdp"));
    }

    #[test]
    fn huge_content_length_is_a_violation() {
        let mut buf = MessageBuffer::new();
        buf.extend(b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: 18446744073709551615\r\n\r\n")
            .unwrap();
        assert!(matches!(buf.next_message(), Err(Error::ProtocolViolation(_))));

        let mut buf = MessageBuffer::new();
        let head = format!("RTSP/1.0 200 OK\r\nContent-Length: {}\r\n\r\n", MAX_MESSAGE_BUFFER);
        buf.extend(head.as_bytes()).unwrap();
        assert!(matches!(buf.next_message(), Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn overflow_is_a_violation() {
        let mut buf = MessageBuffer::new();
        let chunk = vec![b'a'; MAX_MESSAGE_BUFFER];
        buf.extend(&chunk).unwrap();
        assert!(matches!(buf.extend(b"b"), Err(Error::ProtocolViolation(_))));
    }
}
