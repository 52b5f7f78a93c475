//! Start-line boundary detection and header-block parsing.
//!
//! RTSP (RFC 2326 §4) and SIP (RFC 3261 §7) share the HTTP/1.1 message
//! grammar: a start line, header fields terminated by an empty line, and
//! an optional body. Header lines may be folded onto continuation lines
//! that begin with whitespace (RFC 3261 §7.3.1).

use crate::error::{Error, ParseErrorKind, Result};

/// Upper bound on header fields retained per message.
pub const MAX_HEADERS: usize = 100;

/// Upper bound on a single logical header line, folds included.
pub const MAX_HEADER_LINE: usize = 1024;

/// Ordered header fields, duplicates preserved in receipt order.
///
/// Lookups are case-insensitive on the field name. Capacity is bounded
/// by [`MAX_HEADERS`]; pushing past it fails with
/// [`ParseErrorKind::TooManyHeaders`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: &str) -> Result<()> {
        if self.entries.len() >= MAX_HEADERS {
            return Err(Error::parse(ParseErrorKind::TooManyHeaders));
        }
        self.entries.push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// First value of the named header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of the named header, in receipt order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `Content-Length` value, zero when absent or unparsable.
    pub fn content_length(&self) -> usize {
        self.get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Numeric part of `CSeq` (RTSP `CSeq: 3`, SIP `CSeq: 3 INVITE`).
    pub fn cseq(&self) -> Option<u32> {
        self.get("CSeq")?.split_whitespace().next()?.parse().ok()
    }
}

/// Offset immediately after the CRLF that ends the start line.
pub fn locate_headers(buffer: &[u8]) -> Result<usize> {
    find_crlf(buffer, 0)
        .map(|end| end + 2)
        .ok_or(Error::MalformedMessage)
}

/// Parse the header block that starts at `buffer[0]`.
///
/// Reading stops at the empty line. A trailing line without CRLF is not
/// treated as a header.
pub fn parse_headers(buffer: &[u8]) -> Result<HeaderList> {
    parse_header_block(buffer).map(|(headers, _)| headers)
}

/// Like [`parse_headers`], also returning the offset just past the
/// terminating empty line when one was found.
pub(crate) fn parse_header_block(buffer: &[u8]) -> Result<(HeaderList, Option<usize>)> {
    let mut headers = HeaderList::new();
    let mut pos = 0;
    let mut terminated = None;

    while let Some((line, next)) = next_logical_line(buffer, pos)? {
        pos = next;
        if line.is_empty() {
            terminated = Some(pos);
            break;
        }

        let text = String::from_utf8_lossy(&line);
        let (name, value) = text
            .split_once(':')
            .ok_or(Error::parse(ParseErrorKind::MalformedHeader))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::parse(ParseErrorKind::MalformedHeader));
        }
        headers.push(name, value.trim())?;
    }

    if headers.is_empty() {
        return Err(Error::NoHeaders);
    }
    Ok((headers, terminated))
}

/// One logical line starting at `start`, with folds collapsed to a single
/// space. Returns the line and the offset of the next line, or `None`
/// when no CRLF remains.
fn next_logical_line(buffer: &[u8], start: usize) -> Result<Option<(Vec<u8>, usize)>> {
    let mut line = Vec::new();
    let mut pos = start;

    loop {
        let Some(end) = find_crlf(buffer, pos) else {
            return Ok(None);
        };
        line.extend_from_slice(&buffer[pos..end]);
        if line.len() >= MAX_HEADER_LINE {
            return Err(Error::parse(ParseErrorKind::HeaderTooLong));
        }
        pos = end + 2;

        // an empty line is the terminator and never folds
        if !line.is_empty() && matches!(buffer.get(pos), Some(b' ' | b'\t')) {
            while matches!(buffer.get(pos), Some(b' ' | b'\t')) {
                pos += 1;
            }
            line.push(b' ');
            continue;
        }
        return Ok(Some((line, pos)));
    }
}

pub(crate) fn find_crlf(buffer: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| i + from)
}
