//! Text signaling shared by the RTSP (RFC 2326) and SIP (RFC 3261) legs.
//!
//! Both protocols use HTTP/1.1-style messages:
//!
//! ```text
//! RTSP/1.0 401 Unauthorized\r\n          ← start line
//! CSeq: 2\r\n                            ← header fields
//! WWW-Authenticate: Digest realm="cam", nonce="8a1f"\r\n
//! \r\n                                   ← terminator
//!                                        ← body (Content-Length bytes)
//! ```
//!
//! ## Layers
//!
//! | Module | Role |
//! |--------|------|
//! | [`headers`] | start-line boundary, bounded header list with folding |
//! | [`message`] | start-line parsing, whole-message framing over streams |
//! | [`request`] / [`response`] | outbound builders |
//! | [`sdp`] | session description decode and INVITE offer |
//!
//! Methods used by the RTSP leg: OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN.
//! Methods generated by the SIP leg: OPTIONS, INVITE, ACK, BYE; accepted
//! unsolicited: BYE, INFO, CANCEL.

pub mod headers;
pub mod message;
pub mod request;
pub mod response;
pub mod sdp;

pub use headers::{HeaderList, MAX_HEADER_LINE, MAX_HEADERS, locate_headers, parse_headers};
pub use message::{Message, MessageBuffer, StartLine};
pub use request::{Method, Request, USER_AGENT, Version};
pub use response::Response;
