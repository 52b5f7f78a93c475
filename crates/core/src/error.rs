//! Error types for the RTSP/SIP session engine.

use std::fmt;

/// Errors that can occur while driving an RTSP or SIP leg.
///
/// Variants map to the failure modes of each layer:
///
/// - **Framing**: [`MalformedMessage`](Self::MalformedMessage),
///   [`Parse`](Self::Parse), [`NoHeaders`](Self::NoHeaders).
/// - **Content**: [`UnsupportedContentType`](Self::UnsupportedContentType).
/// - **Authentication**: [`AuthenticationFailed`](Self::AuthenticationFailed).
/// - **Session**: [`ProtocolViolation`](Self::ProtocolViolation),
///   [`Timeout`](Self::Timeout).
/// - **Transport**: [`Transport`](Self::Transport).
/// - **Configuration**: [`InvalidUri`](Self::InvalidUri).
///
/// Only a 401 on DESCRIBE, INVITE or BYE is recovered locally. Any other
/// error returned by a state machine ends the session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No CRLF terminating the start line.
    #[error("malformed message: no start line")]
    MalformedMessage,

    /// A start line, header block or authentication parameter list
    /// violated the wire grammar or one of the framer bounds.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The message carried no header fields at all.
    #[error("no headers found")]
    NoHeaders,

    /// A body arrived with a content type other than `application/sdp`.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// No usable challenge, a realm mismatch, missing credentials, or the
    /// MD5 self-test did not hold.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(AuthFailure),

    /// Unexpected status code or a response that does not fit the current state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Socket send/receive failure other than would-block.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The loop wait expired with nothing ready before playback started.
    #[error("timed out waiting for the peer")]
    Timeout,

    /// The target URI could not be parsed.
    #[error("invalid URI: {0}")]
    InvalidUri(String),
}

/// Specific kind of framing or token parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A header line did not contain a colon separator.
    MalformedHeader,
    /// A header line exceeded [`MAX_HEADER_LINE`](crate::protocol::MAX_HEADER_LINE).
    HeaderTooLong,
    /// More than [`MAX_HEADERS`](crate::protocol::MAX_HEADERS) header fields.
    TooManyHeaders,
    /// Start line was neither `<version> <code> <reason>` nor `<method> <uri> <version>`.
    InvalidStartLine,
    /// Fewer body bytes than `Content-Length` announced.
    IncompleteBody,
    /// An authentication key or value exceeded the token bound.
    TokenTooLong,
    /// A challenge carried more parameters than the parser retains.
    TooManyAuthParams,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedHeader => write!(f, "header line without colon"),
            Self::HeaderTooLong => write!(f, "header line too long"),
            Self::TooManyHeaders => write!(f, "too many headers"),
            Self::InvalidStartLine => write!(f, "invalid start line"),
            Self::IncompleteBody => write!(f, "body shorter than Content-Length"),
            Self::TokenTooLong => write!(f, "authentication token too long"),
            Self::TooManyAuthParams => write!(f, "too many authentication parameters"),
        }
    }
}

/// Why an authentication attempt could not proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// No `WWW-Authenticate` challenge with a usable scheme.
    NoChallenge,
    /// Every discovered scheme was already tried once.
    RetriesExhausted,
    /// The challenge realm differs from the configured realm.
    RealmMismatch { configured: String, received: String },
    /// The challenge lacked a parameter required to compute a response.
    MissingParameter(&'static str),
    /// The target carried no username/password.
    MissingCredentials,
    /// The peer offered only a scheme this leg cannot answer.
    UnsupportedScheme(String),
    /// MD5 did not reproduce the known test vector.
    SelfTestFailed,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoChallenge => write!(f, "no matching challenge"),
            Self::RetriesExhausted => write!(f, "retries exhausted"),
            Self::RealmMismatch {
                configured,
                received,
            } => write!(f, "realm mismatch (configured {configured:?}, received {received:?})"),
            Self::MissingParameter(name) => write!(f, "challenge without {name}"),
            Self::MissingCredentials => write!(f, "no credentials configured"),
            Self::UnsupportedScheme(scheme) => write!(f, "unsupported scheme {scheme}"),
            Self::SelfTestFailed => write!(f, "MD5 self-test failed"),
        }
    }
}

impl Error {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }

    pub(crate) fn auth(reason: AuthFailure) -> Self {
        Self::AuthenticationFailed(reason)
    }

    pub(crate) fn violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
