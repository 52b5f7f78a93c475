//! HTTP-style authentication for both legs.
//!
//! On a 401 the state machines look for a `Basic` challenge first, then
//! `Digest` ([`challenge`]), compute the response ([`digest`]) and cache
//! the resulting `Authorization` value for every later request.
//!
//! | Scheme | RTSP | SIP |
//! |--------|------|-----|
//! | Basic (RFC 7617) | yes | reported unsupported |
//! | Digest (RFC 2069) | yes | yes, realm must match the configured one |

pub mod challenge;
pub mod digest;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{AuthFailure, Error, Result};
pub use challenge::{
    BasicChallenge, Challenge, DigestChallenge, extract_basic, extract_digest, find_challenges,
    is_token68, parse_auth_params, parse_auth_scheme, parse_challenges,
};
pub use digest::compute_digest_response;

/// Username and password taken from the target URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Which leg a header is serialized for. The two differ in how the
/// optional trailing digest fields are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `, cnonce="v"`
    Rtsp,
    /// `,cnonce"v"`, kept byte-for-byte for devices that expect it.
    Sip,
}

/// `Basic base64(user:pass)`.
pub fn basic_authorization(credentials: &Credentials) -> String {
    let token = STANDARD.encode(format!("{}:{}", credentials.username, credentials.password));
    format!("Basic {}", token)
}

/// Build a `Digest` `Authorization` value for `method uri`.
///
/// When `configured_realm` is given it must equal the challenge realm;
/// a mismatch fails before any hash is computed.
pub fn digest_authorization(
    dialect: Dialect,
    credentials: &Credentials,
    challenge: &DigestChallenge,
    method: &str,
    uri: &str,
    configured_realm: Option<&str>,
) -> Result<String> {
    let realm = challenge
        .realm
        .as_deref()
        .ok_or(Error::auth(AuthFailure::MissingParameter("realm")))?;
    let nonce = challenge
        .nonce
        .as_deref()
        .ok_or(Error::auth(AuthFailure::MissingParameter("nonce")))?;

    if let Some(configured) = configured_realm {
        if configured != realm {
            tracing::warn!(configured, received = realm, "digest realm mismatch");
            return Err(Error::auth(AuthFailure::RealmMismatch {
                configured: configured.to_string(),
                received: realm.to_string(),
            }));
        }
    }

    let response = compute_digest_response(
        &credentials.username,
        &credentials.password,
        realm,
        nonce,
        uri,
        method,
    )?;

    let mut value = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm=MD5",
        credentials.username, realm, nonce, uri, response
    );
    let trailing = [
        ("cnonce", &challenge.cnonce),
        ("qop", &challenge.qop),
        ("nc", &challenge.nc),
    ];
    for (name, field) in trailing {
        if let Some(field) = field {
            match dialect {
                Dialect::Rtsp => value.push_str(&format!(", {}=\"{}\"", name, field)),
                Dialect::Sip => value.push_str(&format!(",{}\"{}\"", name, field)),
            }
        }
    }

    tracing::debug!(?dialect, method, uri, "digest authorization computed");
    Ok(value)
}
