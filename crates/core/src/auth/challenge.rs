//! `WWW-Authenticate` challenge parsing (RFC 7235 §4.1, RFC 2617 §1.2).
//!
//! A header value may hold several challenges and a response may carry
//! several `WWW-Authenticate` headers:
//!
//! ```text
//! WWW-Authenticate: Digest realm="cam", nonce="8a1f", Basic realm="cam"
//! WWW-Authenticate: Basic realm="cam"
//! ```
//!
//! Challenges are split heuristically: inside a parameter list, a token
//! not followed by `=` starts the next challenge.

use crate::error::{AuthFailure, Error, ParseErrorKind, Result};
use crate::protocol::{HeaderList, locate_headers, parse_headers};

/// Upper bound on parameters retained per challenge.
pub const MAX_AUTH_PARAMS: usize = 20;

/// Upper bound on the length of one key or value.
pub const MAX_TOKEN: usize = 512;

/// One `scheme + parameters` unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub params: Vec<(String, String)>,
}

impl Challenge {
    pub fn param(&self, key: &str) -> Option<&str> {
        param(&self.params, key)
    }
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Split off the scheme token. `rest` starts after the whitespace run.
pub fn parse_auth_scheme(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(|c: char| c.is_ascii_whitespace()) {
        Some(end) => (&text[..end], text[end..].trim_start()),
        None => (text, ""),
    }
}

/// True iff every character is alphanumeric or one of `+ / =`.
pub fn is_token68(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
}

/// Read `key=value` pairs until the text ends or a bare token begins the
/// next challenge.
///
/// Returns the parameters and, when another challenge follows, the text
/// starting at its scheme.
pub fn parse_auth_params(text: &str) -> Result<(Vec<(String, String)>, Option<&str>)> {
    let mut params = Vec::new();
    let mut pos = 0;

    loop {
        pos += text[pos..]
            .find(|c: char| !(c.is_ascii_whitespace() || c == ','))
            .unwrap_or(text.len() - pos);
        if pos == text.len() {
            return Ok((params, None));
        }

        let key_start = pos;
        pos += text[pos..]
            .find(|c: char| c == '=' || c == ',' || c.is_ascii_whitespace())
            .unwrap_or(text.len() - pos);
        if !text[pos..].starts_with('=') {
            return Ok((params, Some(&text[key_start..])));
        }
        let key = &text[key_start..pos];
        pos += 1;

        let value = if let Some(quoted) = text[pos..].strip_prefix('"') {
            let (value, consumed) = read_quoted(quoted);
            pos += 1 + consumed;
            value
        } else {
            let len = text[pos..].find(',').unwrap_or(text.len() - pos);
            let value = text[pos..pos + len].trim_end().to_string();
            pos += len;
            value
        };

        if key.len() >= MAX_TOKEN || value.len() >= MAX_TOKEN {
            return Err(Error::parse(ParseErrorKind::TokenTooLong));
        }
        if params.len() == MAX_AUTH_PARAMS {
            return Err(Error::parse(ParseErrorKind::TooManyAuthParams));
        }
        params.push((key.to_string(), value));
    }
}

/// Unquote up to the first unescaped `"`. Returns the value and the bytes
/// consumed, closing quote included.
fn read_quoted(text: &str) -> (String, usize) {
    let mut value = String::new();
    let mut chars = text.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    value.push(escaped);
                }
            }
            '"' => return (value, i + 1),
            _ => value.push(c),
        }
    }
    (value, text.len())
}

/// Split one header value into its challenges.
pub fn parse_challenges(value: &str) -> Result<Vec<Challenge>> {
    let mut challenges = Vec::new();
    let mut rest = value.trim();

    while !rest.is_empty() {
        let (scheme, after) = parse_auth_scheme(rest);
        let scheme = scheme.trim_end_matches(',').to_string();

        if after.is_empty() {
            challenges.push(Challenge {
                scheme,
                params: Vec::new(),
            });
            break;
        }
        // `=` only as trailing padding, otherwise `realm=abc` would qualify
        if is_token68(after) && !after.trim_end_matches('=').contains('=') {
            challenges.push(Challenge {
                scheme,
                params: vec![("token68".to_string(), after.to_string())],
            });
            break;
        }

        let (params, resume) = parse_auth_params(after)?;
        challenges.push(Challenge { scheme, params });
        match resume {
            Some(next) => rest = next,
            None => break,
        }
    }

    Ok(challenges)
}

/// Parameters of the first challenge with `scheme`, across every
/// `WWW-Authenticate` header.
pub fn find_in_headers(headers: &HeaderList, scheme: &str) -> Result<Vec<(String, String)>> {
    for value in headers.get_all("WWW-Authenticate") {
        let challenges = match parse_challenges(value) {
            Ok(challenges) => challenges,
            Err(e) => {
                tracing::warn!(error = %e, value, "skipping unparsable WWW-Authenticate");
                continue;
            }
        };
        if let Some(found) = challenges
            .into_iter()
            .find(|c| c.scheme.eq_ignore_ascii_case(scheme))
        {
            tracing::debug!(scheme, params = found.params.len(), "challenge found");
            return Ok(found.params);
        }
    }
    Err(Error::auth(AuthFailure::NoChallenge))
}

/// [`find_in_headers`] over a raw message.
pub fn find_challenges(message: &[u8], scheme: &str) -> Result<Vec<(String, String)>> {
    let start = locate_headers(message)?;
    let headers = parse_headers(&message[start..])?;
    find_in_headers(&headers, scheme)
}

/// A `Basic` challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicChallenge {
    pub realm: Option<String>,
}

impl BasicChallenge {
    pub fn find(headers: &HeaderList) -> Result<Self> {
        let params = find_in_headers(headers, "Basic")?;
        Ok(Self {
            realm: param(&params, "realm").map(str::to_string),
        })
    }
}

/// A `Digest` challenge; unrecognised parameters are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: Option<String>,
    pub nonce: Option<String>,
    pub nc: Option<String>,
    pub cnonce: Option<String>,
    pub qop: Option<String>,
    pub uri: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    pub fn find(headers: &HeaderList) -> Result<Self> {
        let params = find_in_headers(headers, "Digest")?;
        let get = |key: &str| param(&params, key).map(str::to_string);
        Ok(Self {
            realm: get("realm"),
            nonce: get("nonce"),
            nc: get("nc"),
            cnonce: get("cnonce"),
            qop: get("qop"),
            uri: get("uri"),
            opaque: get("opaque"),
            algorithm: get("algorithm"),
        })
    }
}

pub fn extract_basic(message: &[u8]) -> Result<BasicChallenge> {
    let start = locate_headers(message)?;
    BasicChallenge::find(&parse_headers(&message[start..])?)
}

pub fn extract_digest(message: &[u8]) -> Result<DigestChallenge> {
    let start = locate_headers(message)?;
    DigestChallenge::find(&parse_headers(&message[start..])?)
}
