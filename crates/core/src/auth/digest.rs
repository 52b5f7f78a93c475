//! RFC 2069 digest computation.
//!
//! ```text
//! HA1      = MD5(username:realm:password)
//! HA2      = MD5(method:uri)
//! response = MD5(HA1:nonce:HA2)
//! ```
//!
//! All hashes are lowercase hex.

use crate::error::{AuthFailure, Error, Result};

/// RFC 1321 §A.5 test suite entry.
const SELF_TEST_INPUT: &str = "abcdefghijklmnopqrstuvwxyz";
const SELF_TEST_DIGEST: &str = "c3fcd3d76192e4007dfb496cca67e13b";

pub fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Compute the `response` value. Fails with
/// [`AuthFailure::SelfTestFailed`] if MD5 does not reproduce the known
/// vector, so no unverified value is ever returned.
pub fn compute_digest_response(
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    uri: &str,
    method: &str,
) -> Result<String> {
    compute_with(md5_hex, username, password, realm, nonce, uri, method)
}

fn compute_with<H>(
    hash: H,
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    uri: &str,
    method: &str,
) -> Result<String>
where
    H: Fn(&str) -> String,
{
    if hash(SELF_TEST_INPUT) != SELF_TEST_DIGEST {
        tracing::error!("MD5 self-test failed, refusing to authenticate");
        return Err(Error::auth(AuthFailure::SelfTestFailed));
    }

    let ha1 = hash(&format!("{username}:{realm}:{password}"));
    let ha2 = hash(&format!("{method}:{uri}"));
    Ok(hash(&format!("{ha1}:{nonce}:{ha2}")))
}
