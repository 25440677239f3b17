//! Upload request signing using HMAC-SHA256.
//!
//! Wire protocol: `PUT {endpoint}?mac={signature}` where the body is the raw
//! bytes of the queued item and
//! `signature = base64std(HMAC-SHA256(key, body))`.
//!
//! Normalization: the client always form-encodes the `mac` value, so `+`
//! travels as `%2B` and a conforming collector decodes the exact signature.
//! Some transports still turn `+` into a space, so [`verify`] maps every
//! whitespace character back to `+` before decoding. Collectors must apply
//! the same rule.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Name of the query parameter carrying the signature
pub const SIGNATURE_PARAM: &str = "mac";

fn mac_for(body: &[u8], key: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(body);
    mac
}

/// Computes the base64 HMAC-SHA256 signature of a body
pub fn sign(body: &[u8], key: &[u8]) -> String {
    STANDARD.encode(mac_for(body, key).finalize().into_bytes())
}

/// The URL an item is uploaded to.
///
/// With a key, `mac={signature}` is appended to the endpoint's existing query;
/// without one the endpoint is used unchanged.
pub fn signed_url(endpoint: &Url, body: &[u8], key: Option<&[u8]>) -> Url {
    let mut url = endpoint.clone();
    if let Some(key) = key {
        url.query_pairs_mut()
            .append_pair(SIGNATURE_PARAM, &sign(body, key));
    }
    url
}

/// Undo a transport that decoded `+` as a space
pub fn normalize_signature(signature: &str) -> String {
    signature
        .chars()
        .map(|c| if c.is_whitespace() { '+' } else { c })
        .collect()
}

/// Verifies a `mac` query value against the body and key.
///
/// Returns `false` for malformed values; uses constant-time comparison.
///
/// # Examples
///
/// ```
/// use logship::upload::signing::{sign, verify};
///
/// let body = b"This is some data from the disk";
/// let signature = sign(body, b"Hello World");
///
/// assert!(verify(body, &signature, b"Hello World"));
/// assert!(verify(body, &signature.replace('+', " "), b"Hello World"));
/// assert!(!verify(body, &signature, b"wrong key"));
/// ```
pub fn verify(body: &[u8], signature: &str, key: &[u8]) -> bool {
    let expected = match STANDARD.decode(normalize_signature(signature.trim())) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    mac_for(body, key).verify_slice(&expected).is_ok()
}
