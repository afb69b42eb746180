//! RPC-style request signing for the ECS query API.
//!
//! Every request is a GET whose parameters are sorted, percent-encoded, and
//! signed with HMAC-SHA1 under the account secret. The encoding alphabet is
//! stricter than regular URL encoding: only ASCII alphanumerics and
//! `-`, `_`, `.`, `~` pass through.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha1::Sha1;

use crate::provider::ProviderError;

const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encodes one parameter name or value with the signing alphabet.
pub(super) fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ENCODE).to_string()
}

/// Builds the canonical query string: parameters sorted by name, names and
/// values individually encoded, pairs joined with `&`.
pub(super) fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_unstable_by(|a, b| a.cmp(b));
    let pairs: Vec<String> = sorted
        .iter()
        .map(|(name, value)| format!("{}={}", percent_encode(name), percent_encode(value)))
        .collect();
    pairs.join("&")
}

/// Signs a canonical query: HMAC-SHA1 over `GET&%2F&<encoded query>` keyed
/// with the secret plus a trailing `&`, base64-encoded.
pub(super) fn signature(secret: &str, canonical: &str) -> Result<String, ProviderError> {
    let string_to_sign = format!("GET&%2F&{}", percent_encode(canonical));
    let key = format!("{secret}&");
    let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
        .map_err(|err| ProviderError::Validation(format!("signing key rejected: {err}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}
