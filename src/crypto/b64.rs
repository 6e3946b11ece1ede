//! Base64url (no padding) helpers, the only byte encoding AP2 puts on the
//! wire for signatures, hashes, JWT segments, and WebAuthn material.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as b64url;

/// Encode raw bytes as base64url without padding.
pub fn encode<T: AsRef<[u8]>>(input: T) -> String {
    b64url.encode(input.as_ref())
}

/// Decode a base64url string (padding rejected, per the JWS convention).
pub fn decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    b64url.decode(input)
}
