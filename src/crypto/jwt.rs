//! Merchant-authorization JWTs.
//!
//! The JWT a merchant attaches to a signed cart binds the cart's canonical
//! hash to the merchant's key for a bounded window:
//!
//! - header `{alg, typ: "JWT", kid: "<merchant-did>#key-1"}`
//! - payload `{iss, sub: iss, aud: "payment_processor", iat, exp: iat+3600,
//!   jti, cart_hash}` with `cart_hash` base64url-encoded
//! - signature over `b64url(header).b64url(payload)`, raw `R || S` for ES256
//!
//! Header and payload are serialized in canonical form before encoding so
//! independently-built JWTs over the same claims are byte-identical.
//! Verifiers recompute the cart hash from the presented CartMandate, enforce
//! expiry and audience, and consume `jti` at most once for the token's
//! remaining lifetime.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use ap2_types::a2a::SignatureAlgorithm;
use ap2_types::canonical;
use ap2_types::did::{Did, KeyRef};
use ap2_types::mandate::{self, CartMandate};
use ap2_types::timestamp::UnixTimestamp;

use crate::crypto::b64;
use crate::crypto::error::CryptoError;
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::signature;
use crate::store::TtlStore;

/// Audience every merchant-authorization JWT is addressed to.
pub const MERCHANT_JWT_AUDIENCE: &str = "payment_processor";
/// Merchant JWT lifetime.
pub const MERCHANT_JWT_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: SignatureAlgorithm,
    pub typ: String,
    pub kid: KeyRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantJwtClaims {
    pub iss: Did,
    pub sub: Did,
    pub aud: String,
    pub iat: UnixTimestamp,
    pub exp: UnixTimestamp,
    pub jti: String,
    /// Base64url SHA-256 of the canonical unsigned CartMandate.
    pub cart_hash: String,
}

/// Encodes one JWT segment: canonical JSON, then base64url.
fn encode_segment<T: Serialize>(value: &T) -> Result<String, CryptoError> {
    Ok(b64::encode(canonical::to_canonical_json(value)?))
}

/// Decodes one JWT segment into `T`.
fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, CryptoError> {
    let bytes = b64::decode(segment).map_err(|_| CryptoError::JwtMalformed("bad base64url"))?;
    serde_json::from_slice(&bytes).map_err(|_| CryptoError::JwtMalformed("bad JSON segment"))
}

/// Issues a merchant-authorization JWT over `cart_hash_b64url`.
pub fn issue_merchant_jwt(
    key: &PrivateKey,
    merchant: &Did,
    cart_hash_b64url: &str,
    now: UnixTimestamp,
) -> Result<String, CryptoError> {
    let kid = match key.algorithm() {
        SignatureAlgorithm::Es256 => merchant.key_1(),
        SignatureAlgorithm::EdDsa => merchant.key_2(),
    };
    let header = JwtHeader {
        alg: key.algorithm(),
        typ: "JWT".to_string(),
        kid,
    };
    let claims = MerchantJwtClaims {
        iss: merchant.clone(),
        sub: merchant.clone(),
        aud: MERCHANT_JWT_AUDIENCE.to_string(),
        iat: now,
        exp: now + MERCHANT_JWT_TTL_SECS,
        jti: uuid::Uuid::new_v4().to_string(),
        cart_hash: cart_hash_b64url.to_string(),
    };
    let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(&claims)?);
    let sig = signature::sign_raw(signing_input.as_bytes(), key);
    Ok(format!("{signing_input}.{}", b64::encode(sig)))
}

/// A parsed, not-yet-verified JWT.
pub struct ParsedJwt {
    pub header: JwtHeader,
    pub claims: MerchantJwtClaims,
    signing_input: String,
    signature: Vec<u8>,
}

pub fn parse_merchant_jwt(jwt: &str) -> Result<ParsedJwt, CryptoError> {
    let mut parts = jwt.split('.');
    let (header_b64, claims_b64, sig_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(c), Some(s), None) => (h, c, s),
        _ => return Err(CryptoError::JwtMalformed("expected 3 segments")),
    };
    let header: JwtHeader = decode_segment(header_b64)?;
    let claims: MerchantJwtClaims = decode_segment(claims_b64)?;
    let signature = b64::decode(sig_b64).map_err(|_| CryptoError::JwtMalformed("bad signature encoding"))?;
    if signature.len() != signature::raw_signature_len(header.alg) {
        return Err(CryptoError::JwtMalformed("bad signature length"));
    }
    Ok(ParsedJwt {
        header,
        claims,
        signing_input: format!("{header_b64}.{claims_b64}"),
        signature,
    })
}

/// Full verification of a merchant-authorization JWT against the CartMandate
/// it claims to sign.
///
/// Checks, in order: structural parse, recomputed cart hash, expiry,
/// audience, issuer/kid agreement, signature against the resolved key, and
/// one-shot `jti` consumption. The jti stays consumed for the token's
/// remaining lifetime.
pub fn verify_merchant_jwt(
    jwt: &str,
    cart: &CartMandate,
    public_key: &PublicKey,
    jti_seen: &TtlStore<()>,
    now: UnixTimestamp,
) -> Result<MerchantJwtClaims, CryptoError> {
    let parsed = parse_merchant_jwt(jwt)?;

    let expected = mandate::mandate_hash_b64url(cart)?;
    if !signature::ct_eq(parsed.claims.cart_hash.as_bytes(), expected.as_bytes()) {
        return Err(CryptoError::HashMismatch);
    }
    if parsed.claims.exp < now {
        return Err(CryptoError::JwtExpired);
    }
    if parsed.claims.aud != MERCHANT_JWT_AUDIENCE {
        return Err(CryptoError::JwtMalformed("unexpected audience"));
    }
    if parsed.header.kid.did != parsed.claims.iss || parsed.claims.iss != parsed.claims.sub {
        return Err(CryptoError::JwtMalformed("kid/iss/sub disagree"));
    }

    signature::verify_raw(parsed.signing_input.as_bytes(), &parsed.signature, public_key)?;

    let remaining = parsed.claims.exp.0.saturating_sub(now.0).max(1);
    if !jti_seen.insert_once(
        format!("jti:{}", parsed.claims.jti),
        (),
        Duration::from_secs(remaining),
    ) {
        return Err(CryptoError::JtiReplay);
    }
    Ok(parsed.claims)
}
