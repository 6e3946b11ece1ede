//! User-authorization SD-JWT+KB credentials.
//!
//! The `user_authorization` attached to a PaymentMandate is the two-part
//! `<issuer-jwt>~<kb-jwt>~` SD-JWT-VC profile with no selective disclosures:
//!
//! - The **issuer JWT** is signed by the credential provider with the user's
//!   custodial identity key (`kid` = the bare user DID) and carries the
//!   device's registered WebAuthn public key as `cnf.jwk`. Short-lived:
//!   `exp = iat + 300`.
//! - The **key-binding JWT** carries `{aud, nonce, iat, sd_hash,
//!   transaction_data: [cart_hash, payment_hash]}`. Its signature segment is
//!   the WebAuthn assertion signature over
//!   `authenticatorData || SHA256(clientDataJSON)` — the device key never
//!   signs JOSE input directly, so the assertion travels alongside the
//!   mandate and the verifier reconstructs the signed bytes itself. The
//!   assertion's challenge is the KB nonce, which is what binds ceremony to
//!   transaction.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use ap2_types::a2a::{SignatureAlgorithm, WebAuthnAssertion};
use ap2_types::canonical;
use ap2_types::did::Did;
use ap2_types::timestamp::UnixTimestamp;

use crate::crypto::b64;
use crate::crypto::error::CryptoError;
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::signature;
use crate::crypto::webauthn::{self, EcJwk};

/// Audience of every key-binding JWT.
pub const USER_AUTHORIZATION_AUDIENCE: &str = "did:ap2:agent:payment_processor";
/// Issuer JWT lifetime.
pub const ISSUER_JWT_TTL_SECS: u64 = 300;
/// Acceptance window for the KB JWT `iat`.
pub const KB_IAT_TOLERANCE_SECS: u64 = 300;

/// Header for both SD-JWT parts. Unlike the merchant JWT, `kid` is the bare
/// user DID without a fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdJwtHeader {
    pub alg: SignatureAlgorithm,
    pub typ: String,
    pub kid: Did,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cnf {
    pub jwk: EcJwk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerClaims {
    pub iss: Did,
    pub sub: Did,
    pub iat: UnixTimestamp,
    pub exp: UnixTimestamp,
    pub nbf: UnixTimestamp,
    pub cnf: Cnf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbClaims {
    pub aud: String,
    /// 32 bytes of urlsafe randomness; doubles as the WebAuthn challenge.
    pub nonce: String,
    pub iat: UnixTimestamp,
    /// Base64url SHA-256 of the issuer JWT string.
    pub sd_hash: String,
    /// `[cart_hash, payment_hash]`, both base64url.
    pub transaction_data: Vec<String>,
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, CryptoError> {
    Ok(b64::encode(canonical::to_canonical_json(value)?))
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, CryptoError> {
    let bytes = b64::decode(segment).map_err(|_| CryptoError::JwtMalformed("bad base64url"))?;
    serde_json::from_slice(&bytes).map_err(|_| CryptoError::JwtMalformed("bad JSON segment"))
}

/// Issues the issuer-signed JWT vouching for the user's device key.
///
/// Called by the credential provider, which custodies the user's identity
/// key; `device_jwk` is the COSE-registered passkey public key in JWK form.
pub fn issue_issuer_jwt(
    user_key: &PrivateKey,
    user: &Did,
    device_jwk: EcJwk,
    now: UnixTimestamp,
) -> Result<String, CryptoError> {
    let header = SdJwtHeader {
        alg: user_key.algorithm(),
        typ: "JWT".to_string(),
        kid: user.clone(),
    };
    let claims = IssuerClaims {
        iss: user.clone(),
        sub: user.clone(),
        iat: now,
        exp: now + ISSUER_JWT_TTL_SECS,
        nbf: now,
        cnf: Cnf { jwk: device_jwk },
    };
    let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(&claims)?);
    let sig = signature::sign_raw(signing_input.as_bytes(), user_key);
    Ok(format!("{signing_input}.{}", b64::encode(sig)))
}

/// Assembles the complete `<issuer-jwt>~<kb-jwt>~` user authorization.
///
/// The KB signature segment is the (raw-normalized) WebAuthn assertion
/// signature; `assertion` must have been produced with the KB `nonce` as its
/// challenge.
pub fn assemble_user_authorization(
    issuer_jwt: &str,
    user: &Did,
    assertion: &WebAuthnAssertion,
    cart_hash_b64url: &str,
    payment_hash_b64url: &str,
    nonce: &str,
    now: UnixTimestamp,
) -> Result<String, CryptoError> {
    let header = SdJwtHeader {
        alg: SignatureAlgorithm::Es256,
        typ: "kb+jwt".to_string(),
        kid: user.clone(),
    };
    let claims = KbClaims {
        aud: USER_AUTHORIZATION_AUDIENCE.to_string(),
        nonce: nonce.to_string(),
        iat: now,
        sd_hash: b64::encode(Sha256::digest(issuer_jwt.as_bytes())),
        transaction_data: vec![cart_hash_b64url.to_string(), payment_hash_b64url.to_string()],
    };
    let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(&claims)?);
    let kb_signature = webauthn::decode_assertion_signature(&assertion.signature)?;
    Ok(format!(
        "{issuer_jwt}~{signing_input}.{}~",
        b64::encode(kb_signature)
    ))
}

/// Everything a verifier learns from a valid user authorization.
pub struct VerifiedUserAuthorization {
    pub issuer: IssuerClaims,
    pub kb: KbClaims,
    /// The assertion's signature counter, for the caller to persist.
    pub sign_count: u32,
}

/// Verifies a user authorization against locally recomputed hashes.
///
/// Checks the SD-JWT structure, KB audience and `iat` freshness,
/// `transaction_data` against `expected_cart_hash`/`expected_payment_hash`,
/// `sd_hash` against the issuer JWT, the issuer JWT's validity window and
/// signature (against `issuer_key`, resolved through the user's DID), and
/// finally the WebAuthn assertion against the `cnf.jwk` with the KB nonce as
/// the expected challenge. Nonce consumption is the caller's replay store.
#[allow(clippy::too_many_arguments)]
pub fn verify_user_authorization(
    user_authorization: &str,
    assertion: &WebAuthnAssertion,
    expected_cart_hash: &str,
    expected_payment_hash: &str,
    issuer_key: &PublicKey,
    rp_id: &str,
    stored_count: u32,
    now: UnixTimestamp,
) -> Result<VerifiedUserAuthorization, CryptoError> {
    let mut parts = user_authorization.split('~');
    let (issuer_jwt, kb_jwt) = match (parts.next(), parts.next()) {
        (Some(issuer), Some(kb)) if !issuer.is_empty() && !kb.is_empty() => (issuer, kb),
        _ => return Err(CryptoError::JwtMalformed("expected <issuer>~<kb>~")),
    };

    // Key-binding JWT first: cheap structural checks before any crypto.
    let mut kb_parts = kb_jwt.split('.');
    let (kb_header_b64, kb_claims_b64, kb_sig_b64) =
        match (kb_parts.next(), kb_parts.next(), kb_parts.next(), kb_parts.next()) {
            (Some(h), Some(c), Some(s), None) => (h, c, s),
            _ => return Err(CryptoError::JwtMalformed("KB JWT needs 3 segments")),
        };
    let kb_header: SdJwtHeader = decode_segment(kb_header_b64)?;
    if kb_header.typ != "kb+jwt" {
        return Err(CryptoError::JwtMalformed("KB typ must be kb+jwt"));
    }
    let kb: KbClaims = decode_segment(kb_claims_b64)?;
    if kb.aud != USER_AUTHORIZATION_AUDIENCE {
        return Err(CryptoError::JwtMalformed("unexpected audience"));
    }
    if !kb.iat.within_tolerance(now, KB_IAT_TOLERANCE_SECS) {
        return Err(CryptoError::JwtExpired);
    }

    // Transaction binding: the mandate hashes must match what we computed.
    match kb.transaction_data.as_slice() {
        [cart, payment] => {
            if !signature::ct_eq(cart.as_bytes(), expected_cart_hash.as_bytes())
                || !signature::ct_eq(payment.as_bytes(), expected_payment_hash.as_bytes())
            {
                return Err(CryptoError::HashMismatch);
            }
        }
        _ => return Err(CryptoError::JwtMalformed("transaction_data must be [cart, payment]")),
    }

    let expected_sd_hash = b64::encode(Sha256::digest(issuer_jwt.as_bytes()));
    if !signature::ct_eq(kb.sd_hash.as_bytes(), expected_sd_hash.as_bytes()) {
        return Err(CryptoError::HashMismatch);
    }

    // Issuer JWT: validity window, cnf extraction, issuer signature.
    let mut issuer_parts = issuer_jwt.split('.');
    let (issuer_header_b64, issuer_claims_b64, issuer_sig_b64) =
        match (issuer_parts.next(), issuer_parts.next(), issuer_parts.next(), issuer_parts.next()) {
            (Some(h), Some(c), Some(s), None) => (h, c, s),
            _ => return Err(CryptoError::JwtMalformed("issuer JWT needs 3 segments")),
        };
    let _issuer_header: SdJwtHeader = decode_segment(issuer_header_b64)?;
    let issuer: IssuerClaims = decode_segment(issuer_claims_b64)?;
    if issuer.exp < now {
        return Err(CryptoError::JwtExpired);
    }
    if now < issuer.nbf {
        return Err(CryptoError::JwtExpired);
    }
    let issuer_sig =
        b64::decode(issuer_sig_b64).map_err(|_| CryptoError::JwtMalformed("bad signature encoding"))?;
    let issuer_signing_input = format!("{issuer_header_b64}.{issuer_claims_b64}");
    signature::verify_raw(issuer_signing_input.as_bytes(), &issuer_sig, issuer_key)?;

    // The KB signature segment and the carried assertion must agree, then the
    // assertion itself must verify against the registered device key with the
    // KB nonce as the pre-issued challenge.
    let kb_sig = b64::decode(kb_sig_b64).map_err(|_| CryptoError::JwtMalformed("bad signature encoding"))?;
    let assertion_sig = webauthn::decode_assertion_signature(&assertion.signature)?;
    if !signature::ct_eq(&kb_sig, &assertion_sig) {
        return Err(CryptoError::SignatureInvalid);
    }
    let sign_count = webauthn::verify_assertion(
        &issuer.cnf.jwk,
        assertion,
        &kb.nonce,
        rp_id,
        stored_count,
    )?;

    Ok(VerifiedUserAuthorization {
        issuer,
        kb,
        sign_count,
    })
}

/// A fresh 32-byte urlsafe nonce for the KB JWT / WebAuthn challenge.
pub fn new_nonce() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    b64::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::webauthn::SoftwareAuthenticator;

    const RP_ID: &str = "ap2.example";

    struct Fixture {
        user: Did,
        user_key: PrivateKey,
        authenticator: SoftwareAuthenticator,
        cart_hash: String,
        payment_hash: String,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                user: Did::user("hanako"),
                user_key: PrivateKey::generate(SignatureAlgorithm::Es256),
                authenticator: SoftwareAuthenticator::new(RP_ID),
                cart_hash: b64::encode([1u8; 32]),
                payment_hash: b64::encode([2u8; 32]),
            }
        }

        fn build(&mut self, nonce: &str) -> (String, WebAuthnAssertion) {
            let now = UnixTimestamp::try_now().unwrap();
            let issuer_jwt =
                issue_issuer_jwt(&self.user_key, &self.user, self.authenticator.jwk(), now)
                    .unwrap();
            let assertion = self.authenticator.assert(nonce);
            let authorization = assemble_user_authorization(
                &issuer_jwt,
                &self.user,
                &assertion,
                &self.cart_hash,
                &self.payment_hash,
                nonce,
                now,
            )
            .unwrap();
            (authorization, assertion)
        }
    }

    #[test]
    fn test_assemble_verify_roundtrip() {
        let mut fixture = Fixture::new();
        let nonce = new_nonce();
        let (authorization, assertion) = fixture.build(&nonce);
        assert!(authorization.ends_with('~'));

        let verified = verify_user_authorization(
            &authorization,
            &assertion,
            &fixture.cart_hash,
            &fixture.payment_hash,
            &fixture.user_key.public_key(),
            RP_ID,
            0,
            UnixTimestamp::try_now().unwrap(),
        )
        .unwrap();
        // P2: transaction_data is exactly [cart_hash, payment_hash].
        assert_eq!(
            verified.kb.transaction_data,
            vec![fixture.cart_hash.clone(), fixture.payment_hash.clone()]
        );
        assert_eq!(verified.sign_count, 1);
        assert_eq!(verified.issuer.iss, fixture.user);
    }

    #[test]
    fn test_wrong_cart_hash_rejected() {
        let mut fixture = Fixture::new();
        let nonce = new_nonce();
        let (authorization, assertion) = fixture.build(&nonce);
        let result = verify_user_authorization(
            &authorization,
            &assertion,
            &b64::encode([9u8; 32]),
            &fixture.payment_hash,
            &fixture.user_key.public_key(),
            RP_ID,
            0,
            UnixTimestamp::try_now().unwrap(),
        );
        assert!(matches!(result, Err(CryptoError::HashMismatch)));
    }

    #[test]
    fn test_swapped_assertion_rejected() {
        // An assertion from a different ceremony must not satisfy the KB JWT.
        let mut fixture = Fixture::new();
        let nonce = new_nonce();
        let (authorization, _assertion) = fixture.build(&nonce);
        let foreign = fixture.authenticator.assert(&new_nonce());
        let result = verify_user_authorization(
            &authorization,
            &foreign,
            &fixture.cart_hash,
            &fixture.payment_hash,
            &fixture.user_key.public_key(),
            RP_ID,
            0,
            UnixTimestamp::try_now().unwrap(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_tampered_sd_hash_rejected() {
        let mut fixture = Fixture::new();
        let nonce = new_nonce();
        let (authorization, assertion) = fixture.build(&nonce);
        // Graft the KB JWT onto a different issuer JWT.
        let other_issuer = issue_issuer_jwt(
            &fixture.user_key,
            &fixture.user,
            fixture.authenticator.jwk(),
            UnixTimestamp::try_now().unwrap() + 1,
        )
        .unwrap();
        let kb = authorization.split('~').nth(1).unwrap();
        let grafted = format!("{other_issuer}~{kb}~");
        let result = verify_user_authorization(
            &grafted,
            &assertion,
            &fixture.cart_hash,
            &fixture.payment_hash,
            &fixture.user_key.public_key(),
            RP_ID,
            0,
            UnixTimestamp::try_now().unwrap(),
        );
        assert!(matches!(result, Err(CryptoError::HashMismatch)));
    }

    #[test]
    fn test_counter_regression_propagates() {
        let mut fixture = Fixture::new();
        let nonce = new_nonce();
        let (authorization, assertion) = fixture.build(&nonce);
        let result = verify_user_authorization(
            &authorization,
            &assertion,
            &fixture.cart_hash,
            &fixture.payment_hash,
            &fixture.user_key.public_key(),
            RP_ID,
            10,
            UnixTimestamp::try_now().unwrap(),
        );
        assert!(matches!(result, Err(CryptoError::CounterRegression)));
    }

    #[test]
    fn test_stale_kb_iat_rejected() {
        let mut fixture = Fixture::new();
        let nonce = new_nonce();
        let now = UnixTimestamp::try_now().unwrap();
        let issuer_jwt =
            issue_issuer_jwt(&fixture.user_key, &fixture.user, fixture.authenticator.jwk(), now)
                .unwrap();
        let assertion = fixture.authenticator.assert(&nonce);
        let stale = UnixTimestamp(now.0 - 2 * KB_IAT_TOLERANCE_SECS);
        let authorization = assemble_user_authorization(
            &issuer_jwt,
            &fixture.user,
            &assertion,
            &fixture.cart_hash,
            &fixture.payment_hash,
            &nonce,
            stale,
        )
        .unwrap();
        let result = verify_user_authorization(
            &authorization,
            &assertion,
            &fixture.cart_hash,
            &fixture.payment_hash,
            &fixture.user_key.public_key(),
            RP_ID,
            0,
            now,
        );
        assert!(matches!(result, Err(CryptoError::JwtExpired)));
    }

    #[test]
    fn test_nonce_is_urlsafe_32_bytes() {
        let nonce = new_nonce();
        assert_eq!(b64::decode(&nonce).unwrap().len(), 32);
    }
}
