//! WebAuthn (passkey) assertion verification.
//!
//! The user's device authorizes a payment by signing
//! `authenticatorData || SHA256(clientDataJSON)` with a previously registered
//! P-256 credential. Registration stores the credential's COSE public key
//! (EC2, map keys `-2` = x, `-3` = y) and its signature counter; every later
//! verification re-checks the ceremony type, the challenge, the relying-party
//! id hash, and that the counter never runs backwards.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use ap2_types::a2a::WebAuthnAssertion;

use crate::crypto::b64;
use crate::crypto::error::CryptoError;
use crate::crypto::signature;

/// The ceremony type clientDataJSON must declare for an assertion.
const CEREMONY_GET: &str = "webauthn.get";

/// Parsed prefix of WebAuthn authenticator data.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
}

/// Parses the fixed 37-byte prefix of authenticator data: 32-byte
/// `SHA256(rp_id)`, one flags byte, 4-byte big-endian signature counter.
pub fn parse_authenticator_data(bytes: &[u8]) -> Result<AuthenticatorData, CryptoError> {
    if bytes.len() < 37 {
        return Err(CryptoError::MalformedAttestation("authenticator data too short"));
    }
    let mut rp_id_hash = [0u8; 32];
    rp_id_hash.copy_from_slice(&bytes[..32]);
    let flags = bytes[32];
    let sign_count = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);
    Ok(AuthenticatorData {
        rp_id_hash,
        flags,
        sign_count,
    })
}

/// The EC JWK carried in the issuer JWT's `cnf` claim, converted from the
/// registered COSE key. Coordinates are base64url, no padding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
}

impl EcJwk {
    pub fn p256(x: &[u8], y: &[u8]) -> Self {
        Self {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: b64::encode(x),
            y: b64::encode(y),
        }
    }

    /// Reconstructs the P-256 verifying key from the JWK coordinates.
    pub fn to_verifying_key(&self) -> Result<p256::ecdsa::VerifyingKey, CryptoError> {
        if self.kty != "EC" || self.crv != "P-256" {
            return Err(CryptoError::MalformedAttestation("unsupported cnf.jwk"));
        }
        let x = b64::decode(&self.x).map_err(|_| CryptoError::MalformedAttestation("bad jwk x"))?;
        let y = b64::decode(&self.y).map_err(|_| CryptoError::MalformedAttestation("bad jwk y"))?;
        if x.len() != 32 || y.len() != 32 {
            return Err(CryptoError::MalformedAttestation("bad jwk coordinate length"));
        }
        let point = p256::EncodedPoint::from_affine_coordinates(
            p256::FieldBytes::from_slice(&x),
            p256::FieldBytes::from_slice(&y),
            false,
        );
        p256::ecdsa::VerifyingKey::from_encoded_point(&point)
            .map_err(|_| CryptoError::MalformedAttestation("point not on curve"))
    }
}

/// Decodes a COSE EC2 public key (CBOR map, `-2` = x, `-3` = y) into a JWK.
pub fn cose_key_to_jwk(cose: &[u8]) -> Result<EcJwk, CryptoError> {
    let value: ciborium::Value = ciborium::from_reader(cose)
        .map_err(|_| CryptoError::MalformedAttestation("COSE key is not CBOR"))?;
    let ciborium::Value::Map(entries) = value else {
        return Err(CryptoError::MalformedAttestation("COSE key is not a map"));
    };
    let mut x: Option<Vec<u8>> = None;
    let mut y: Option<Vec<u8>> = None;
    for (key, val) in entries {
        let ciborium::Value::Integer(label) = key else { continue };
        let label = i128::from(label);
        if let ciborium::Value::Bytes(bytes) = val {
            match label {
                -2 => x = Some(bytes),
                -3 => y = Some(bytes),
                _ => {}
            }
        }
    }
    match (x, y) {
        (Some(x), Some(y)) if x.len() == 32 && y.len() == 32 => Ok(EcJwk::p256(&x, &y)),
        _ => Err(CryptoError::MalformedAttestation("COSE key missing coordinates")),
    }
}

/// Encodes a P-256 verifying key in the COSE EC2 form authenticators register.
pub fn verifying_key_to_cose(key: &p256::ecdsa::VerifyingKey) -> Vec<u8> {
    let point = key.to_encoded_point(false);
    let entries = vec![
        (ciborium::Value::Integer(1.into()), ciborium::Value::Integer(2.into())),
        (ciborium::Value::Integer(3.into()), ciborium::Value::Integer((-7).into())),
        (ciborium::Value::Integer((-1).into()), ciborium::Value::Integer(1.into())),
        (
            ciborium::Value::Integer((-2).into()),
            ciborium::Value::Bytes(point.x().map(|x| x.to_vec()).unwrap_or_default()),
        ),
        (
            ciborium::Value::Integer((-3).into()),
            ciborium::Value::Bytes(point.y().map(|y| y.to_vec()).unwrap_or_default()),
        ),
    ];
    let mut out = Vec::new();
    // Writing a map of immediate values cannot fail.
    ciborium::into_writer(&ciborium::Value::Map(entries), &mut out).unwrap_or_default();
    out
}

#[derive(Debug, Deserialize)]
struct ClientData {
    #[serde(rename = "type")]
    ceremony: String,
    challenge: String,
}

/// Verifies a WebAuthn assertion end to end.
///
/// `stored_count` is the last counter this verifier accepted for the
/// credential (zero when unknown). Returns the assertion's counter for the
/// caller to persist.
pub fn verify_assertion(
    jwk: &EcJwk,
    assertion: &WebAuthnAssertion,
    expected_challenge: &str,
    rp_id: &str,
    stored_count: u32,
) -> Result<u32, CryptoError> {
    let client_data_bytes = b64::decode(&assertion.client_data_json)
        .map_err(|_| CryptoError::MalformedAttestation("bad clientDataJSON encoding"))?;
    let client_data: ClientData = serde_json::from_slice(&client_data_bytes)
        .map_err(|_| CryptoError::MalformedAttestation("bad clientDataJSON"))?;
    if client_data.ceremony != CEREMONY_GET {
        return Err(CryptoError::MalformedAttestation("wrong ceremony type"));
    }
    if !signature::ct_eq(client_data.challenge.as_bytes(), expected_challenge.as_bytes()) {
        return Err(CryptoError::ChallengeMismatch);
    }

    let auth_data_bytes = b64::decode(&assertion.authenticator_data)
        .map_err(|_| CryptoError::MalformedAttestation("bad authenticatorData encoding"))?;
    let auth_data = parse_authenticator_data(&auth_data_bytes)?;
    let expected_rp_hash: [u8; 32] = Sha256::digest(rp_id.as_bytes()).into();
    if !signature::ct_eq(&auth_data.rp_id_hash, &expected_rp_hash) {
        return Err(CryptoError::MalformedAttestation("rp id hash mismatch"));
    }
    if stored_count > 0 && auth_data.sign_count < stored_count {
        return Err(CryptoError::CounterRegression);
    }

    let signed = signed_input(&auth_data_bytes, &client_data_bytes);
    let verifying_key = jwk.to_verifying_key()?;
    let raw_signature = decode_assertion_signature(&assertion.signature)?;
    signature::verify_raw(
        &signed,
        &raw_signature,
        &crate::crypto::keys::PublicKey::P256(verifying_key),
    )?;
    Ok(auth_data.sign_count)
}

/// The byte string an authenticator actually signs.
pub fn signed_input(authenticator_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
    let mut signed = Vec::with_capacity(authenticator_data.len() + 32);
    signed.extend_from_slice(authenticator_data);
    signed.extend_from_slice(&Sha256::digest(client_data_json));
    signed
}

/// Authenticators emit DER ECDSA signatures; AP2 carries raw `R || S`
/// elsewhere, so accept both and normalize to raw.
pub fn decode_assertion_signature(signature_b64url: &str) -> Result<Vec<u8>, CryptoError> {
    let bytes =
        b64::decode(signature_b64url).map_err(|_| CryptoError::MalformedAttestation("bad signature encoding"))?;
    if let Ok(sig) = p256::ecdsa::Signature::from_der(&bytes) {
        return Ok(sig.to_bytes().to_vec());
    }
    if bytes.len() == 64 {
        return Ok(bytes);
    }
    Err(CryptoError::SignatureInvalid)
}

/// A software authenticator standing in for the out-of-scope front-end
/// passkey ceremony: it registers a P-256 credential and produces assertions
/// byte-compatible with platform passkeys. Demo drivers and end-to-end tests
/// use it; production deployments replace it with a real authenticator behind
/// the UI.
pub struct SoftwareAuthenticator {
    key: p256::ecdsa::SigningKey,
    sign_count: u32,
    rp_id: String,
}

impl SoftwareAuthenticator {
    pub fn new(rp_id: &str) -> Self {
        use rand::RngCore;
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        let key = loop {
            if let Ok(key) = p256::ecdsa::SigningKey::from_slice(&seed) {
                break key;
            }
            rand::rng().fill_bytes(&mut seed);
        };
        Self {
            key,
            sign_count: 0,
            rp_id: rp_id.to_string(),
        }
    }

    /// The registered credential public key in COSE EC2 form.
    pub fn cose_public_key(&self) -> Vec<u8> {
        verifying_key_to_cose(self.key.verifying_key())
    }

    pub fn jwk(&self) -> EcJwk {
        let point = self.key.verifying_key().to_encoded_point(false);
        EcJwk::p256(
            point.x().map(|x| x.as_slice()).unwrap_or_default(),
            point.y().map(|y| y.as_slice()).unwrap_or_default(),
        )
    }

    /// Performs one assertion ceremony, bumping the signature counter.
    pub fn assert(&mut self, challenge: &str) -> WebAuthnAssertion {
        self.sign_count += 1;
        self.assert_with_count(challenge, self.sign_count)
    }

    /// An assertion with an explicit counter value, for exercising counter
    /// regression handling.
    pub fn assert_with_count(&self, challenge: &str, count: u32) -> WebAuthnAssertion {
        use p256::ecdsa::signature::Signer;
        let client_data = serde_json::json!({
            "type": "webauthn.get",
            "challenge": challenge,
            "origin": format!("https://{}", self.rp_id),
        });
        let client_data_bytes = serde_json::to_vec(&client_data).unwrap_or_default();

        let mut auth_data = Vec::with_capacity(37);
        auth_data.extend_from_slice(&Sha256::digest(self.rp_id.as_bytes()));
        auth_data.push(0x01); // user present
        auth_data.extend_from_slice(&count.to_be_bytes());

        let signed = signed_input(&auth_data, &client_data_bytes);
        let signature: p256::ecdsa::Signature = self.key.sign(&signed);

        WebAuthnAssertion {
            credential_id: "cred_softauthn".to_string(),
            client_data_json: b64::encode(&client_data_bytes),
            authenticator_data: b64::encode(&auth_data),
            signature: b64::encode(signature.to_der().as_bytes()),
        }
    }
}
