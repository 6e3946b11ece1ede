//! Detached signing and verification over canonical bytes.
//!
//! ECDSA P-256 signatures are always the raw `R || S` fixed encoding (64
//! bytes), never DER — the JWS convention — and Ed25519 signatures are the
//! standard 64-byte form. Hash and digest comparisons go through
//! constant-time equality.

use ap2_types::a2a::{Proof, SignatureAlgorithm};
use ap2_types::did::KeyRef;
use subtle::ConstantTimeEq;

use crate::crypto::b64;
use crate::crypto::error::CryptoError;
use crate::crypto::keys::{PrivateKey, PublicKey};

/// Signs `data` with `key`, producing the detached [`Proof`] shape used for
/// A2A envelopes. `key_id` names the verification method the receiver should
/// resolve.
pub fn sign_detached(data: &[u8], key: &PrivateKey, key_id: KeyRef) -> Result<Proof, CryptoError> {
    let value = b64::encode(sign_raw(data, key));
    let public_key_multibase = multibase_spki(&key.public_key())?;
    Ok(Proof {
        algorithm: key.algorithm(),
        key_id,
        public_key_multibase,
        value,
    })
}

/// The raw signature bytes for `data`: `R || S` for P-256, 64 bytes for
/// Ed25519. P-256 signing is deterministic (RFC 6979).
pub fn sign_raw(data: &[u8], key: &PrivateKey) -> Vec<u8> {
    match key {
        PrivateKey::P256(signing_key) => {
            use p256::ecdsa::signature::Signer;
            let signature: p256::ecdsa::Signature = signing_key.sign(data);
            signature.to_bytes().to_vec()
        }
        PrivateKey::Ed25519(signing_key) => {
            use ed25519_dalek::Signer;
            signing_key.sign(data).to_bytes().to_vec()
        }
    }
}

/// Verifies raw signature bytes against `public_key`. The algorithm is
/// implied by the key; a signature of the wrong shape fails closed.
pub fn verify_raw(data: &[u8], signature: &[u8], public_key: &PublicKey) -> Result<(), CryptoError> {
    match public_key {
        PublicKey::P256(verifying_key) => {
            use p256::ecdsa::signature::Verifier;
            let signature = p256::ecdsa::Signature::from_slice(signature)
                .map_err(|_| CryptoError::SignatureInvalid)?;
            verifying_key
                .verify(data, &signature)
                .map_err(|_| CryptoError::SignatureInvalid)
        }
        PublicKey::Ed25519(verifying_key) => {
            use ed25519_dalek::Verifier;
            let signature = ed25519_dalek::Signature::from_slice(signature)
                .map_err(|_| CryptoError::SignatureInvalid)?;
            verifying_key
                .verify(data, &signature)
                .map_err(|_| CryptoError::SignatureInvalid)
        }
    }
}

/// Verifies a detached [`Proof`] against `data` using `public_key` (resolved
/// by the caller through the sender's DID, not taken from the proof).
pub fn verify_detached(
    data: &[u8],
    proof: &Proof,
    public_key: &PublicKey,
) -> Result<(), CryptoError> {
    if proof.algorithm != public_key.algorithm() {
        return Err(CryptoError::AlgorithmMismatch);
    }
    let signature = b64::decode(&proof.value).map_err(|_| CryptoError::SignatureInvalid)?;
    verify_raw(data, &signature, public_key)
}

/// Constant-time equality for hashes and other fixed digests.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Multibase encoding of an SPKI public key: `u` prefix + base64url.
pub fn multibase_spki(key: &PublicKey) -> Result<String, CryptoError> {
    Ok(format!("u{}", b64::encode(key.to_spki_der()?)))
}

/// Expected signature length for an algorithm, used by boundary validation.
pub fn raw_signature_len(algorithm: SignatureAlgorithm) -> usize {
    match algorithm {
        SignatureAlgorithm::Es256 => 64,
        SignatureAlgorithm::EdDsa => 64,
    }
}
