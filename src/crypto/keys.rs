//! Signing key pairs for AP2 identities.
//!
//! Two algorithms cover every signature in the protocol: ECDSA P-256 (JWT
//! `alg=ES256`) and Ed25519 (`alg=EdDSA`). Each service holds one long-lived
//! key pair per identity; key material crosses process boundaries only as
//! PKCS#8 / SPKI PEM.

use ap2_types::a2a::SignatureAlgorithm;

use crate::crypto::error::CryptoError;

/// A private signing key of either supported algorithm.
pub enum PrivateKey {
    P256(p256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

/// A public verification key of either supported algorithm.
#[derive(Clone)]
pub enum PublicKey {
    P256(p256::ecdsa::VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PrivateKey {
    /// Generates a fresh key pair for `algorithm` from OS randomness.
    pub fn generate(algorithm: SignatureAlgorithm) -> Self {
        use rand::RngCore;
        let mut rng = rand::rng();
        match algorithm {
            SignatureAlgorithm::Es256 => loop {
                // A 32-byte string falls outside the P-256 scalar field with
                // probability ~2^-32; redraw on that.
                let mut seed = [0u8; 32];
                rng.fill_bytes(&mut seed);
                if let Ok(key) = p256::ecdsa::SigningKey::from_slice(&seed) {
                    return PrivateKey::P256(key);
                }
            },
            SignatureAlgorithm::EdDsa => {
                let mut seed = [0u8; 32];
                rng.fill_bytes(&mut seed);
                PrivateKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&seed))
            }
        }
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            PrivateKey::P256(_) => SignatureAlgorithm::Es256,
            PrivateKey::Ed25519(_) => SignatureAlgorithm::EdDsa,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::P256(key) => PublicKey::P256(*key.verifying_key()),
            PrivateKey::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
        }
    }

    /// PKCS#8 PEM encoding of the private key.
    pub fn to_pkcs8_pem(&self) -> Result<String, CryptoError> {
        match self {
            PrivateKey::P256(key) => {
                use p256::pkcs8::EncodePrivateKey;
                let pem = key
                    .to_pkcs8_pem(p256::pkcs8::LineEnding::LF)
                    .map_err(|_| CryptoError::AlgorithmMismatch)?;
                Ok(pem.to_string())
            }
            PrivateKey::Ed25519(key) => {
                use ed25519_dalek::pkcs8::EncodePrivateKey;
                let pem = key
                    .to_pkcs8_pem(ed25519_dalek::pkcs8::spki::der::pem::LineEnding::LF)
                    .map_err(|_| CryptoError::AlgorithmMismatch)?;
                Ok(pem.to_string())
            }
        }
    }

    /// Parses a PKCS#8 PEM private key, trying P-256 first, then Ed25519.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, CryptoError> {
        {
            use p256::pkcs8::DecodePrivateKey;
            if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_pem(pem) {
                return Ok(PrivateKey::P256(key));
            }
        }
        {
            use ed25519_dalek::pkcs8::DecodePrivateKey;
            if let Ok(key) = ed25519_dalek::SigningKey::from_pkcs8_pem(pem) {
                return Ok(PrivateKey::Ed25519(key));
            }
        }
        Err(CryptoError::KeyNotFound("unparseable private key PEM".to_string()))
    }
}

impl PublicKey {
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            PublicKey::P256(_) => SignatureAlgorithm::Es256,
            PublicKey::Ed25519(_) => SignatureAlgorithm::EdDsa,
        }
    }

    /// SPKI PEM encoding, the form carried in DID documents.
    pub fn to_spki_pem(&self) -> Result<String, CryptoError> {
        match self {
            PublicKey::P256(key) => {
                use p256::pkcs8::EncodePublicKey;
                key.to_public_key_pem(p256::pkcs8::LineEnding::LF)
                    .map_err(|_| CryptoError::AlgorithmMismatch)
            }
            PublicKey::Ed25519(key) => {
                use ed25519_dalek::pkcs8::EncodePublicKey;
                key.to_public_key_pem(ed25519_dalek::pkcs8::spki::der::pem::LineEnding::LF)
                    .map_err(|_| CryptoError::AlgorithmMismatch)
            }
        }
    }

    /// SPKI DER bytes, used for the multibase form in A2A proofs.
    pub fn to_spki_der(&self) -> Result<Vec<u8>, CryptoError> {
        match self {
            PublicKey::P256(key) => {
                use p256::pkcs8::EncodePublicKey;
                let der = key
                    .to_public_key_der()
                    .map_err(|_| CryptoError::AlgorithmMismatch)?;
                Ok(der.as_bytes().to_vec())
            }
            PublicKey::Ed25519(key) => {
                use ed25519_dalek::pkcs8::EncodePublicKey;
                let der = key
                    .to_public_key_der()
                    .map_err(|_| CryptoError::AlgorithmMismatch)?;
                Ok(der.as_bytes().to_vec())
            }
        }
    }

    /// Parses an SPKI PEM public key of either algorithm.
    pub fn from_spki_pem(pem: &str) -> Result<Self, CryptoError> {
        {
            use p256::pkcs8::DecodePublicKey;
            if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_pem(pem) {
                return Ok(PublicKey::P256(key));
            }
        }
        {
            use ed25519_dalek::pkcs8::DecodePublicKey;
            if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_pem(pem) {
                return Ok(PublicKey::Ed25519(key));
            }
        }
        Err(CryptoError::KeyNotFound("unparseable public key PEM".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_pem_roundtrip_p256() {
        let key = PrivateKey::generate(SignatureAlgorithm::Es256);
        let pem = key.to_pkcs8_pem().unwrap();
        let restored = PrivateKey::from_pkcs8_pem(&pem).unwrap();
        assert_eq!(restored.algorithm(), SignatureAlgorithm::Es256);
    }

    #[test]
    fn test_generate_and_pem_roundtrip_ed25519() {
        let key = PrivateKey::generate(SignatureAlgorithm::EdDsa);
        let pem = key.to_pkcs8_pem().unwrap();
        let restored = PrivateKey::from_pkcs8_pem(&pem).unwrap();
        assert_eq!(restored.algorithm(), SignatureAlgorithm::EdDsa);
    }

    #[test]
    fn test_public_key_pem_roundtrip() {
        for alg in [SignatureAlgorithm::Es256, SignatureAlgorithm::EdDsa] {
            let key = PrivateKey::generate(alg);
            let pem = key.public_key().to_spki_pem().unwrap();
            let restored = PublicKey::from_spki_pem(&pem).unwrap();
            assert_eq!(restored.algorithm(), alg);
        }
    }
}
