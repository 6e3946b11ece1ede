//! Error type for the crypto core.
//!
//! Variants map onto the wire taxonomy via [`CryptoError::kind`]; the mapping
//! is what A2A dispatchers and HTTP handlers use, so no caller ever learns
//! more than the coarse class of a verification failure.

use ap2_types::canonical::CanonicalizationError;
use ap2_types::error::ErrorKind;
use ap2_types::mandate::MandateError;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error(transparent)]
    Canonicalization(#[from] CanonicalizationError),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("wrong passphrase or corrupted key blob")]
    WrongPassphrase,
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("JWT expired")]
    JwtExpired,
    #[error("malformed JWT: {0}")]
    JwtMalformed(&'static str),
    #[error("jti already consumed")]
    JtiReplay,
    #[error("hash mismatch")]
    HashMismatch,
    #[error("WebAuthn challenge mismatch")]
    ChallengeMismatch,
    #[error("WebAuthn sign counter regression")]
    CounterRegression,
    #[error("malformed attestation data: {0}")]
    MalformedAttestation(&'static str),
    #[error("unsupported algorithm for this key")]
    AlgorithmMismatch,
    #[error("key storage I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// The wire-level class this failure surfaces as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::Canonicalization(_)
            | CryptoError::JwtMalformed(_)
            | CryptoError::MalformedAttestation(_)
            | CryptoError::AlgorithmMismatch => ErrorKind::Validation,
            CryptoError::SignatureInvalid
            | CryptoError::WrongPassphrase
            | CryptoError::ChallengeMismatch
            | CryptoError::CounterRegression => ErrorKind::Authentication,
            CryptoError::JwtExpired | CryptoError::HashMismatch => ErrorKind::Authorization,
            CryptoError::JtiReplay => ErrorKind::Conflict,
            CryptoError::KeyNotFound(_) => ErrorKind::NotFound,
            CryptoError::Io(_) => ErrorKind::Internal,
        }
    }
}

impl From<MandateError> for CryptoError {
    fn from(value: MandateError) -> Self {
        match value {
            MandateError::Canonicalization(e) => CryptoError::Canonicalization(e),
            // Chain/expiry problems surfacing through crypto paths read as
            // hash-level authorization failures.
            _ => CryptoError::HashMismatch,
        }
    }
}
