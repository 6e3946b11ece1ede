//! The AP2 crypto core: keys, signatures, JWTs, and passkey verification.
//!
//! Everything here operates on canonical bytes from [`ap2_types::canonical`]
//! and raw (`R || S`) signature encodings. Modules:
//!
//! - [`keys`] — P-256 / Ed25519 key pairs and their PEM forms
//! - [`keystore`] — passphrase-encrypted private keys at rest
//! - [`signature`] — detached sign/verify and constant-time comparison
//! - [`jwt`] — merchant-authorization JWTs with jti replay defense
//! - [`sd_jwt`] — user-authorization SD-JWT+KB assembly and verification
//! - [`webauthn`] — assertion parsing, COSE keys, counter tracking
//! - [`b64`] — the base64url (no padding) profile used throughout

pub mod b64;
pub mod error;
pub mod jwt;
pub mod keys;
pub mod keystore;
pub mod sd_jwt;
pub mod signature;
pub mod webauthn;

pub use error::CryptoError;
