//! Encrypted at-rest storage for service private keys.
//!
//! Each identity's private key lives at `<keys_dir>/<name>_private.pem` as an
//! AES-256-GCM blob whose key is derived from a per-role passphrase with
//! PBKDF2-HMAC-SHA256 at 600 000 iterations. The blob layout is
//! `salt(16) || nonce(12) || tag(16) || ciphertext`; the plaintext is the
//! PKCS#8 PEM of the key. A wrong passphrase fails the GCM tag check and
//! surfaces as [`CryptoError::WrongPassphrase`] without distinguishing
//! corruption from a bad secret.
//!
//! Public keys sit next to them at `<name>_public.pem` in plaintext SPKI PEM,
//! the same form DID documents carry.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::Sha256;
use std::fs;
use std::path::{Path, PathBuf};

use crate::crypto::error::CryptoError;
use crate::crypto::keys::{PrivateKey, PublicKey};

const PBKDF2_ITERATIONS: u32 = 600_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// File-backed key storage rooted at `AP2_KEYS_DIRECTORY`.
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn private_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}_private.pem"))
    }

    fn public_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}_public.pem"))
    }

    /// Encrypts and writes `key` under `name`, plus its plaintext public half.
    pub fn save(&self, name: &str, key: &PrivateKey, passphrase: &str) -> Result<(), CryptoError> {
        fs::create_dir_all(&self.dir)?;

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut rng = rand::rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new_from_slice(&derive_key(passphrase, &salt))
            .map_err(|_| CryptoError::WrongPassphrase)?;
        let plaintext = key.to_pkcs8_pem()?;
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &[],
                },
            )
            .map_err(|_| CryptoError::WrongPassphrase)?;

        // AES-GCM appends the tag to the ciphertext; re-order into the
        // on-disk layout salt || nonce || tag || ciphertext.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + TAG_LEN + ciphertext.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(tag);
        blob.extend_from_slice(ciphertext);
        fs::write(self.private_path(name), blob)?;

        fs::write(self.public_path(name), key.public_key().to_spki_pem()?)?;
        Ok(())
    }

    /// Loads and decrypts the private key stored under `name`.
    pub fn load(&self, name: &str, passphrase: &str) -> Result<PrivateKey, CryptoError> {
        let path = self.private_path(name);
        let blob =
            fs::read(&path).map_err(|_| CryptoError::KeyNotFound(path.display().to_string()))?;
        if blob.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(CryptoError::WrongPassphrase);
        }
        let (salt, rest) = blob.split_at(SALT_LEN);
        let (nonce, rest) = rest.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let cipher = Aes256Gcm::new_from_slice(&derive_key(passphrase, salt))
            .map_err(|_| CryptoError::WrongPassphrase)?;
        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: &sealed,
                    aad: &[],
                },
            )
            .map_err(|_| CryptoError::WrongPassphrase)?;

        let pem = String::from_utf8(plaintext).map_err(|_| CryptoError::WrongPassphrase)?;
        PrivateKey::from_pkcs8_pem(&pem)
    }

    /// Loads the plaintext public key stored under `name`.
    pub fn load_public(&self, name: &str) -> Result<PublicKey, CryptoError> {
        let path = self.public_path(name);
        let pem =
            fs::read_to_string(&path).map_err(|_| CryptoError::KeyNotFound(path.display().to_string()))?;
        PublicKey::from_spki_pem(&pem)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.private_path(name).exists()
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap2_types::a2a::SignatureAlgorithm;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let key = PrivateKey::generate(SignatureAlgorithm::Es256);
        store.save("merchant", &key, "correct horse").unwrap();

        let restored = store.load("merchant", "correct horse").unwrap();
        assert_eq!(restored.algorithm(), SignatureAlgorithm::Es256);
        assert_eq!(
            restored.public_key().to_spki_pem().unwrap(),
            key.public_key().to_spki_pem().unwrap()
        );
    }

    #[test]
    fn test_wrong_passphrase_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let key = PrivateKey::generate(SignatureAlgorithm::EdDsa);
        store.save("cp", &key, "right").unwrap();

        assert!(matches!(
            store.load("cp", "wrong"),
            Err(CryptoError::WrongPassphrase)
        ));
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        assert!(matches!(
            store.load("ghost", "any"),
            Err(CryptoError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_blob_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let key = PrivateKey::generate(SignatureAlgorithm::Es256);
        store.save("merchant", &key, "pw").unwrap();

        let blob = std::fs::read(dir.path().join("merchant_private.pem")).unwrap();
        assert!(blob.len() > SALT_LEN + NONCE_LEN + TAG_LEN);
        // Tampering with the tag region must fail decryption.
        let mut tampered = blob.clone();
        tampered[SALT_LEN + NONCE_LEN] ^= 0xff;
        std::fs::write(dir.path().join("merchant_private.pem"), &tampered).unwrap();
        assert!(matches!(
            store.load("merchant", "pw"),
            Err(CryptoError::WrongPassphrase)
        ));
    }

    #[test]
    fn test_public_key_stored_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let key = PrivateKey::generate(SignatureAlgorithm::Es256);
        store.save("merchant", &key, "pw").unwrap();
        let public = store.load_public("merchant").unwrap();
        assert_eq!(public.algorithm(), SignatureAlgorithm::Es256);
    }
}
