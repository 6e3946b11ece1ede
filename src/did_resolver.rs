//! DID resolution for `did:ap2:*` identifiers.
//!
//! Resolution order: (1) in-process cache, (2) the local registry seeded at
//! startup from `{keys_dir}/../data/did_documents/<name>_did.json`, (3) an
//! HTTP fetch of `/.well-known/did.json` from the service the DID names,
//! using a service-name map for Docker-style DNS. HTTP failures are swallowed
//! and resolution returns `None`; callers surface that as `KeyNotFound`.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use ap2_types::did::{Did, KeyRef};

use crate::crypto::error::CryptoError;
use crate::crypto::keys::{PrivateKey, PublicKey};

/// One verification method of a DID document: a key id fragment plus a PEM
/// public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    /// Full `did#fragment` id of the method.
    pub id: KeyRef,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: Did,
    pub public_key_pem: String,
}

/// A DID document listing the verification methods of one identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    pub id: Did,
    pub verification_method: Vec<VerificationMethod>,
}

impl DidDocument {
    /// Builds the standard two-method document (`#key-1` P-256, `#key-2`
    /// Ed25519 when provided) for a freshly generated identity.
    pub fn for_identity(
        did: &Did,
        p256_key: &PublicKey,
        ed25519_key: Option<&PublicKey>,
    ) -> Result<Self, CryptoError> {
        let mut verification_method = vec![VerificationMethod {
            id: did.key_1(),
            method_type: "EcdsaSecp256r1VerificationKey2019".to_string(),
            controller: did.clone(),
            public_key_pem: p256_key.to_spki_pem()?,
        }];
        if let Some(key) = ed25519_key {
            verification_method.push(VerificationMethod {
                id: did.key_2(),
                method_type: "Ed25519VerificationKey2020".to_string(),
                controller: did.clone(),
                public_key_pem: key.to_spki_pem()?,
            });
        }
        Ok(Self {
            id: did.clone(),
            verification_method,
        })
    }

    /// Selects the method whose id ends with `fragment`.
    pub fn method(&self, fragment: &str) -> Option<&VerificationMethod> {
        self.verification_method
            .iter()
            .find(|m| m.id.fragment == fragment)
    }

    /// The primary (first) verification method, used when a `kid` carries no
    /// fragment — the user-DID case in issuer JWTs.
    pub fn primary_method(&self) -> Option<&VerificationMethod> {
        self.verification_method.first()
    }
}

/// Resolves DIDs to documents via cache, local registry, then HTTP.
pub struct DidResolver {
    cache: DashMap<Did, Arc<DidDocument>>,
    registry_dir: Option<PathBuf>,
    /// service name → base URL, standing in for Docker DNS.
    service_map: HashMap<String, Url>,
    http: reqwest::Client,
}

impl DidResolver {
    pub fn new(registry_dir: Option<PathBuf>, service_map: HashMap<String, Url>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            cache: DashMap::new(),
            registry_dir,
            service_map,
            http,
        }
    }

    /// A resolver with no registry directory and no HTTP targets; documents
    /// must be registered explicitly. Used by tests and single-process runs.
    pub fn in_memory() -> Self {
        Self::new(None, HashMap::new())
    }

    /// Puts a document straight into the cache.
    pub fn register(&self, document: DidDocument) {
        self.cache.insert(document.id.clone(), Arc::new(document));
    }

    /// Loads every `<name>_did.json` under `dir` into the cache. Unreadable
    /// files are an error: a service must not start with a broken registry.
    pub fn seed_from_dir(&self, dir: &Path) -> Result<usize, std::io::Error> {
        let mut count = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.file_name().and_then(|n| n.to_str()).is_none_or(|n| !n.ends_with("_did.json")) {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            let document: DidDocument = serde_json::from_str(&raw).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("{}: {e}", path.display()),
                )
            })?;
            self.register(document);
            count += 1;
        }
        Ok(count)
    }

    /// Resolves a DID to its document, or `None` when every source misses.
    pub async fn resolve(&self, did: &Did) -> Option<Arc<DidDocument>> {
        if let Some(cached) = self.cache.get(did) {
            return Some(cached.clone());
        }
        if let Some(document) = self.resolve_registry(did) {
            let document = Arc::new(document);
            self.cache.insert(did.clone(), document.clone());
            return Some(document);
        }
        if let Some(document) = self.resolve_http(did).await {
            let document = Arc::new(document);
            self.cache.insert(did.clone(), document.clone());
            return Some(document);
        }
        None
    }

    fn resolve_registry(&self, did: &Did) -> Option<DidDocument> {
        let dir = self.registry_dir.as_ref()?;
        let path = dir.join(format!("{}_did.json", did.name()));
        let raw = std::fs::read_to_string(path).ok()?;
        let document: DidDocument = serde_json::from_str(&raw).ok()?;
        (document.id == *did).then_some(document)
    }

    async fn resolve_http(&self, did: &Did) -> Option<DidDocument> {
        let base = self.service_map.get(did.name())?;
        let url = base.join(".well-known/did.json").ok()?;
        let response = match self.http.get(url.clone()).send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(%did, %url, %error, "DID HTTP resolution failed");
                return None;
            }
        };
        let document: DidDocument = response.json().await.ok()?;
        (document.id == *did).then_some(document)
    }

    /// Resolves a `did#fragment` key reference to a public key.
    pub async fn resolve_public_key(&self, kid: &KeyRef) -> Result<PublicKey, CryptoError> {
        let document = self
            .resolve(&kid.did)
            .await
            .ok_or_else(|| CryptoError::KeyNotFound(kid.to_string()))?;
        let method = document
            .method(&kid.fragment)
            .ok_or_else(|| CryptoError::KeyNotFound(kid.to_string()))?;
        PublicKey::from_spki_pem(&method.public_key_pem)
    }

    /// Resolves a bare DID to its primary verification key.
    pub async fn resolve_primary_key(&self, did: &Did) -> Result<PublicKey, CryptoError> {
        let document = self
            .resolve(did)
            .await
            .ok_or_else(|| CryptoError::KeyNotFound(did.to_string()))?;
        let method = document
            .primary_method()
            .ok_or_else(|| CryptoError::KeyNotFound(did.to_string()))?;
        PublicKey::from_spki_pem(&method.public_key_pem)
    }
}

/// Registers a freshly generated identity with a resolver and returns its
/// document, the common path for in-process wiring.
pub fn register_identity(
    resolver: &DidResolver,
    did: &Did,
    key: &PrivateKey,
) -> Result<DidDocument, CryptoError> {
    let document = match key.algorithm() {
        ap2_types::a2a::SignatureAlgorithm::Es256 => {
            DidDocument::for_identity(did, &key.public_key(), None)?
        }
        ap2_types::a2a::SignatureAlgorithm::EdDsa => {
            // Ed25519-only identities still publish under #key-1 slot order.
            DidDocument {
                id: did.clone(),
                verification_method: vec![VerificationMethod {
                    id: did.key_2(),
                    method_type: "Ed25519VerificationKey2020".to_string(),
                    controller: did.clone(),
                    public_key_pem: key.public_key().to_spki_pem()?,
                }],
            }
        }
    };
    resolver.register(document.clone());
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap2_types::a2a::SignatureAlgorithm;

    #[tokio::test]
    async fn test_resolve_registered_document() {
        let resolver = DidResolver::in_memory();
        let did = Did::merchant("mugi_shoten");
        let key = PrivateKey::generate(SignatureAlgorithm::Es256);
        register_identity(&resolver, &did, &key).unwrap();

        let document = resolver.resolve(&did).await.unwrap();
        assert_eq!(document.id, did);
        assert_eq!(document.verification_method[0].id.fragment, "key-1");
    }

    #[tokio::test]
    async fn test_resolve_public_key_by_fragment() {
        let resolver = DidResolver::in_memory();
        let did = Did::merchant("mugi_shoten");
        let key = PrivateKey::generate(SignatureAlgorithm::Es256);
        register_identity(&resolver, &did, &key).unwrap();

        let resolved = resolver.resolve_public_key(&did.key_1()).await.unwrap();
        assert_eq!(
            resolved.to_spki_pem().unwrap(),
            key.public_key().to_spki_pem().unwrap()
        );
    }

    #[tokio::test]
    async fn test_unknown_did_is_key_not_found() {
        let resolver = DidResolver::in_memory();
        let kid = Did::merchant("ghost").key_1();
        assert!(matches!(
            resolver.resolve_public_key(&kid).await,
            Err(CryptoError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_fragment_is_key_not_found() {
        let resolver = DidResolver::in_memory();
        let did = Did::merchant("mugi_shoten");
        let key = PrivateKey::generate(SignatureAlgorithm::Es256);
        register_identity(&resolver, &did, &key).unwrap();
        let kid = KeyRef {
            did,
            fragment: "key-9".to_string(),
        };
        assert!(resolver.resolve_public_key(&kid).await.is_err());
    }

    #[tokio::test]
    async fn test_seed_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let did = Did::agent("merchant_agent");
        let key = PrivateKey::generate(SignatureAlgorithm::Es256);
        let document = DidDocument::for_identity(&did, &key.public_key(), None).unwrap();
        std::fs::write(
            dir.path().join("merchant_agent_did.json"),
            serde_json::to_vec(&document).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let resolver = DidResolver::in_memory();
        assert_eq!(resolver.seed_from_dir(dir.path()).unwrap(), 1);
        assert!(resolver.resolve(&did).await.is_some());
    }

    #[test]
    fn test_document_wire_shape() {
        let did = Did::merchant("mugi_shoten");
        let key = PrivateKey::generate(SignatureAlgorithm::Es256);
        let document = DidDocument::for_identity(&did, &key.public_key(), None).unwrap();
        let json = serde_json::to_value(&document).unwrap();
        assert!(json.get("verificationMethod").is_some());
        assert_eq!(
            json["verificationMethod"][0]["id"],
            "did:ap2:merchant:mugi_shoten#key-1"
        );
        assert!(json["verificationMethod"][0]["publicKeyPem"]
            .as_str()
            .unwrap()
            .starts_with("-----BEGIN PUBLIC KEY-----"));
    }
}
