//! Decentralized identifiers for AP2 participants.
//!
//! Every AP2 party is addressed by a DID of the form `did:ap2:<role>:<name>`,
//! e.g. `did:ap2:merchant:mugi_shoten` or `did:ap2:agent:shopping_agent`.
//! A DID resolves (see the resolver in `ap2-rs`) to a DID document listing
//! verification methods; signing key references append a fragment, as in
//! `did:ap2:merchant:mugi_shoten#key-1`.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

const DID_PREFIX: &str = "did:ap2:";

/// The role segment of an AP2 DID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DidRole {
    /// Autonomous agents: shopping agent, merchant agent, payment processor.
    Agent,
    /// Merchants holding signing keys for cart authorization.
    Merchant,
    /// Credential providers custodying user payment credentials.
    Cp,
    /// End users, resolvable for user-authorization verification.
    User,
}

impl DidRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DidRole::Agent => "agent",
            DidRole::Merchant => "merchant",
            DidRole::Cp => "cp",
            DidRole::User => "user",
        }
    }
}

impl fmt::Display for DidRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DidRole {
    type Err = DidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(DidRole::Agent),
            "merchant" => Ok(DidRole::Merchant),
            "cp" => Ok(DidRole::Cp),
            "user" => Ok(DidRole::User),
            other => Err(DidParseError(format!("unknown DID role: {other}"))),
        }
    }
}

/// A parsed `did:ap2:<role>:<name>` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Did {
    pub role: DidRole,
    pub name: String,
}

impl Did {
    pub fn new<N: Into<String>>(role: DidRole, name: N) -> Self {
        Self {
            role,
            name: name.into(),
        }
    }

    pub fn agent<N: Into<String>>(name: N) -> Self {
        Self::new(DidRole::Agent, name)
    }

    pub fn merchant<N: Into<String>>(name: N) -> Self {
        Self::new(DidRole::Merchant, name)
    }

    pub fn user<N: Into<String>>(name: N) -> Self {
        Self::new(DidRole::User, name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> DidRole {
        self.role
    }

    /// The key reference for this DID's primary (P-256) verification method.
    pub fn key_1(&self) -> KeyRef {
        KeyRef {
            did: self.clone(),
            fragment: "key-1".to_string(),
        }
    }

    /// The key reference for this DID's Ed25519 verification method.
    pub fn key_2(&self) -> KeyRef {
        KeyRef {
            did: self.clone(),
            fragment: "key-2".to_string(),
        }
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DID_PREFIX}{}:{}", self.role, self.name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid AP2 DID: {0}")]
pub struct DidParseError(String);

impl FromStr for Did {
    type Err = DidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(DID_PREFIX)
            .ok_or_else(|| DidParseError(s.to_string()))?;
        let (role, name) = rest
            .split_once(':')
            .ok_or_else(|| DidParseError(s.to_string()))?;
        if name.is_empty() || name.contains('#') {
            return Err(DidParseError(s.to_string()));
        }
        Ok(Did {
            role: role.parse()?,
            name: name.to_string(),
        })
    }
}

impl Serialize for Did {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A `did#fragment` reference selecting one verification method of a DID
/// document, as carried in JWT `kid` headers and A2A proofs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRef {
    pub did: Did,
    pub fragment: String,
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.did, self.fragment)
    }
}

impl FromStr for KeyRef {
    type Err = DidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (did, fragment) = s
            .split_once('#')
            .ok_or_else(|| DidParseError(format!("key reference missing fragment: {s}")))?;
        if fragment.is_empty() {
            return Err(DidParseError(format!("empty key fragment: {s}")));
        }
        Ok(KeyRef {
            did: did.parse()?,
            fragment: fragment.to_string(),
        })
    }
}

impl Serialize for KeyRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for KeyRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_did_roundtrip() {
        let did: Did = "did:ap2:merchant:mugi_shoten".parse().unwrap();
        assert_eq!(did.role, DidRole::Merchant);
        assert_eq!(did.name, "mugi_shoten");
        assert_eq!(did.to_string(), "did:ap2:merchant:mugi_shoten");
    }

    #[test]
    fn test_did_serde_as_string() {
        let did = Did::agent("payment_processor");
        let json = serde_json::to_string(&did).unwrap();
        assert_eq!(json, "\"did:ap2:agent:payment_processor\"");
        let back: Did = serde_json::from_str(&json).unwrap();
        assert_eq!(back, did);
    }

    #[test]
    fn test_did_rejects_foreign_methods() {
        assert!("did:web:example.com".parse::<Did>().is_err());
        assert!("did:ap2:wizard:merlin".parse::<Did>().is_err());
        assert!("did:ap2:agent:".parse::<Did>().is_err());
    }

    #[test]
    fn test_key_ref_roundtrip() {
        let kid: KeyRef = "did:ap2:merchant:mugi_shoten#key-1".parse().unwrap();
        assert_eq!(kid.fragment, "key-1");
        assert_eq!(kid.did.name, "mugi_shoten");
        assert_eq!(kid.to_string(), "did:ap2:merchant:mugi_shoten#key-1");
    }

    #[test]
    fn test_key_ref_requires_fragment() {
        assert!("did:ap2:merchant:mugi_shoten".parse::<KeyRef>().is_err());
        assert!("did:ap2:merchant:mugi_shoten#".parse::<KeyRef>().is_err());
    }
}
