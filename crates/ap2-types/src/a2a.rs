//! The signed agent-to-agent (A2A) message frame.
//!
//! Every inter-agent call is an [`A2aMessage`]: a header identifying sender,
//! recipient, and time, plus a typed `dataPart` carrying the payload. The
//! header's `proof` is a detached signature over the canonical JSON of the
//! whole message with the proof itself removed, verifiable against the
//! sender's DID.
//!
//! Correlation across concurrent requests is strictly by `message_id` and
//! `dataPart.id`; no ordering is guaranteed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

use crate::did::{Did, KeyRef};
use crate::error::ErrorKind;
use crate::mandate::{CartMandate, IntentMandate, PaymentMandate};

/// Signature algorithms used across AP2: ECDSA P-256 (`ES256`) and Ed25519
/// (`EdDSA`), named as in JOSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "ES256")]
    Es256,
    #[serde(rename = "EdDSA")]
    EdDsa,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Es256 => "ES256",
            SignatureAlgorithm::EdDsa => "EdDSA",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A detached signature attached to an A2A header or returned by the crypto
/// core's `sign` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub algorithm: SignatureAlgorithm,
    /// `did#fragment` reference to the signing key.
    pub key_id: KeyRef,
    /// Multibase-encoded SPKI public key (`u` prefix, base64url no padding).
    /// Advisory: verifiers resolve the key through the sender's DID instead.
    pub public_key_multibase: String,
    /// Base64url (no padding) of the raw signature bytes — `R || S` for
    /// ES256, the 64-byte signature for Ed25519.
    pub value: String,
}

/// A2A message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct A2aHeader {
    /// `msg_<hex>` identifier, consumed at most once per verifier.
    pub message_id: String,
    pub sender: Did,
    pub recipient: Did,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

/// The typed payload of an A2A message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPart {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Id of the entity the payload concerns (mandate id, session id, ...).
    pub id: String,
    pub payload: serde_json::Value,
}

/// A complete A2A envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct A2aMessage {
    pub header: A2aHeader,
    #[serde(rename = "dataPart")]
    pub data_part: DataPart,
}

impl A2aMessage {
    /// Decode the payload as `T`, mapping malformed payloads to a
    /// [`ErrorKind::Validation`]-shaped error at the caller.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data_part.payload.clone())
    }
}

/// The `dataPart.type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    IntentMandate,
    CartMandate,
    PaymentMandate,
    CartRequest,
    CartSelection,
    CartCandidates,
    PaymentResult,
    Error(ErrorKind),
}

impl MessageKind {
    pub fn as_wire(&self) -> String {
        match self {
            MessageKind::IntentMandate => "ap2.mandates.IntentMandate".to_string(),
            MessageKind::CartMandate => "ap2.mandates.CartMandate".to_string(),
            MessageKind::PaymentMandate => "ap2.mandates.PaymentMandate".to_string(),
            MessageKind::CartRequest => "ap2.requests.CartRequest".to_string(),
            MessageKind::CartSelection => "ap2.requests.CartSelection".to_string(),
            MessageKind::CartCandidates => "ap2.responses.CartCandidates".to_string(),
            MessageKind::PaymentResult => "ap2.responses.PaymentResult".to_string(),
            MessageKind::Error(kind) => format!("ap2.errors.{kind}"),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown A2A message type: {0}")]
pub struct UnknownMessageKind(String);

impl FromStr for MessageKind {
    type Err = UnknownMessageKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ap2.mandates.IntentMandate" => Ok(MessageKind::IntentMandate),
            "ap2.mandates.CartMandate" => Ok(MessageKind::CartMandate),
            "ap2.mandates.PaymentMandate" => Ok(MessageKind::PaymentMandate),
            "ap2.requests.CartRequest" => Ok(MessageKind::CartRequest),
            "ap2.requests.CartSelection" => Ok(MessageKind::CartSelection),
            "ap2.responses.CartCandidates" => Ok(MessageKind::CartCandidates),
            "ap2.responses.PaymentResult" => Ok(MessageKind::PaymentResult),
            other => {
                if let Some(kind) = other.strip_prefix("ap2.errors.") {
                    let kind = kind
                        .parse::<ErrorKind>()
                        .map_err(|_| UnknownMessageKind(other.to_string()))?;
                    Ok(MessageKind::Error(kind))
                } else {
                    Err(UnknownMessageKind(other.to_string()))
                }
            }
        }
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_wire())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ============================================================================
// Typed payloads
// ============================================================================

/// One entry in a `CartCandidates` response. Candidates are an unordered bag:
/// artifacts arrive in signing-completion order and are identified solely by
/// `artifact_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartArtifact {
    pub artifact_id: String,
    pub cart_mandate: CartMandate,
}

/// Payload of `ap2.responses.CartCandidates`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartCandidates {
    #[serde(default)]
    pub artifacts: Vec<CartArtifact>,
}

/// A WebAuthn assertion carried alongside a PaymentMandate so verifiers can
/// reconstruct the signed input `authenticatorData || SHA256(clientDataJSON)`.
/// All byte fields are base64url without padding; `signature` is the
/// authenticator's DER-encoded ECDSA signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebAuthnAssertion {
    pub credential_id: String,
    pub client_data_json: String,
    pub authenticator_data: String,
    pub signature: String,
}

/// Envelope-level risk metadata attached by the shopping agent. Lives
/// outside `PaymentMandateContents` and is never covered by `payment_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RiskMetadata {
    pub risk_score: u8,
    #[serde(default)]
    pub fraud_indicators: Vec<String>,
}

/// Payload of `ap2.mandates.PaymentMandate` sent to the payment processor:
/// the full evidence bundle for one charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequestPayload {
    pub cart_mandate: CartMandate,
    pub payment_mandate: PaymentMandate,
    pub webauthn_assertion: WebAuthnAssertion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_mandate: Option<IntentMandate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskMetadata>,
}

/// Payload of `ap2.responses.PaymentResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Captured,
    Failed,
    Refunded,
}
