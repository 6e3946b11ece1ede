//! A2A envelope runtime: signing, verification, dispatch, and the client.
//!
//! The wire types live in [`ap2_types::a2a`]; this module adds the behavior:
//! a [`MessageSigner`] that signs outgoing envelopes over their canonical
//! form, a [`MessageVerifier`] that enforces freshness, replay, and signature
//! checks on incoming ones, a [`HandlerRegistry`] dispatching on
//! `dataPart.type`, and an [`A2aClient`] for calls to peer services.
//!
//! Handlers are plain async functions; the dispatcher verifies before
//! invoking and signs whatever they return. Internal failures leave the
//! dispatcher as `ap2.errors.*` envelopes with taxonomy payloads.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use ap2_types::a2a::{A2aHeader, A2aMessage, DataPart, MessageKind, SignatureAlgorithm};
use ap2_types::canonical;
use ap2_types::did::Did;
use ap2_types::error::ErrorKind;
use ap2_types::timestamp::UnixTimestamp;

use crate::crypto::error::CryptoError;
use crate::crypto::keys::PrivateKey;
use crate::crypto::signature;
use crate::did_resolver::DidResolver;
use crate::error::ServiceError;
use crate::store::TtlStore;

/// Maximum clock skew accepted on incoming envelopes.
pub const TIMESTAMP_TOLERANCE_SECS: u64 = 300;
/// How long consumed `message_id`s stay in the replay cache.
pub const REPLAY_TTL: Duration = Duration::from_secs(600);

/// Fresh `msg_<hex>` identifier.
pub fn new_message_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    format!("msg_{}", hex::encode(bytes))
}

/// Signs envelopes on behalf of one service identity.
pub struct MessageSigner {
    key: Arc<PrivateKey>,
    identity: Did,
}

impl MessageSigner {
    pub fn new(identity: Did, key: Arc<PrivateKey>) -> Self {
        Self { key, identity }
    }

    pub fn identity(&self) -> &Did {
        &self.identity
    }

    /// Builds and signs an envelope to `recipient`.
    pub fn build<P: Serialize>(
        &self,
        recipient: Did,
        kind: MessageKind,
        entity_id: impl Into<String>,
        payload: &P,
    ) -> Result<A2aMessage, ServiceError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| ServiceError::internal(format!("payload serialization: {e}")))?;
        let mut message = A2aMessage {
            header: A2aHeader {
                message_id: new_message_id(),
                sender: self.identity.clone(),
                recipient,
                timestamp: Utc::now(),
                proof: None,
            },
            data_part: DataPart {
                kind,
                id: entity_id.into(),
                payload,
            },
        };
        self.sign(&mut message)?;
        Ok(message)
    }

    /// Signs `message` in place over its canonical form with `proof` absent.
    pub fn sign(&self, message: &mut A2aMessage) -> Result<(), ServiceError> {
        message.header.proof = None;
        let bytes = canonical::to_canonical_json(message)
            .map_err(|e| ServiceError::internal(format!("canonicalization: {e}")))?;
        let kid = match self.key.algorithm() {
            SignatureAlgorithm::Es256 => self.identity.key_1(),
            SignatureAlgorithm::EdDsa => self.identity.key_2(),
        };
        let proof = signature::sign_detached(&bytes, &self.key, kid)
            .map_err(ServiceError::from)?;
        message.header.proof = Some(proof);
        Ok(())
    }
}

/// Verifies incoming envelopes: sender key resolution, canonical bytes,
/// freshness window, message-id replay, signature.
pub struct MessageVerifier {
    resolver: Arc<DidResolver>,
    replay: TtlStore<()>,
}

impl MessageVerifier {
    pub fn new(resolver: Arc<DidResolver>) -> Self {
        Self {
            resolver,
            replay: TtlStore::new(),
        }
    }

    pub async fn verify(&self, message: &A2aMessage) -> Result<(), ServiceError> {
        let proof = message
            .header
            .proof
            .as_ref()
            .ok_or_else(|| ServiceError::validation("missing header.proof"))?
            .clone();
        if proof.key_id.did != message.header.sender {
            return Err(CryptoError::SignatureInvalid.into());
        }

        let mut unsigned = message.clone();
        unsigned.header.proof = None;
        let bytes = canonical::to_canonical_json(&unsigned)
            .map_err(|e| ServiceError::validation(format!("canonicalization: {e}")))?;

        let now = UnixTimestamp::try_now()
            .map_err(|e| ServiceError::internal(e.to_string()))?;
        let sent = UnixTimestamp::from(message.header.timestamp);
        if !sent.within_tolerance(now, TIMESTAMP_TOLERANCE_SECS) {
            return Err(ServiceError::new(
                ErrorKind::Authentication,
                "stale_message",
                format!("timestamp outside tolerance: {sent}"),
            ));
        }

        if !self
            .replay
            .insert_once(format!("msg:{}", message.header.message_id), (), REPLAY_TTL)
        {
            return Err(ServiceError::new(
                ErrorKind::Conflict,
                "replay",
                format!("message_id replayed: {}", message.header.message_id),
            ));
        }

        let public_key = self.resolver.resolve_public_key(&proof.key_id).await?;
        signature::verify_detached(&bytes, &proof, &public_key).map_err(ServiceError::from)?;
        Ok(())
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<DataPart, ServiceError>> + Send>>;
type Handler = Arc<dyn Fn(DataPart) -> HandlerFuture + Send + Sync>;

/// Maps `dataPart.type` strings to async handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, kind: MessageKind, handler: F)
    where
        F: Fn(DataPart) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DataPart, ServiceError>> + Send + 'static,
    {
        self.handlers.insert(
            kind.as_wire(),
            Arc::new(move |part| Box::pin(handler(part))),
        );
    }

    fn get(&self, kind: &MessageKind) -> Option<Handler> {
        self.handlers.get(&kind.as_wire()).cloned()
    }
}

/// Shared state of the `/a2a/message` endpoint.
pub struct A2aEndpoint {
    pub signer: MessageSigner,
    pub verifier: MessageVerifier,
    pub registry: HandlerRegistry,
}

impl A2aEndpoint {
    /// Verifies `message`, dispatches it, and returns the signed response
    /// envelope. Handler failures become `ap2.errors.*` envelopes rather than
    /// transport errors.
    pub async fn dispatch(&self, message: A2aMessage) -> Result<A2aMessage, ServiceError> {
        self.verifier.verify(&message).await?;
        let sender = message.header.sender.clone();
        let kind = message.data_part.kind;
        let entity_id = message.data_part.id.clone();

        let handler = self
            .registry
            .get(&kind)
            .ok_or_else(|| ServiceError::validation(format!("no handler for {kind}")))?;

        match handler(message.data_part).await {
            Ok(response_part) => {
                let mut response = A2aMessage {
                    header: A2aHeader {
                        message_id: new_message_id(),
                        sender: self.signer.identity().clone(),
                        recipient: sender,
                        timestamp: Utc::now(),
                        proof: None,
                    },
                    data_part: response_part,
                };
                self.signer.sign(&mut response)?;
                Ok(response)
            }
            Err(error) => {
                tracing::warn!(%kind, entity_id, kind_of_error = %error.kind, detail = %error.detail, "A2A handler failed");
                let body = error.wire_body();
                let response =
                    self.signer
                        .build(sender, MessageKind::Error(error.kind), entity_id, &body)?;
                Ok(response)
            }
        }
    }
}

/// HTTP client side of A2A: signs a request envelope, POSTs it to the peer's
/// `/a2a/message`, and returns the response envelope.
pub struct A2aClient {
    http: reqwest::Client,
}

impl Default for A2aClient {
    fn default() -> Self {
        Self::new()
    }
}

impl A2aClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Sends `message` and waits up to `timeout` for the peer's reply.
    /// Timeouts surface as [`ErrorKind::Unavailable`].
    pub async fn send(
        &self,
        base_url: &url::Url,
        message: &A2aMessage,
        timeout: Duration,
    ) -> Result<A2aMessage, ServiceError> {
        let url = base_url
            .join("a2a/message")
            .map_err(|e| ServiceError::internal(e.to_string()))?;
        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .json(message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::unavailable(format!("A2A peer timed out: {e}"))
                } else {
                    ServiceError::unavailable(format!("A2A transport: {e}"))
                }
            })?;
        response
            .json::<A2aMessage>()
            .await
            .map_err(|e| ServiceError::validation(format!("malformed A2A response: {e}")))
    }
}

/// Turns an `ap2.errors.*` response envelope back into a [`ServiceError`],
/// passing through non-error envelopes.
pub fn into_result(message: A2aMessage) -> Result<A2aMessage, ServiceError> {
    if let MessageKind::Error(kind) = message.data_part.kind {
        let detail = message
            .payload::<ap2_types::error::ErrorBody>()
            .map(|b| b.detail)
            .unwrap_or_else(|_| "peer reported an error".to_string());
        return Err(ServiceError::new(kind, "peer_error", detail));
    }
    Ok(message)
}
