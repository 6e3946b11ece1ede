//! Shopping agent: drives the full mandate chain on behalf of a user.
//!
//! One in-memory session per user action, nothing persisted. The flow:
//! build an IntentMandate from the utterance, fan the intent out to the
//! merchant agent over A2A (waiting at most 300 s), present the returned
//! candidates as an unordered bag keyed by artifact id, and — once the UI
//! returns a cart choice and a passkey assertion — assemble the
//! PaymentMandate: tokenized method from the credential provider, cart and
//! payment hashes, SD-JWT+KB user authorization, a local risk assessment on
//! the envelope, and the signed A2A handoff to the payment processor.
//!
//! Abandonment costs nothing: sessions age out of the TTL store and no other
//! state exists.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::instrument;
use url::Url;

use ap2_types::a2a::{
    CartArtifact, CartCandidates, MessageKind, PaymentRequestPayload, PaymentResult, RiskMetadata,
    WebAuthnAssertion,
};
use ap2_types::did::Did;
use ap2_types::mandate::{
    self, IntentConstraints, IntentMandate, MandateMetadata, PaymentMandate,
    PaymentMandateContents,
};
use ap2_types::money::MoneyAmount;
use ap2_types::payment::PaymentResponse;
use ap2_types::timestamp::UnixTimestamp;

use crate::a2a::{A2aClient, MessageSigner, MessageVerifier, into_result};
use crate::crypto::sd_jwt;
use crate::error::ServiceError;
use crate::risk::{RiskEngine, RiskInput};
use crate::services::credential_provider::PaymentMethodResponse;
use crate::store::TtlStore;

/// Default intent lifetime.
const INTENT_VALIDITY: Duration = Duration::hours(24);
/// How long an abandoned session survives.
const SESSION_TTL: StdDuration = StdDuration::from_secs(600);
/// Wait for the merchant agent's candidates.
pub const CART_WAIT: StdDuration = StdDuration::from_secs(300);
/// Wait for the processor's result.
pub const PAYMENT_WAIT: StdDuration = StdDuration::from_secs(60);

#[derive(Clone)]
struct Session {
    user: Did,
    intent: IntentMandate,
    candidates: Vec<CartArtifact>,
    selected_cart_id: Option<String>,
    challenge: Option<String>,
}

pub struct ShoppingAgent {
    identity: Did,
    merchant_agent: Did,
    processor: Did,
    merchant_agent_url: Url,
    processor_url: Url,
    credential_provider_url: Url,
    rp_id: String,
    signer: MessageSigner,
    verifier: MessageVerifier,
    a2a: A2aClient,
    http: reqwest::Client,
    sessions: TtlStore<Session>,
    risk: RiskEngine,
    cart_wait: StdDuration,
    payment_wait: StdDuration,
}

pub struct ShoppingAgentConfig {
    pub identity: Did,
    pub merchant_agent: Did,
    pub processor: Did,
    pub merchant_agent_url: Url,
    pub processor_url: Url,
    pub credential_provider_url: Url,
    pub rp_id: String,
}

impl ShoppingAgent {
    pub fn new(config: ShoppingAgentConfig, signer: MessageSigner, verifier: MessageVerifier) -> Self {
        Self {
            identity: config.identity,
            merchant_agent: config.merchant_agent,
            processor: config.processor,
            merchant_agent_url: config.merchant_agent_url,
            processor_url: config.processor_url,
            credential_provider_url: config.credential_provider_url,
            rp_id: config.rp_id,
            signer,
            verifier,
            a2a: A2aClient::new(),
            http: reqwest::Client::new(),
            sessions: TtlStore::new(),
            risk: RiskEngine::stateless(),
            cart_wait: CART_WAIT,
            payment_wait: PAYMENT_WAIT,
        }
    }

    /// Shrinks the A2A waits; tests exercise timeouts in milliseconds.
    pub fn with_waits(mut self, cart_wait: StdDuration, payment_wait: StdDuration) -> Self {
        self.cart_wait = cart_wait;
        self.payment_wait = payment_wait;
        self
    }

    pub fn identity(&self) -> &Did {
        &self.identity
    }

    /// Step 1: the IntentMandate, immutable once built.
    pub fn build_intent(&self, request: &ChatRequest, session_id: &str) -> IntentMandate {
        let now = Utc::now();
        IntentMandate {
            natural_language_description: request.message.clone(),
            user_cart_confirmation_required: true,
            merchants: None,
            skus: request.skus.clone(),
            requires_refundability: false,
            intent_expiry: now + INTENT_VALIDITY,
            constraints: request.max_amount.map(|value| IntentConstraints {
                max_amount: Some(MoneyAmount::jpy(value)),
            }),
            metadata: Some(MandateMetadata {
                id: format!("intent_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
                user_id: Some(request.user_id.clone()),
                session_id: Some(session_id.to_string()),
                created_at: Some(now),
                ..Default::default()
            }),
        }
    }

    /// Steps 1–2: build the intent, gather signed cart candidates.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ServiceError> {
        if request.message.trim().is_empty() {
            return Err(ServiceError::validation("empty message"));
        }
        let session_id = format!("sess_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let intent = self.build_intent(&request, &session_id);
        let intent_id = intent
            .metadata
            .as_ref()
            .map(|m| m.id.clone())
            .unwrap_or_default();

        let message = self.signer.build(
            self.merchant_agent.clone(),
            MessageKind::IntentMandate,
            intent_id,
            &intent,
        )?;
        let response = self
            .a2a
            .send(&self.merchant_agent_url, &message, self.cart_wait)
            .await?;
        self.verifier.verify(&response).await?;
        let response = into_result(response)?;
        let candidates: CartCandidates = response
            .payload()
            .map_err(|e| ServiceError::validation(format!("malformed cart candidates: {e}")))?;

        // The artifact list is a bag: completion-ordered, identified only by
        // artifact_id.
        let carts: Vec<CartSummary> = candidates
            .artifacts
            .iter()
            .map(CartSummary::from_artifact)
            .collect();
        let session = Session {
            user: Did::user(&request.user_id),
            intent,
            candidates: candidates.artifacts,
            selected_cart_id: None,
            challenge: None,
        };
        self.sessions.insert(session_id.clone(), session, SESSION_TTL);

        let status = if carts.is_empty() { "no_carts" } else { "carts_ready" };
        Ok(ChatResponse {
            session_id,
            status: status.to_string(),
            carts,
        })
    }

    /// Step 3a: the user picked a cart; issue the passkey challenge.
    pub fn confirm_cart(
        &self,
        session_id: &str,
        request: ConfirmCartRequest,
    ) -> Result<ConfirmCartResponse, ServiceError> {
        let mut session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| ServiceError::not_found(format!("unknown session: {session_id}")))?;
        let cart = session
            .candidates
            .iter()
            .map(|a| &a.cart_mandate)
            .find(|c| c.contents.id == request.cart_id)
            .ok_or_else(|| ServiceError::not_found(format!("no such cart in session: {}", request.cart_id)))?;
        if !cart.is_signed() {
            return Err(ServiceError::validation("candidate cart is unsigned"));
        }
        mandate::validate_cart_mandate(cart, Utc::now())?;

        let challenge = sd_jwt::new_nonce();
        let total = cart.contents.total().amount.clone();
        session.selected_cart_id = Some(request.cart_id.clone());
        session.challenge = Some(challenge.clone());
        self.sessions.insert(session_id.to_string(), session, SESSION_TTL);

        Ok(ConfirmCartResponse {
            session_id: session_id.to_string(),
            cart_id: request.cart_id,
            total,
            challenge,
            rp_id: self.rp_id.clone(),
        })
    }

    /// Steps 4–8: passkey assertion in, PaymentResult out.
    pub async fn authorize_payment(
        &self,
        session_id: &str,
        request: AuthorizePaymentRequest,
    ) -> Result<PaymentResult, ServiceError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| ServiceError::not_found(format!("unknown session: {session_id}")))?;
        let cart_id = session
            .selected_cart_id
            .as_ref()
            .ok_or_else(|| ServiceError::validation("no cart confirmed for this session"))?;
        let challenge = session
            .challenge
            .as_ref()
            .ok_or_else(|| ServiceError::validation("no passkey challenge issued"))?;
        let cart = session
            .candidates
            .iter()
            .map(|a| &a.cart_mandate)
            .find(|c| &c.contents.id == cart_id)
            .ok_or_else(|| ServiceError::internal("selected cart vanished from session"))?
            .clone();

        // Step 4: tokenized payment method + issuer JWT from the credential
        // provider. Never card data.
        let method = self.fetch_payment_method(&session.user).await?;

        // Step 5: PaymentMandateContents mirrors the signed cart's total.
        let now = Utc::now();
        let details = &cart.contents.payment_request.details;
        let contents = PaymentMandateContents {
            payment_mandate_id: format!("pm_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            payment_details_id: details.id.clone(),
            payment_details_total: details.total.clone(),
            payment_response: PaymentResponse::tokenized(
                details.id.clone(),
                &method.card_brand,
                &method.token,
            ),
            merchant_agent: self.merchant_agent.clone(),
            timestamp: now,
        };

        // Step 6: hashes and the SD-JWT+KB, bound to the passkey ceremony.
        let cart_hash = mandate::mandate_hash_b64url(&cart)?;
        let payment_hash = mandate::mandate_hash_b64url(&contents)?;
        let now_unix = UnixTimestamp::try_now().map_err(|e| ServiceError::internal(e.to_string()))?;
        let user_authorization = sd_jwt::assemble_user_authorization(
            &method.issuer_jwt,
            &session.user,
            &request.webauthn_assertion,
            &cart_hash,
            &payment_hash,
            challenge,
            now_unix,
        )?;
        let payment_mandate = PaymentMandate {
            payment_mandate_contents: contents,
            user_authorization: Some(user_authorization),
        };

        // Step 7: local risk, attached to the envelope, never hashed.
        let assessment = self.risk.assess(&RiskInput {
            amount: &payment_mandate.payment_mandate_contents.payment_details_total.amount,
            intent: Some(&session.intent),
            payment_response: &payment_mandate.payment_mandate_contents.payment_response,
            payer_id: &session.user.to_string(),
            human_present: true,
            agent_involved: true,
            intent_created_at: session.intent.metadata.as_ref().and_then(|m| m.created_at),
            payment_created_at: now,
            shipping: None,
        });
        tracing::info!(
            session_id,
            %cart_id,
            risk_score = assessment.risk_score,
            indicators = ?assessment.fraud_indicators,
            "assembled payment mandate"
        );

        // Step 8: signed A2A handoff to the processor.
        let payload = PaymentRequestPayload {
            cart_mandate: cart,
            payment_mandate,
            webauthn_assertion: request.webauthn_assertion,
            intent_mandate: Some(session.intent.clone()),
            risk: Some(RiskMetadata {
                risk_score: assessment.risk_score,
                fraud_indicators: assessment.fraud_indicators.clone(),
            }),
        };
        let entity_id = payload
            .payment_mandate
            .payment_mandate_contents
            .payment_mandate_id
            .clone();
        let message = self.signer.build(
            self.processor.clone(),
            MessageKind::PaymentMandate,
            entity_id,
            &payload,
        )?;
        let response = self
            .a2a
            .send(&self.processor_url, &message, self.payment_wait)
            .await?;
        self.verifier.verify(&response).await?;
        let response = into_result(response)?;
        let result: PaymentResult = response
            .payload()
            .map_err(|e| ServiceError::validation(format!("malformed payment result: {e}")))?;

        // The ceremony is spent either way.
        self.sessions.remove(session_id);
        Ok(result)
    }

    async fn fetch_payment_method(&self, user: &Did) -> Result<PaymentMethodResponse, ServiceError> {
        let url = self
            .credential_provider_url
            .join("payment-method")
            .map_err(|e| ServiceError::internal(e.to_string()))?;
        let response = self
            .http
            .post(url)
            .timeout(StdDuration::from_secs(10))
            .json(&serde_json::json!({"user_id": user.name()}))
            .send()
            .await
            .map_err(|e| ServiceError::unavailable(format!("credential provider: {e}")))?;
        if !response.status().is_success() {
            return Err(ServiceError::unavailable(
                "credential provider refused payment method",
            ));
        }
        response
            .json()
            .await
            .map_err(|e| ServiceError::validation(format!("malformed payment method: {e}")))
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
    /// Optional spending ceiling in JPY minor units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<u64>,
    /// Optional SKU allow-list carried into the intent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skus: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CartSummary {
    pub artifact_id: String,
    pub cart_id: String,
    pub merchant_name: String,
    pub total: MoneyAmount,
    pub cart_expiry: DateTime<Utc>,
}

impl CartSummary {
    fn from_artifact(artifact: &CartArtifact) -> Self {
        let contents = &artifact.cart_mandate.contents;
        Self {
            artifact_id: artifact.artifact_id.clone(),
            cart_id: contents.id.clone(),
            merchant_name: contents.merchant_name.clone(),
            total: contents.payment_request.details.total.amount.clone(),
            cart_expiry: contents.cart_expiry,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub status: String,
    pub carts: Vec<CartSummary>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConfirmCartRequest {
    pub cart_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmCartResponse {
    pub session_id: String,
    pub cart_id: String,
    pub total: MoneyAmount,
    /// The WebAuthn challenge for the passkey ceremony; also the KB nonce.
    pub challenge: String,
    pub rp_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthorizePaymentRequest {
    pub webauthn_assertion: WebAuthnAssertion,
}

// ============================================================================
// HTTP surface
// ============================================================================

pub fn router(agent: Arc<ShoppingAgent>) -> Router {
    Router::new()
        .route("/chat", post(post_chat))
        .route("/sessions/{id}/confirm-cart", post(post_confirm_cart))
        .route("/sessions/{id}/authorize-payment", post(post_authorize_payment))
        .with_state(agent)
}

#[instrument(skip_all)]
async fn post_chat(
    State(agent): State<Arc<ShoppingAgent>>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ServiceError> {
    agent.chat(body).await.map(Json)
}

#[instrument(skip_all, fields(session_id = %id))]
async fn post_confirm_cart(
    State(agent): State<Arc<ShoppingAgent>>,
    Path(id): Path<String>,
    Json(body): Json<ConfirmCartRequest>,
) -> Result<Json<ConfirmCartResponse>, ServiceError> {
    agent.confirm_cart(&id, body).map(Json)
}

#[instrument(skip_all, fields(session_id = %id))]
async fn post_authorize_payment(
    State(agent): State<Arc<ShoppingAgent>>,
    Path(id): Path<String>,
    Json(body): Json<AuthorizePaymentRequest>,
) -> Result<Json<PaymentResult>, ServiceError> {
    agent.authorize_payment(&id, body).await.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::PrivateKey;
    use crate::did_resolver::DidResolver;
    use ap2_types::a2a::SignatureAlgorithm;

    fn make_agent() -> ShoppingAgent {
        let identity = Did::agent("shopping_agent");
        let key = Arc::new(PrivateKey::generate(SignatureAlgorithm::Es256));
        let resolver = Arc::new(DidResolver::in_memory());
        ShoppingAgent::new(
            ShoppingAgentConfig {
                identity: identity.clone(),
                merchant_agent: Did::agent("merchant_agent"),
                processor: Did::agent("payment_processor"),
                merchant_agent_url: "http://merchant_agent:8002".parse().unwrap(),
                processor_url: "http://processor:8004".parse().unwrap(),
                credential_provider_url: "http://cp:8005".parse().unwrap(),
                rp_id: "ap2.example".to_string(),
            },
            MessageSigner::new(identity, key),
            MessageVerifier::new(resolver),
        )
    }

    #[test]
    fn test_build_intent_defaults() {
        let agent = make_agent();
        let request = ChatRequest {
            user_id: "hanako".to_string(),
            message: "Buy a red basketball shoe".to_string(),
            max_amount: None,
            skus: None,
        };
        let intent = agent.build_intent(&request, "sess_1");
        assert!(intent.user_cart_confirmation_required);
        assert!(intent.constraints.is_none());
        assert!(intent.intent_expiry > Utc::now() + Duration::hours(23));
        let metadata = intent.metadata.unwrap();
        assert_eq!(metadata.user_id.as_deref(), Some("hanako"));
        assert_eq!(metadata.session_id.as_deref(), Some("sess_1"));
        assert!(metadata.created_at.is_some());
    }

    #[test]
    fn test_build_intent_with_ceiling() {
        let agent = make_agent();
        let request = ChatRequest {
            user_id: "hanako".to_string(),
            message: "Buy a red basketball shoe".to_string(),
            max_amount: Some(5000),
            skus: None,
        };
        let intent = agent.build_intent(&request, "sess_1");
        assert_eq!(intent.max_amount(), Some(&MoneyAmount::jpy(5000)));
    }

    #[test]
    fn test_confirm_cart_unknown_session() {
        let agent = make_agent();
        let error = agent
            .confirm_cart(
                "sess_ghost",
                ConfirmCartRequest {
                    cart_id: "cart_1".to_string(),
                },
            )
            .unwrap_err();
        assert_eq!(error.kind, ap2_types::error::ErrorKind::NotFound);
    }
}
