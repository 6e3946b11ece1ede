//! Payment processor: the verifier of last resort and the system of record.
//!
//! `POST /process` (and the equivalent `ap2.mandates.PaymentMandate` A2A
//! handler) runs the full acceptance pipeline: structure, mandate chain,
//! merchant JWT, user-authorization SD-JWT+KB with WebAuthn, the risk gate,
//! credential verification at the credential provider, the network charge,
//! then a write-once transaction record and a PDF receipt. Verification
//! failures stop the pipeline before any money-moving call and surface as
//! opaque authorization errors.

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::instrument;
use url::Url;

use ap2_types::a2a::{
    A2aMessage, DataPart, MessageKind, PaymentRequestPayload, PaymentResult, PaymentStatus,
};
use ap2_types::did::Did;
use ap2_types::error::ErrorKind;
use ap2_types::mandate::{self, CartMandate};
use ap2_types::money::MoneyAmount;
use ap2_types::timestamp::UnixTimestamp;

use crate::crypto::jwt;
use crate::crypto::sd_jwt;
use crate::did_resolver::{DidDocument, DidResolver};
use crate::error::ServiceError;
use crate::receipt::{ReceiptLine, render_pdf};
use crate::risk::{self, RiskEngine, RiskInput};
use crate::services::credential_provider::{VerifyRequest, VerifyResponse};
use crate::services::network::{ChargeRequest, ChargeResponse};
use crate::store::TtlStore;

/// Timeout on the single charge RPC to the network.
const CHARGE_TIMEOUT: StdDuration = StdDuration::from_secs(30);
/// Consumed KB nonces stay blocked this long.
const NONCE_TTL: StdDuration = StdDuration::from_secs(600);

/// One immutable row of the transaction log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub payment_mandate_id: String,
    pub cart_id: String,
    pub payer: Did,
    pub merchant_agent: Did,
    pub amount: MoneyAmount,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_of: Option<String>,
    pub risk_score: u8,
    pub created_at: DateTime<Utc>,
}

pub struct PaymentProcessor {
    identity: Did,
    resolver: Arc<DidResolver>,
    risk: RiskEngine,
    jti_seen: TtlStore<()>,
    nonce_seen: TtlStore<()>,
    /// Last accepted WebAuthn counter per payer DID.
    counters: DashMap<String, u32>,
    /// Write-once transaction log.
    transactions: DashMap<String, TransactionRecord>,
    receipts: DashMap<String, Vec<u8>>,
    rp_id: String,
    public_base_url: Url,
    credential_provider_url: Url,
    network_url: Url,
    http: reqwest::Client,
}

impl PaymentProcessor {
    pub fn new(
        identity: Did,
        resolver: Arc<DidResolver>,
        rp_id: String,
        public_base_url: Url,
        credential_provider_url: Url,
        network_url: Url,
    ) -> Self {
        Self {
            identity,
            resolver,
            risk: RiskEngine::with_history(),
            jti_seen: TtlStore::new(),
            nonce_seen: TtlStore::new(),
            counters: DashMap::new(),
            transactions: DashMap::new(),
            receipts: DashMap::new(),
            rp_id,
            public_base_url,
            credential_provider_url,
            network_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn identity(&self) -> &Did {
        &self.identity
    }

    /// The full acceptance pipeline for one payment bundle.
    pub async fn process(
        self: &Arc<Self>,
        payload: PaymentRequestPayload,
    ) -> Result<PaymentResult, ServiceError> {
        let now = Utc::now();
        let now_unix = UnixTimestamp::try_now().map_err(|e| ServiceError::internal(e.to_string()))?;
        let cart = &payload.cart_mandate;
        let payment = &payload.payment_mandate;
        let contents = &payment.payment_mandate_contents;

        // 1. Structure.
        let merchant_jwt = cart.merchant_authorization.as_deref().ok_or_else(|| {
            ServiceError::validation("cart mandate is unsigned")
        })?;
        let user_authorization = payment.user_authorization.as_deref().ok_or_else(|| {
            ServiceError::validation("payment mandate carries no user authorization")
        })?;
        if contents.payment_mandate_id.is_empty() {
            return Err(ServiceError::validation("empty payment_mandate_id"));
        }

        // 2. Mandate chain: reference linkage, total equality, cart freshness.
        mandate::validate_mandate_chain(payment, cart, now)?;

        // 3. Merchant authorization.
        self.verify_merchant_authorization(merchant_jwt, cart, now_unix).await?;

        // 4. User authorization.
        let payer = self
            .verify_user_authorization(user_authorization, &payload, now_unix)
            .await?;

        // 5. Risk gate: the agent-supplied score is a floor, the local
        //    recomputation is defence in depth.
        let agent_score = payload.risk.as_ref().map(|r| r.risk_score).unwrap_or(0);
        let local = self.risk.assess(&RiskInput {
            amount: &contents.payment_details_total.amount,
            intent: payload.intent_mandate.as_ref(),
            payment_response: &contents.payment_response,
            payer_id: &payer.to_string(),
            human_present: true,
            agent_involved: true,
            intent_created_at: payload
                .intent_mandate
                .as_ref()
                .and_then(|i| i.metadata.as_ref())
                .and_then(|m| m.created_at),
            payment_created_at: contents.timestamp,
            shipping: None,
        });
        let effective_score = agent_score.max(local.risk_score);
        if risk::exceeds_gate(effective_score) {
            tracing::warn!(
                agent_score,
                local_score = local.risk_score,
                indicators = ?local.fraud_indicators,
                "risk gate declined payment"
            );
            return Ok(self.record_failure(&payload, &payer, effective_score, "High risk"));
        }
        // The recorded score is the one that drove authorization: the
        // agent-supplied figure when present, else the local recomputation.
        let recorded_score = payload
            .risk
            .as_ref()
            .map(|r| r.risk_score)
            .unwrap_or(local.risk_score);

        // 6. Credential verification.
        let credentials = match self.verify_credentials(&payload, &payer).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(detail = %error.detail, "credential verification failed");
                return Ok(self.record_failure(
                    &payload,
                    &payer,
                    effective_score,
                    "Credential verification failed",
                ));
            }
        };

        // 7. Charge.
        let charge = self.charge(&credentials, contents.payment_details_total.amount.clone()).await?;
        if charge.status != "captured" {
            let reason = charge.error.as_deref().unwrap_or("charge failed");
            return Ok(self.record_failure(&payload, &payer, effective_score, reason));
        }

        // 8-10. Persist, render receipt, notify, respond.
        let transaction_id = format!("txn_{}", uuid::Uuid::new_v4().simple());
        let record = TransactionRecord {
            transaction_id: transaction_id.clone(),
            payment_mandate_id: contents.payment_mandate_id.clone(),
            cart_id: cart.contents.id.clone(),
            payer: payer.clone(),
            merchant_agent: contents.merchant_agent.clone(),
            amount: contents.payment_details_total.amount.clone(),
            status: PaymentStatus::Captured,
            network_transaction_id: charge.network_transaction_id,
            authorization_code: charge.authorization_code,
            refund_of: None,
            risk_score: recorded_score,
            created_at: now,
        };
        self.insert_transaction(record.clone())?;
        self.risk
            .record(&payer.to_string(), record.amount.value.get(), now);

        let receipt_url = self.render_receipt(&record);
        self.notify_credential_provider(&record, &receipt_url).await;

        tracing::info!(%transaction_id, cart_id = %record.cart_id, "payment captured");
        Ok(PaymentResult {
            status: PaymentStatus::Captured,
            transaction_id: Some(transaction_id),
            receipt_url: Some(receipt_url),
            error: None,
        })
    }

    async fn verify_merchant_authorization(
        &self,
        merchant_jwt: &str,
        cart: &CartMandate,
        now: UnixTimestamp,
    ) -> Result<(), ServiceError> {
        let parsed = jwt::parse_merchant_jwt(merchant_jwt)?;
        let public_key = self.resolver.resolve_public_key(&parsed.header.kid).await?;
        jwt::verify_merchant_jwt(merchant_jwt, cart, &public_key, &self.jti_seen, now)?;
        Ok(())
    }

    /// Verifies the SD-JWT+KB and consumes its nonce. Returns the payer DID.
    async fn verify_user_authorization(
        &self,
        user_authorization: &str,
        payload: &PaymentRequestPayload,
        now: UnixTimestamp,
    ) -> Result<Did, ServiceError> {
        let cart_hash = mandate::mandate_hash_b64url(&payload.cart_mandate)?;
        let payment_hash =
            mandate::mandate_hash_b64url(&payload.payment_mandate.payment_mandate_contents)?;

        // The issuer JWT names the payer; resolve their key before the
        // expensive checks.
        let issuer_did = peek_issuer_did(user_authorization)?;
        let issuer_key = self.resolver.resolve_primary_key(&issuer_did).await?;

        let stored_count = self
            .counters
            .get(&issuer_did.to_string())
            .map(|c| *c)
            .unwrap_or(0);
        let verified = sd_jwt::verify_user_authorization(
            user_authorization,
            &payload.webauthn_assertion,
            &cart_hash,
            &payment_hash,
            &issuer_key,
            &self.rp_id,
            stored_count,
            now,
        )?;

        if !self
            .nonce_seen
            .insert_once(format!("nonce:{}", verified.kb.nonce), (), NONCE_TTL)
        {
            return Err(ServiceError::new(
                ErrorKind::Conflict,
                "replay",
                "KB nonce already consumed",
            ));
        }
        self.counters
            .insert(issuer_did.to_string(), verified.sign_count);
        Ok(issuer_did)
    }

    async fn verify_credentials(
        &self,
        payload: &PaymentRequestPayload,
        payer: &Did,
    ) -> Result<VerifyResponse, ServiceError> {
        let contents = &payload.payment_mandate.payment_mandate_contents;
        let url = self
            .credential_provider_url
            .join("verify")
            .map_err(|e| ServiceError::internal(e.to_string()))?;
        let response = self
            .http
            .post(url)
            .timeout(StdDuration::from_secs(10))
            .json(&VerifyRequest {
                token: contents.payment_response.details.token.clone(),
                payment_mandate_id: contents.payment_mandate_id.clone(),
                payer_id: payer.to_string(),
                amount: contents.payment_details_total.amount.clone(),
            })
            .send()
            .await
            .map_err(|e| ServiceError::unavailable(format!("credential provider: {e}")))?;
        if !response.status().is_success() {
            return Err(ServiceError::new(
                ErrorKind::Authentication,
                "credential_verification_failed",
                format!("credential provider returned {}", response.status()),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| ServiceError::validation(format!("malformed verify response: {e}")))
    }

    async fn charge(
        &self,
        credentials: &VerifyResponse,
        amount: MoneyAmount,
    ) -> Result<ChargeResponse, ServiceError> {
        let url = self
            .network_url
            .join("network/charge")
            .map_err(|e| ServiceError::internal(e.to_string()))?;
        let response = self
            .http
            .post(url)
            .timeout(CHARGE_TIMEOUT)
            .json(&ChargeRequest {
                agent_token: credentials.agent_token.clone(),
                amount,
            })
            .send()
            .await
            .map_err(|e| ServiceError::unavailable(format!("network charge: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| ServiceError::validation(format!("malformed charge response: {e}")))
    }

    fn record_failure(
        &self,
        payload: &PaymentRequestPayload,
        payer: &Did,
        risk_score: u8,
        reason: &str,
    ) -> PaymentResult {
        let contents = &payload.payment_mandate.payment_mandate_contents;
        let transaction_id = format!("txn_{}", uuid::Uuid::new_v4().simple());
        let record = TransactionRecord {
            transaction_id: transaction_id.clone(),
            payment_mandate_id: contents.payment_mandate_id.clone(),
            cart_id: payload.cart_mandate.contents.id.clone(),
            payer: payer.clone(),
            merchant_agent: contents.merchant_agent.clone(),
            amount: contents.payment_details_total.amount.clone(),
            status: PaymentStatus::Failed,
            network_transaction_id: None,
            authorization_code: None,
            refund_of: None,
            risk_score,
            created_at: Utc::now(),
        };
        // A clashing id here would mean a uuid collision; log and move on.
        if let Err(error) = self.insert_transaction(record) {
            tracing::error!(detail = %error.detail, "failed to record declined transaction");
        }
        PaymentResult {
            status: PaymentStatus::Failed,
            transaction_id: Some(transaction_id),
            receipt_url: None,
            error: Some(reason.to_string()),
        }
    }

    fn insert_transaction(&self, record: TransactionRecord) -> Result<(), ServiceError> {
        use dashmap::mapref::entry::Entry;
        match self.transactions.entry(record.transaction_id.clone()) {
            Entry::Occupied(_) => Err(ServiceError::conflict(format!(
                "transaction already recorded: {}",
                record.transaction_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    fn render_receipt(&self, record: &TransactionRecord) -> String {
        let pdf = render_pdf(
            "AP2 Payment Receipt",
            &[
                ReceiptLine {
                    label: "Transaction".to_string(),
                    value: record.transaction_id.clone(),
                },
                ReceiptLine {
                    label: "Cart".to_string(),
                    value: record.cart_id.clone(),
                },
                ReceiptLine {
                    label: "Payer".to_string(),
                    value: record.payer.to_string(),
                },
                ReceiptLine {
                    label: "Merchant agent".to_string(),
                    value: record.merchant_agent.to_string(),
                },
                ReceiptLine {
                    label: "Total".to_string(),
                    value: record.amount.to_string(),
                },
                ReceiptLine {
                    label: "Authorization".to_string(),
                    value: record.authorization_code.clone().unwrap_or_default(),
                },
                ReceiptLine {
                    label: "Date".to_string(),
                    value: record.created_at.to_rfc3339(),
                },
            ],
        );
        self.receipts.insert(record.transaction_id.clone(), pdf);
        self.public_base_url
            .join(&format!("receipts/{}.pdf", record.transaction_id))
            .map(|u| u.to_string())
            .unwrap_or_default()
    }

    async fn notify_credential_provider(&self, record: &TransactionRecord, receipt_url: &str) {
        let Ok(url) = self.credential_provider_url.join("receipt") else {
            return;
        };
        let body = serde_json::json!({
            "transaction_id": record.transaction_id,
            "receipt_url": receipt_url,
            "amount": record.amount,
        });
        if let Err(error) = self
            .http
            .post(url)
            .timeout(StdDuration::from_secs(5))
            .json(&body)
            .send()
            .await
        {
            tracing::warn!(%error, "receipt notification failed");
        }
    }

    pub fn transaction(&self, id: &str) -> Option<TransactionRecord> {
        self.transactions.get(id).map(|r| r.clone())
    }

    pub fn receipt_pdf(&self, id: &str) -> Option<Vec<u8>> {
        self.receipts.get(id).map(|r| r.clone())
    }

    /// `POST /refund`: records a refund referencing a captured transaction.
    /// The original row is never mutated; the refund is its own record.
    pub fn refund(&self, transaction_id: &str) -> Result<TransactionRecord, ServiceError> {
        let original = self
            .transaction(transaction_id)
            .ok_or_else(|| ServiceError::not_found(format!("unknown transaction: {transaction_id}")))?;
        if original.status != PaymentStatus::Captured {
            return Err(ServiceError::conflict("only captured transactions can be refunded"));
        }
        let already_refunded = self
            .transactions
            .iter()
            .any(|r| r.refund_of.as_deref() == Some(transaction_id));
        if already_refunded {
            return Err(ServiceError::conflict("transaction already refunded"));
        }
        let refund = TransactionRecord {
            transaction_id: format!("txn_{}", uuid::Uuid::new_v4().simple()),
            payment_mandate_id: original.payment_mandate_id.clone(),
            cart_id: original.cart_id.clone(),
            payer: original.payer.clone(),
            merchant_agent: original.merchant_agent.clone(),
            amount: original.amount.clone(),
            status: PaymentStatus::Refunded,
            network_transaction_id: original.network_transaction_id.clone(),
            authorization_code: None,
            refund_of: Some(original.transaction_id.clone()),
            risk_score: original.risk_score,
            created_at: Utc::now(),
        };
        self.insert_transaction(refund.clone())?;
        tracing::info!(refund_id = %refund.transaction_id, original = %transaction_id, "refund recorded");
        Ok(refund)
    }
}

/// Reads the issuer DID out of an SD-JWT without verifying it; verification
/// follows once the key is resolved.
fn peek_issuer_did(user_authorization: &str) -> Result<Did, ServiceError> {
    let issuer_jwt = user_authorization
        .split('~')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::validation("malformed user_authorization"))?;
    let claims_b64 = issuer_jwt
        .split('.')
        .nth(1)
        .ok_or_else(|| ServiceError::validation("malformed issuer JWT"))?;
    let bytes = crate::crypto::b64::decode(claims_b64)
        .map_err(|_| ServiceError::validation("malformed issuer JWT"))?;
    #[derive(Deserialize)]
    struct IssOnly {
        iss: Did,
    }
    let claims: IssOnly = serde_json::from_slice(&bytes)
        .map_err(|_| ServiceError::validation("malformed issuer JWT claims"))?;
    Ok(claims.iss)
}

// ============================================================================
// HTTP surface
// ============================================================================

pub struct ProcessorState {
    pub processor: Arc<PaymentProcessor>,
    pub endpoint: crate::a2a::A2aEndpoint,
    pub did_document: DidDocument,
}

pub fn router(state: Arc<ProcessorState>) -> Router {
    Router::new()
        .route("/process", post(post_process))
        .route("/refund", post(post_refund))
        .route("/transactions/{id}", get(get_transaction))
        .route("/receipts/{id}", get(get_receipt))
        .route("/a2a/message", post(post_a2a_message))
        .route("/.well-known/did.json", get(get_did_document))
        .with_state(state)
}

/// Registers the PaymentMandate handler on a registry bound to `processor`.
pub fn register_handlers(
    registry: &mut crate::a2a::HandlerRegistry,
    processor: Arc<PaymentProcessor>,
) {
    registry.register(MessageKind::PaymentMandate, move |part: DataPart| {
        let processor = Arc::clone(&processor);
        async move {
            let payload: PaymentRequestPayload = serde_json::from_value(part.payload)
                .map_err(|e| ServiceError::validation(format!("malformed payment payload: {e}")))?;
            let result = processor.process(payload).await?;
            Ok(DataPart {
                kind: MessageKind::PaymentResult,
                id: part.id,
                payload: serde_json::to_value(&result)
                    .map_err(|e| ServiceError::internal(e.to_string()))?,
            })
        }
    });
}

#[instrument(skip_all)]
async fn post_process(
    State(state): State<Arc<ProcessorState>>,
    Json(body): Json<PaymentRequestPayload>,
) -> Result<Json<PaymentResult>, ServiceError> {
    state.processor.process(body).await.map(Json)
}

#[derive(Debug, Deserialize)]
struct RefundRequest {
    transaction_id: String,
}

#[instrument(skip_all)]
async fn post_refund(
    State(state): State<Arc<ProcessorState>>,
    Json(body): Json<RefundRequest>,
) -> Result<Json<TransactionRecord>, ServiceError> {
    state.processor.refund(&body.transaction_id).map(Json)
}

#[instrument(skip_all, fields(transaction_id = %id))]
async fn get_transaction(
    State(state): State<Arc<ProcessorState>>,
    Path(id): Path<String>,
) -> Result<Json<TransactionRecord>, ServiceError> {
    state
        .processor
        .transaction(&id)
        .map(Json)
        .ok_or_else(|| ServiceError::not_found(format!("unknown transaction: {id}")))
}

#[instrument(skip_all)]
async fn get_receipt(
    State(state): State<Arc<ProcessorState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let id = id.strip_suffix(".pdf").unwrap_or(&id).to_string();
    let pdf = state
        .processor
        .receipt_pdf(&id)
        .ok_or_else(|| ServiceError::not_found(format!("no receipt for {id}")))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/pdf")],
        pdf,
    ))
}

#[instrument(skip_all)]
async fn post_a2a_message(
    State(state): State<Arc<ProcessorState>>,
    Json(message): Json<A2aMessage>,
) -> Result<Json<A2aMessage>, ServiceError> {
    state.endpoint.dispatch(message).await.map(Json)
}

#[instrument(skip_all)]
async fn get_did_document(State(state): State<Arc<ProcessorState>>) -> Json<DidDocument> {
    Json(state.did_document.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::b64;

    fn make_processor() -> Arc<PaymentProcessor> {
        Arc::new(PaymentProcessor::new(
            Did::agent("payment_processor"),
            Arc::new(DidResolver::in_memory()),
            "ap2.example".to_string(),
            "http://processor:8004".parse().unwrap(),
            "http://cp:8005".parse().unwrap(),
            "http://network:8006".parse().unwrap(),
        ))
    }

    fn captured_record(id: &str) -> TransactionRecord {
        TransactionRecord {
            transaction_id: id.to_string(),
            payment_mandate_id: "pm_1".to_string(),
            cart_id: "cart_1".to_string(),
            payer: Did::user("hanako"),
            merchant_agent: Did::agent("merchant_agent"),
            amount: MoneyAmount::jpy(9300),
            status: PaymentStatus::Captured,
            network_transaction_id: Some("net_txn_1".to_string()),
            authorization_code: Some("AUTH01".to_string()),
            refund_of: None,
            risk_score: 25,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_peek_issuer_did() {
        let claims = b64::encode(br#"{"iss":"did:ap2:user:hanako","sub":"did:ap2:user:hanako"}"#);
        let authorization = format!("hdr.{claims}.sig~kbhdr.kbclaims.kbsig~");
        assert_eq!(peek_issuer_did(&authorization).unwrap(), Did::user("hanako"));
        assert!(peek_issuer_did("~~").is_err());
        assert!(peek_issuer_did("onlyonesegment").is_err());
    }

    #[test]
    fn test_transaction_log_write_once() {
        let processor = make_processor();
        processor.insert_transaction(captured_record("txn_1")).unwrap();
        let error = processor.insert_transaction(captured_record("txn_1")).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Conflict);
    }

    #[test]
    fn test_refund_references_original() {
        let processor = make_processor();
        processor.insert_transaction(captured_record("txn_1")).unwrap();
        let refund = processor.refund("txn_1").unwrap();
        assert_eq!(refund.status, PaymentStatus::Refunded);
        assert_eq!(refund.refund_of.as_deref(), Some("txn_1"));
        // Original row untouched.
        assert_eq!(processor.transaction("txn_1").unwrap().status, PaymentStatus::Captured);
        // Double refund conflicts.
        assert_eq!(processor.refund("txn_1").unwrap_err().kind, ErrorKind::Conflict);
    }

    #[test]
    fn test_refund_requires_captured() {
        let processor = make_processor();
        let mut failed = captured_record("txn_failed");
        failed.status = PaymentStatus::Failed;
        processor.insert_transaction(failed).unwrap();
        assert_eq!(processor.refund("txn_failed").unwrap_err().kind, ErrorKind::Conflict);
        assert_eq!(processor.refund("txn_ghost").unwrap_err().kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_receipt_rendered_and_served() {
        let processor = make_processor();
        let record = captured_record("txn_1");
        let url = processor.render_receipt(&record);
        assert!(url.ends_with("/receipts/txn_1.pdf"));
        let pdf = processor.receipt_pdf("txn_1").unwrap();
        assert!(pdf.starts_with(b"%PDF"));
    }
}
