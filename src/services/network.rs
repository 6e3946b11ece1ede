//! Simulated payment network: tokenization and charge authorization.
//!
//! No funds move, but the artifact shapes match a real network: agent tokens
//! of the form `agent_tok_<network>_<uuid8>_<rand>` with a TTL'd token store,
//! token verification metadata, and charge authorizations with an
//! authorization code. A charge against an invalid or expired token returns
//! `status: "failed"` in the body, not an HTTP error.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::instrument;

use ap2_types::money::MoneyAmount;

use crate::error::ServiceError;
use crate::store::TtlStore;

/// Agent token lifetime.
pub const AGENT_TOKEN_TTL: StdDuration = StdDuration::from_secs(3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTokenData {
    pub payment_mandate_id: String,
    pub payer_id: String,
    pub amount: MoneyAmount,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TokenizeRequest {
    pub payment_mandate_id: String,
    pub payer_id: String,
    pub amount: MoneyAmount,
    /// The credential provider's payment-method token being elevated.
    pub payment_method_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenizeResponse {
    pub agent_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VerifyTokenRequest {
    pub agent_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyTokenResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_info: Option<AgentTokenData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChargeRequest {
    pub agent_token: String,
    pub amount: MoneyAmount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChargeResponse {
    /// `captured` or `failed`; failures are in-band, never transport errors.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChargeResponse {
    fn failed(error: &str) -> Self {
        Self {
            status: "failed".to_string(),
            network_transaction_id: None,
            authorization_code: None,
            error: Some(error.to_string()),
        }
    }
}

pub struct PaymentNetwork {
    name: String,
    tokens: TtlStore<AgentTokenData>,
}

impl PaymentNetwork {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tokens: TtlStore::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Issues an agent token for a verified payment method.
    pub fn tokenize(&self, request: TokenizeRequest) -> Result<TokenizeResponse, ServiceError> {
        if request.payment_method_token.is_empty() {
            return Err(ServiceError::validation("empty payment_method_token"));
        }
        use rand::RngCore;
        let mut entropy = [0u8; 18];
        rand::rng().fill_bytes(&mut entropy);
        let agent_token = format!(
            "agent_tok_{}_{}_{}",
            self.name.to_lowercase(),
            &uuid::Uuid::new_v4().simple().to_string()[..8],
            crate::crypto::b64::encode(entropy),
        );
        let now = Utc::now();
        let expires_at = now + Duration::from_std(AGENT_TOKEN_TTL).unwrap_or(Duration::hours(1));
        let data = AgentTokenData {
            payment_mandate_id: request.payment_mandate_id,
            payer_id: request.payer_id,
            amount: request.amount,
            issued_at: now,
            expires_at,
        };
        self.tokens.insert(agent_token.clone(), data, AGENT_TOKEN_TTL);
        tracing::info!(token_prefix = &agent_token[..24], %expires_at, "issued agent token");
        Ok(TokenizeResponse {
            agent_token,
            expires_at,
        })
    }

    pub fn verify_token(&self, agent_token: &str) -> VerifyTokenResponse {
        match self.tokens.get(agent_token) {
            Some(data) => VerifyTokenResponse {
                valid: true,
                token_info: Some(data),
                error: None,
            },
            None => VerifyTokenResponse {
                valid: false,
                token_info: None,
                error: Some("agent token not found or expired".to_string()),
            },
        }
    }

    /// Authorizes a charge against a live agent token. The token is consumed:
    /// charging is at most once per tokenization.
    pub fn charge(&self, request: ChargeRequest) -> ChargeResponse {
        let Some(data) = self.tokens.get(&request.agent_token) else {
            return ChargeResponse::failed("agent token not found or expired");
        };
        if data.amount != request.amount {
            return ChargeResponse::failed("amount differs from tokenized amount");
        }
        self.tokens.remove(&request.agent_token);
        let transaction_id = format!("net_txn_{}", uuid::Uuid::new_v4().simple());
        let authorization_code = format!("AUTH{}", &uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase());
        tracing::info!(%transaction_id, "charge captured");
        ChargeResponse {
            status: "captured".to_string(),
            network_transaction_id: Some(transaction_id),
            authorization_code: Some(authorization_code),
            error: None,
        }
    }
}

// ============================================================================
// HTTP surface
// ============================================================================

pub fn router(network: Arc<PaymentNetwork>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/network/info", get(get_info))
        .route("/network/tokenize", post(post_tokenize))
        .route("/network/verify-token", post(post_verify_token))
        .route("/network/charge", post(post_charge))
        .with_state(network)
}

#[instrument(skip_all)]
async fn get_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[instrument(skip_all)]
async fn get_info(State(network): State<Arc<PaymentNetwork>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "network": network.name(),
        "simulated": true,
        "agent_token_ttl_secs": AGENT_TOKEN_TTL.as_secs(),
    }))
}

#[instrument(skip_all)]
async fn post_tokenize(
    State(network): State<Arc<PaymentNetwork>>,
    Json(body): Json<TokenizeRequest>,
) -> Result<Json<TokenizeResponse>, ServiceError> {
    network.tokenize(body).map(Json)
}

#[instrument(skip_all)]
async fn post_verify_token(
    State(network): State<Arc<PaymentNetwork>>,
    Json(body): Json<VerifyTokenRequest>,
) -> Json<VerifyTokenResponse> {
    Json(network.verify_token(&body.agent_token))
}

#[instrument(skip_all)]
async fn post_charge(
    State(network): State<Arc<PaymentNetwork>>,
    Json(body): Json<ChargeRequest>,
) -> Json<ChargeResponse> {
    Json(network.charge(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(network: &PaymentNetwork, amount: u64) -> TokenizeResponse {
        network
            .tokenize(TokenizeRequest {
                payment_mandate_id: "pm_1".to_string(),
                payer_id: "did:ap2:user:hanako".to_string(),
                amount: MoneyAmount::jpy(amount),
                payment_method_token: "tok_card_1".to_string(),
            })
            .unwrap()
    }

    #[test]
    fn test_tokenize_shape() {
        let network = PaymentNetwork::new("SimNet");
        let issued = tokenize(&network, 9300);
        assert!(issued.agent_token.starts_with("agent_tok_simnet_"));
        assert!(issued.expires_at > Utc::now());
    }

    #[test]
    fn test_verify_token_roundtrip() {
        let network = PaymentNetwork::new("SimNet");
        let issued = tokenize(&network, 9300);
        let verified = network.verify_token(&issued.agent_token);
        assert!(verified.valid);
        assert_eq!(verified.token_info.unwrap().amount, MoneyAmount::jpy(9300));

        let missing = network.verify_token("agent_tok_simnet_nope");
        assert!(!missing.valid);
        assert!(missing.error.is_some());
    }

    #[test]
    fn test_charge_happy_path() {
        let network = PaymentNetwork::new("SimNet");
        let issued = tokenize(&network, 9300);
        let charged = network.charge(ChargeRequest {
            agent_token: issued.agent_token,
            amount: MoneyAmount::jpy(9300),
        });
        assert_eq!(charged.status, "captured");
        assert!(charged.network_transaction_id.is_some());
        assert!(charged.authorization_code.is_some());
    }

    #[test]
    fn test_charge_invalid_token_fails_in_band() {
        let network = PaymentNetwork::new("SimNet");
        let charged = network.charge(ChargeRequest {
            agent_token: "agent_tok_simnet_bogus".to_string(),
            amount: MoneyAmount::jpy(9300),
        });
        assert_eq!(charged.status, "failed");
        assert!(charged.error.is_some());
    }

    #[test]
    fn test_charge_amount_mismatch_fails() {
        let network = PaymentNetwork::new("SimNet");
        let issued = tokenize(&network, 9300);
        let charged = network.charge(ChargeRequest {
            agent_token: issued.agent_token,
            amount: MoneyAmount::jpy(1),
        });
        assert_eq!(charged.status, "failed");
    }

    #[test]
    fn test_token_consumed_by_charge() {
        let network = PaymentNetwork::new("SimNet");
        let issued = tokenize(&network, 9300);
        let first = network.charge(ChargeRequest {
            agent_token: issued.agent_token.clone(),
            amount: MoneyAmount::jpy(9300),
        });
        assert_eq!(first.status, "captured");
        let second = network.charge(ChargeRequest {
            agent_token: issued.agent_token,
            amount: MoneyAmount::jpy(9300),
        });
        assert_eq!(second.status, "failed");
    }
}
