//! Credential provider: custodian of user payment credentials and passkeys.
//!
//! Three jobs:
//!
//! 1. **Passkey registration** — issue a short-lived challenge, then store the
//!    device's COSE public key and initial signature counter.
//! 2. **Payment methods** — hand the shopping agent a tokenized method (never
//!    card data) plus a fresh issuer JWT signed with the user's custodial
//!    identity key, which carries the device key as `cnf.jwk`.
//! 3. **Credential verification** — elevate a payment-method token into a
//!    network agent token when the processor asks.
//!
//! User identity keys are generated here on first registration and their DID
//! documents pushed into the resolver (and the shared registry directory when
//! configured), so any verifier can resolve `did:ap2:user:*`.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::instrument;
use url::Url;

use ap2_types::did::Did;
use ap2_types::error::ErrorKind;
use ap2_types::money::MoneyAmount;
use ap2_types::timestamp::UnixTimestamp;

use crate::crypto::b64;
use crate::crypto::keys::PrivateKey;
use crate::crypto::sd_jwt;
use crate::crypto::webauthn;
use crate::did_resolver::{DidResolver, register_identity};
use crate::error::ServiceError;
use crate::services::network::{TokenizeRequest, TokenizeResponse};
use crate::store::TtlStore;

/// WebAuthn registration/assertion challenges.
pub const CHALLENGE_TTL: StdDuration = StdDuration::from_secs(60);
/// Payment-method tokens handed to shopping agents.
pub const PAYMENT_METHOD_TOKEN_TTL: StdDuration = StdDuration::from_secs(900);

#[derive(Debug, Clone)]
struct UserRecord {
    cose_public_key: Vec<u8>,
    sign_count: u32,
    card_brand: String,
}

#[derive(Debug, Clone)]
struct PaymentMethodRecord {
    user_did: Did,
    card_brand: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptNotice {
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<MoneyAmount>,
    pub received_at: DateTime<Utc>,
}

pub struct CredentialProvider {
    identity: Did,
    rp_id: String,
    user_keys: DashMap<String, Arc<PrivateKey>>,
    users: DashMap<String, UserRecord>,
    challenges: TtlStore<()>,
    payment_method_tokens: TtlStore<PaymentMethodRecord>,
    receipts: DashMap<String, ReceiptNotice>,
    resolver: Arc<DidResolver>,
    registry_dir: Option<PathBuf>,
    network_url: Url,
    http: reqwest::Client,
}

impl CredentialProvider {
    pub fn new(
        identity: Did,
        rp_id: String,
        resolver: Arc<DidResolver>,
        registry_dir: Option<PathBuf>,
        network_url: Url,
    ) -> Self {
        Self {
            identity,
            rp_id,
            user_keys: DashMap::new(),
            users: DashMap::new(),
            challenges: TtlStore::new(),
            payment_method_tokens: TtlStore::new(),
            receipts: DashMap::new(),
            resolver,
            registry_dir,
            network_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn identity(&self) -> &Did {
        &self.identity
    }

    fn user_did(user_id: &str) -> Did {
        Did::user(user_id)
    }

    /// Ensures the user has a custodial identity key with a resolvable DID.
    fn ensure_user_key(&self, user: &Did) -> Result<Arc<PrivateKey>, ServiceError> {
        if let Some(key) = self.user_keys.get(&user.to_string()) {
            return Ok(key.clone());
        }
        let key = Arc::new(PrivateKey::generate(ap2_types::a2a::SignatureAlgorithm::Es256));
        let document = register_identity(&self.resolver, user, &key)?;
        if let Some(dir) = &self.registry_dir {
            let path = dir.join(format!("{}_did.json", user.name()));
            if let Err(error) = std::fs::create_dir_all(dir)
                .and_then(|_| std::fs::write(&path, serde_json::to_vec(&document)?))
            {
                tracing::warn!(%error, path = %path.display(), "failed to publish user DID document");
            }
        }
        self.user_keys.insert(user.to_string(), key.clone());
        Ok(key)
    }

    /// `POST /register-passkey`: begin the registration ceremony.
    pub fn register_passkey(&self, user_id: &str) -> Result<RegisterPasskeyResponse, ServiceError> {
        if user_id.is_empty() {
            return Err(ServiceError::validation("empty user_id"));
        }
        let user = Self::user_did(user_id);
        self.ensure_user_key(&user)?;
        let challenge = sd_jwt::new_nonce();
        self.challenges
            .insert(format!("reg:{user}:{challenge}"), (), CHALLENGE_TTL);
        Ok(RegisterPasskeyResponse {
            user_did: user,
            challenge,
            rp_id: self.rp_id.clone(),
        })
    }

    /// `POST /complete-registration`: store the attested device key.
    pub fn complete_registration(
        &self,
        request: CompleteRegistrationRequest,
    ) -> Result<CompleteRegistrationResponse, ServiceError> {
        let user = Self::user_did(&request.user_id);
        if self
            .challenges
            .remove(&format!("reg:{user}:{}", request.challenge))
            .is_none()
        {
            return Err(ServiceError::new(
                ErrorKind::Authentication,
                "authentication_failed",
                "unknown or expired registration challenge",
            ));
        }
        let cose_public_key = b64::decode(&request.cose_public_key)
            .map_err(|_| ServiceError::validation("cose_public_key is not base64url"))?;
        // Must parse as an EC2 key now; failing at payment time would be far
        // worse for the user.
        webauthn::cose_key_to_jwk(&cose_public_key).map_err(ServiceError::from)?;
        self.users.insert(
            user.to_string(),
            UserRecord {
                cose_public_key,
                sign_count: request.sign_count,
                card_brand: "Visa".to_string(),
            },
        );
        tracing::info!(%user, "passkey registered");
        Ok(CompleteRegistrationResponse {
            user_did: user,
            status: "registered".to_string(),
        })
    }

    /// `POST /payment-method`: a tokenized method plus the fresh issuer JWT
    /// the shopping agent needs for SD-JWT+KB assembly.
    pub fn payment_method(&self, user_id: &str) -> Result<PaymentMethodResponse, ServiceError> {
        let user = Self::user_did(user_id);
        let record = self
            .users
            .get(&user.to_string())
            .map(|r| r.clone())
            .ok_or_else(|| ServiceError::not_found(format!("no registered passkey for {user}")))?;
        let key = self.ensure_user_key(&user)?;

        let token = format!("tok_pm_{}", uuid::Uuid::new_v4().simple());
        self.payment_method_tokens.insert(
            token.clone(),
            PaymentMethodRecord {
                user_did: user.clone(),
                card_brand: record.card_brand.clone(),
            },
            PAYMENT_METHOD_TOKEN_TTL,
        );

        let jwk = webauthn::cose_key_to_jwk(&record.cose_public_key)?;
        let now = UnixTimestamp::try_now().map_err(|e| ServiceError::internal(e.to_string()))?;
        let issuer_jwt = sd_jwt::issue_issuer_jwt(&key, &user, jwk, now)?;

        Ok(PaymentMethodResponse {
            user_did: user,
            card_brand: record.card_brand,
            token,
            tokenized: true,
            cose_public_key: b64::encode(&record.cose_public_key),
            issuer_jwt,
        })
    }

    /// `POST /verify`: the processor's credential check. Consumes the
    /// payment-method token and returns a network agent token.
    pub async fn verify(&self, request: VerifyRequest) -> Result<VerifyResponse, ServiceError> {
        let record = self.payment_method_tokens.remove(&request.token).ok_or_else(|| {
            ServiceError::new(
                ErrorKind::Authentication,
                "credential_verification_failed",
                format!("unknown or expired payment-method token: {}", request.token),
            )
        })?;
        if record.user_did.to_string() != request.payer_id {
            return Err(ServiceError::new(
                ErrorKind::Authentication,
                "credential_verification_failed",
                "token does not belong to payer",
            ));
        }

        let tokenize_url = self
            .network_url
            .join("network/tokenize")
            .map_err(|e| ServiceError::internal(e.to_string()))?;
        let response = self
            .http
            .post(tokenize_url)
            .timeout(StdDuration::from_secs(10))
            .json(&TokenizeRequest {
                payment_mandate_id: request.payment_mandate_id,
                payer_id: request.payer_id,
                amount: request.amount,
                payment_method_token: request.token,
            })
            .send()
            .await
            .map_err(|e| ServiceError::unavailable(format!("network tokenize: {e}")))?;
        if !response.status().is_success() {
            return Err(ServiceError::unavailable("network refused tokenization"));
        }
        let issued: TokenizeResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::validation(format!("malformed tokenize response: {e}")))?;

        Ok(VerifyResponse {
            payment_method_id: format!("pm_{}_{}", record.card_brand.to_lowercase(), record.user_did.name()),
            agent_token: issued.agent_token,
        })
    }

    /// `POST /receipt`: the processor's post-capture notification.
    pub fn receipt(&self, notice: ReceiptRequest) -> ReceiptResponse {
        let stored = ReceiptNotice {
            transaction_id: notice.transaction_id.clone(),
            receipt_url: notice.receipt_url,
            amount: notice.amount,
            received_at: Utc::now(),
        };
        self.receipts.insert(notice.transaction_id, stored);
        ReceiptResponse {
            status: "received".to_string(),
        }
    }

    #[cfg(test)]
    pub fn receipt_count(&self) -> usize {
        self.receipts.len()
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterPasskeyRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterPasskeyResponse {
    pub user_did: Did,
    pub challenge: String,
    pub rp_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CompleteRegistrationRequest {
    pub user_id: String,
    pub challenge: String,
    /// Base64url CBOR COSE key from the authenticator.
    pub cose_public_key: String,
    #[serde(default)]
    pub sign_count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteRegistrationResponse {
    pub user_did: Did,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentMethodResponse {
    pub user_did: Did,
    pub card_brand: String,
    pub token: String,
    pub tokenized: bool,
    pub cose_public_key: String,
    pub issuer_jwt: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VerifyRequest {
    pub token: String,
    pub payment_mandate_id: String,
    pub payer_id: String,
    pub amount: MoneyAmount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub payment_method_id: String,
    pub agent_token: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ReceiptRequest {
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<MoneyAmount>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiptResponse {
    pub status: String,
}

// ============================================================================
// HTTP surface
// ============================================================================

pub fn router(provider: Arc<CredentialProvider>) -> Router {
    Router::new()
        .route("/register-passkey", post(post_register_passkey))
        .route("/complete-registration", post(post_complete_registration))
        .route("/payment-method", post(post_payment_method))
        .route("/verify", post(post_verify))
        .route("/receipt", post(post_receipt))
        .with_state(provider)
}

#[instrument(skip_all)]
async fn post_register_passkey(
    State(provider): State<Arc<CredentialProvider>>,
    Json(body): Json<RegisterPasskeyRequest>,
) -> Result<Json<RegisterPasskeyResponse>, ServiceError> {
    provider.register_passkey(&body.user_id).map(Json)
}

#[instrument(skip_all)]
async fn post_complete_registration(
    State(provider): State<Arc<CredentialProvider>>,
    Json(body): Json<CompleteRegistrationRequest>,
) -> Result<Json<CompleteRegistrationResponse>, ServiceError> {
    provider.complete_registration(body).map(Json)
}

#[derive(Debug, Deserialize)]
struct PaymentMethodRequest {
    user_id: String,
}

#[instrument(skip_all)]
async fn post_payment_method(
    State(provider): State<Arc<CredentialProvider>>,
    Json(body): Json<PaymentMethodRequest>,
) -> Result<Json<PaymentMethodResponse>, ServiceError> {
    provider.payment_method(&body.user_id).map(Json)
}

#[instrument(skip_all)]
async fn post_verify(
    State(provider): State<Arc<CredentialProvider>>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ServiceError> {
    provider.verify(body).await.map(Json)
}

#[instrument(skip_all)]
async fn post_receipt(
    State(provider): State<Arc<CredentialProvider>>,
    Json(body): Json<ReceiptRequest>,
) -> Json<ReceiptResponse> {
    Json(provider.receipt(body))
}
