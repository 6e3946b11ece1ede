//! Merchant signing service: the single trusted holder of a merchant's key.
//!
//! Every unsigned CartMandate a merchant agent submits runs through a small
//! state machine:
//!
//! ```text
//! NEW --validate--> VALIDATED
//!   VALIDATED --[auto mode]--> SIGNED
//!   VALIDATED --[manual mode]--> PENDING
//!   PENDING --operator approve--> SIGNED
//!   PENDING --operator reject--> REJECTED
//!   PENDING --expiry--> EXPIRED
//! any --validation failure--> REJECTED
//! ```
//!
//! Signing computes the cart hash over the unsigned mandate and attaches the
//! merchant-authorization JWT; `contents` is never touched, so the hash a
//! downstream verifier recomputes matches the one in the JWT.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

use ap2_types::did::Did;
use ap2_types::error::ErrorKind;
use ap2_types::mandate::{self, CartMandate};
use ap2_types::money::MoneyAmount;
use ap2_types::timestamp::UnixTimestamp;

use crate::crypto::jwt;
use crate::crypto::keys::PrivateKey;
use crate::did_resolver::DidDocument;
use crate::error::ServiceError;

/// How long a pending cart may wait for an operator before expiring, unless
/// the cart itself expires sooner.
const PENDING_CAP: Duration = Duration::minutes(15);

/// Whether carts are signed immediately or parked for operator approval.
/// Selected by `MERCHANT_AI_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone)]
enum CartState {
    Pending {
        cart: CartMandate,
        deadline: DateTime<Utc>,
    },
    Signed {
        cart: CartMandate,
    },
    Rejected {
        reason: String,
    },
    Expired,
}

/// Wire status values shared by `/sign/cart` and `/poll/cart`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartSignStatus {
    Signed,
    PendingMerchantSignature,
    Rejected,
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignCartRequest {
    pub cart_mandate: CartMandate,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollCartRequest {
    pub cart_mandate_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CartSignResponse {
    pub status: CartSignStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_mandate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_cart_mandate: Option<CartMandate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PendingCartSummary {
    pub cart_mandate_id: String,
    pub merchant_name: String,
    pub total: MoneyAmount,
    pub deadline: DateTime<Utc>,
}

pub struct MerchantService {
    identity: Did,
    key: Arc<PrivateKey>,
    mode: SignMode,
    table: DashMap<String, CartState>,
    did_document: DidDocument,
}

impl MerchantService {
    pub fn new(identity: Did, key: Arc<PrivateKey>, mode: SignMode, did_document: DidDocument) -> Self {
        Self {
            identity,
            key,
            mode,
            table: DashMap::new(),
            did_document,
        }
    }

    pub fn identity(&self) -> &Did {
        &self.identity
    }

    /// `POST /sign/cart`: validate, then sign now (auto) or park (manual).
    pub fn sign_cart(&self, cart: CartMandate) -> Result<CartSignResponse, ServiceError> {
        let now = Utc::now();
        self.validate(&cart, now)?;
        let cart_id = cart.contents.id.clone();

        match self.mode {
            SignMode::Auto => {
                let signed = self.attach_authorization(cart)?;
                self.table.insert(cart_id.clone(), CartState::Signed { cart: signed.clone() });
                tracing::info!(%cart_id, "cart signed (auto mode)");
                Ok(CartSignResponse {
                    status: CartSignStatus::Signed,
                    cart_mandate_id: Some(cart_id),
                    signed_cart_mandate: Some(signed),
                    reason: None,
                })
            }
            SignMode::Manual => {
                let deadline = (now + PENDING_CAP).min(cart.contents.cart_expiry);
                self.table
                    .insert(cart_id.clone(), CartState::Pending { cart, deadline });
                tracing::info!(%cart_id, %deadline, "cart parked for operator approval");
                Ok(CartSignResponse {
                    status: CartSignStatus::PendingMerchantSignature,
                    cart_mandate_id: Some(cart_id),
                    signed_cart_mandate: None,
                    reason: None,
                })
            }
        }
    }

    /// `POST /poll/cart`: current state, transitioning PENDING to EXPIRED
    /// lazily when its deadline has passed.
    pub fn poll(&self, cart_id: &str) -> Result<CartSignResponse, ServiceError> {
        self.expire_if_due(cart_id);
        let state = self
            .table
            .get(cart_id)
            .ok_or_else(|| ServiceError::not_found(format!("unknown cart: {cart_id}")))?;
        Ok(match state.value() {
            CartState::Pending { .. } => CartSignResponse {
                status: CartSignStatus::PendingMerchantSignature,
                cart_mandate_id: Some(cart_id.to_string()),
                signed_cart_mandate: None,
                reason: None,
            },
            CartState::Signed { cart } => CartSignResponse {
                status: CartSignStatus::Signed,
                cart_mandate_id: Some(cart_id.to_string()),
                signed_cart_mandate: Some(cart.clone()),
                reason: None,
            },
            CartState::Rejected { reason } => CartSignResponse {
                status: CartSignStatus::Rejected,
                cart_mandate_id: Some(cart_id.to_string()),
                signed_cart_mandate: None,
                reason: Some(reason.clone()),
            },
            CartState::Expired => CartSignResponse {
                status: CartSignStatus::Expired,
                cart_mandate_id: Some(cart_id.to_string()),
                signed_cart_mandate: None,
                reason: Some("approval window elapsed".to_string()),
            },
        })
    }

    /// Operator approval of a pending cart. Terminal states conflict.
    pub fn approve(&self, cart_id: &str) -> Result<CartSignResponse, ServiceError> {
        self.expire_if_due(cart_id);
        let pending = {
            let state = self
                .table
                .get(cart_id)
                .ok_or_else(|| ServiceError::not_found(format!("unknown cart: {cart_id}")))?;
            match state.value() {
                CartState::Pending { cart, .. } => cart.clone(),
                _ => {
                    return Err(ServiceError::conflict("cart is not pending"));
                }
            }
        };
        let signed = self.attach_authorization(pending)?;
        self.table
            .insert(cart_id.to_string(), CartState::Signed { cart: signed.clone() });
        tracing::info!(%cart_id, "cart approved by operator");
        Ok(CartSignResponse {
            status: CartSignStatus::Signed,
            cart_mandate_id: Some(cart_id.to_string()),
            signed_cart_mandate: Some(signed),
            reason: None,
        })
    }

    /// Operator rejection of a pending cart.
    pub fn reject(&self, cart_id: &str, reason: String) -> Result<CartSignResponse, ServiceError> {
        self.expire_if_due(cart_id);
        {
            let state = self
                .table
                .get(cart_id)
                .ok_or_else(|| ServiceError::not_found(format!("unknown cart: {cart_id}")))?;
            if !matches!(state.value(), CartState::Pending { .. }) {
                return Err(ServiceError::conflict("cart is not pending"));
            }
        }
        self.table
            .insert(cart_id.to_string(), CartState::Rejected { reason: reason.clone() });
        tracing::info!(%cart_id, %reason, "cart rejected by operator");
        Ok(CartSignResponse {
            status: CartSignStatus::Rejected,
            cart_mandate_id: Some(cart_id.to_string()),
            signed_cart_mandate: None,
            reason: Some(reason),
        })
    }

    /// Carts currently awaiting operator action.
    pub fn pending(&self) -> Vec<PendingCartSummary> {
        let now = Utc::now();
        self.table
            .iter()
            .filter_map(|entry| match entry.value() {
                CartState::Pending { cart, deadline } if *deadline > now => {
                    Some(PendingCartSummary {
                        cart_mandate_id: cart.contents.id.clone(),
                        merchant_name: cart.contents.merchant_name.clone(),
                        total: cart.contents.total().amount.clone(),
                        deadline: *deadline,
                    })
                }
                _ => None,
            })
            .collect()
    }

    fn expire_if_due(&self, cart_id: &str) {
        let now = Utc::now();
        let due = match self.table.get(cart_id) {
            Some(entry) => {
                matches!(entry.value(), CartState::Pending { deadline, .. } if *deadline <= now)
            }
            None => false,
        };
        if due {
            self.table.insert(cart_id.to_string(), CartState::Expired);
            tracing::info!(%cart_id, "pending cart expired");
        }
    }

    /// Validation per the state machine: this merchant's cart, unexpired,
    /// internally consistent totals, not yet signed.
    fn validate(&self, cart: &CartMandate, now: DateTime<Utc>) -> Result<(), ServiceError> {
        if cart.is_signed() {
            return Err(ServiceError::conflict("cart already carries an authorization"));
        }
        let merchant_id = cart
            .contents
            .metadata
            .as_ref()
            .and_then(|m| m.merchant_id.as_ref());
        if merchant_id != Some(&self.identity) {
            return Err(ServiceError::new(
                ErrorKind::Validation,
                "wrong_merchant",
                format!("cart addressed to {merchant_id:?}, this service is {}", self.identity),
            ));
        }
        mandate::validate_cart_mandate(cart, now).map_err(ServiceError::from)
    }

    fn attach_authorization(&self, mut cart: CartMandate) -> Result<CartMandate, ServiceError> {
        let cart_hash = mandate::mandate_hash_b64url(&cart)?;
        let now = UnixTimestamp::try_now().map_err(|e| ServiceError::internal(e.to_string()))?;
        let token = jwt::issue_merchant_jwt(&self.key, &self.identity, &cart_hash, now)?;
        cart.merchant_authorization = Some(token);
        Ok(cart)
    }
}

// ============================================================================
// Client side: sign with bounded polling
// ============================================================================

/// Per-cart outcome of a signing attempt, as seen by a merchant agent.
#[derive(Debug)]
pub enum CartSignRequestOutcome {
    Signed(CartMandate),
    Rejected(String),
    TimedOut,
    Failed(String),
}

/// Submits `cart` to a merchant signing service and, when the service is in
/// manual mode, polls `/poll/cart` at `interval` until `cap` elapses. Each
/// cart's wait is independent; transient poll failures are retried until the
/// deadline, terminal states return immediately.
pub async fn sign_cart_with_polling(
    http: &reqwest::Client,
    merchant_url: &url::Url,
    cart: CartMandate,
    interval: std::time::Duration,
    cap: std::time::Duration,
) -> CartSignRequestOutcome {
    let sign_url = match merchant_url.join("sign/cart") {
        Ok(url) => url,
        Err(e) => return CartSignRequestOutcome::Failed(e.to_string()),
    };
    let response = match http
        .post(sign_url)
        .json(&SignCartRequest { cart_mandate: cart })
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => return CartSignRequestOutcome::Failed(e.to_string()),
    };
    if !response.status().is_success() {
        let detail = response
            .json::<ap2_types::error::ErrorBody>()
            .await
            .map(|b| b.detail)
            .unwrap_or_else(|_| "sign request refused".to_string());
        return CartSignRequestOutcome::Rejected(detail);
    }
    let body: CartSignResponse = match response.json().await {
        Ok(body) => body,
        Err(e) => return CartSignRequestOutcome::Failed(e.to_string()),
    };
    let cart_id = match (body.status, body.signed_cart_mandate, body.cart_mandate_id) {
        (CartSignStatus::Signed, Some(signed), _) => return CartSignRequestOutcome::Signed(signed),
        (CartSignStatus::Rejected, _, _) => {
            return CartSignRequestOutcome::Rejected(
                body.reason.unwrap_or_else(|| "rejected".to_string()),
            );
        }
        (CartSignStatus::Expired, _, _) => return CartSignRequestOutcome::TimedOut,
        (CartSignStatus::PendingMerchantSignature, _, Some(cart_id)) => cart_id,
        _ => return CartSignRequestOutcome::Failed("malformed sign response".to_string()),
    };

    let poll_url = match merchant_url.join("poll/cart") {
        Ok(url) => url,
        Err(e) => return CartSignRequestOutcome::Failed(e.to_string()),
    };
    let deadline = tokio::time::Instant::now() + cap;
    loop {
        tokio::time::sleep(interval).await;
        if tokio::time::Instant::now() >= deadline {
            return CartSignRequestOutcome::TimedOut;
        }
        let response = match http
            .post(poll_url.clone())
            .json(&PollCartRequest {
                cart_mandate_id: cart_id.clone(),
            })
            .send()
            .await
        {
            Ok(response) => response,
            Err(_) => continue,
        };
        let Ok(body) = response.json::<CartSignResponse>().await else {
            continue;
        };
        match (body.status, body.signed_cart_mandate) {
            (CartSignStatus::Signed, Some(signed)) => {
                return CartSignRequestOutcome::Signed(signed);
            }
            (CartSignStatus::Rejected, _) => {
                return CartSignRequestOutcome::Rejected(
                    body.reason.unwrap_or_else(|| "rejected".to_string()),
                );
            }
            (CartSignStatus::Expired, _) => return CartSignRequestOutcome::TimedOut,
            _ => {}
        }
    }
}

// ============================================================================
// HTTP surface
// ============================================================================

pub fn router(service: Arc<MerchantService>) -> Router {
    Router::new()
        .route("/sign/cart", post(post_sign_cart))
        .route("/poll/cart", post(post_poll_cart))
        .route("/pending", get(get_pending))
        .route("/approve/{id}", post(post_approve))
        .route("/reject/{id}", post(post_reject))
        .route("/.well-known/did.json", get(get_did_document))
        .with_state(service)
}

#[instrument(skip_all)]
async fn post_sign_cart(
    State(service): State<Arc<MerchantService>>,
    Json(body): Json<SignCartRequest>,
) -> Result<Json<CartSignResponse>, ServiceError> {
    service.sign_cart(body.cart_mandate).map(Json)
}

#[instrument(skip_all)]
async fn post_poll_cart(
    State(service): State<Arc<MerchantService>>,
    Json(body): Json<PollCartRequest>,
) -> Result<Json<CartSignResponse>, ServiceError> {
    service.poll(&body.cart_mandate_id).map(Json)
}

#[instrument(skip_all)]
async fn get_pending(
    State(service): State<Arc<MerchantService>>,
) -> Json<Vec<PendingCartSummary>> {
    Json(service.pending())
}

#[derive(Debug, Default, Deserialize)]
struct RejectBody {
    #[serde(default)]
    reason: Option<String>,
}

#[instrument(skip_all, fields(cart_id = %id))]
async fn post_approve(
    State(service): State<Arc<MerchantService>>,
    Path(id): Path<String>,
) -> Result<Json<CartSignResponse>, ServiceError> {
    service.approve(&id).map(Json)
}

#[instrument(skip_all, fields(cart_id = %id))]
async fn post_reject(
    State(service): State<Arc<MerchantService>>,
    Path(id): Path<String>,
    body: Option<Json<RejectBody>>,
) -> Result<Json<CartSignResponse>, ServiceError> {
    let reason = body
        .and_then(|b| b.0.reason)
        .unwrap_or_else(|| "rejected by operator".to_string());
    service.reject(&id, reason).map(Json)
}

#[instrument(skip_all)]
async fn get_did_document(State(service): State<Arc<MerchantService>>) -> Json<DidDocument> {
    Json(service.did_document.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::jwt::verify_merchant_jwt;
    use crate::store::TtlStore;
    use ap2_types::a2a::SignatureAlgorithm;
    use ap2_types::mandate::{CartContents, MandateMetadata};
    use ap2_types::payment::{
        PaymentDetails, PaymentItem, PaymentMethodData, PaymentRequest, AP2_PAYMENT_METHOD,
    };

    fn make_service(mode: SignMode) -> Arc<MerchantService> {
        let identity = Did::merchant("mugi_shoten");
        let key = Arc::new(PrivateKey::generate(SignatureAlgorithm::Es256));
        let document = DidDocument::for_identity(&identity, &key.public_key(), None).unwrap();
        Arc::new(MerchantService::new(identity, key, mode, document))
    }

    fn make_cart(service: &MerchantService, id: &str) -> CartMandate {
        CartMandate::unsigned(CartContents {
            id: id.to_string(),
            user_cart_confirmation_required: true,
            payment_request: PaymentRequest {
                method_data: vec![PaymentMethodData {
                    supported_methods: AP2_PAYMENT_METHOD.to_string(),
                    data: None,
                }],
                details: PaymentDetails {
                    id: format!("details_{id}"),
                    display_items: vec![
                        PaymentItem::new("Red Basketball Shoe", MoneyAmount::jpy(8000)),
                        PaymentItem::new("Tax (10%)", MoneyAmount::jpy(800)),
                        PaymentItem::new("Shipping", MoneyAmount::jpy(500)),
                    ],
                    total: PaymentItem::new("Total", MoneyAmount::jpy(9300)),
                    modifiers: None,
                },
            },
            cart_expiry: Utc::now() + Duration::minutes(15),
            merchant_name: "Mugi Shoten".to_string(),
            metadata: Some(MandateMetadata {
                id: id.to_string(),
                merchant_id: Some(service.identity().clone()),
                ..Default::default()
            }),
        })
    }

    #[test]
    fn test_auto_mode_signs_synchronously() {
        let service = make_service(SignMode::Auto);
        let cart = make_cart(&service, "cart_auto");
        let response = service.sign_cart(cart.clone()).unwrap();
        assert_eq!(response.status, CartSignStatus::Signed);

        let signed = response.signed_cart_mandate.unwrap();
        assert!(signed.is_signed());
        // Contents untouched; JWT verifies against the signed mandate (P1/P4).
        assert_eq!(signed.contents, cart.contents);
        let jti_seen = TtlStore::new();
        let now = UnixTimestamp::try_now().unwrap();
        verify_merchant_jwt(
            signed.merchant_authorization.as_ref().unwrap(),
            &signed,
            &service.key.public_key(),
            &jti_seen,
            now,
        )
        .unwrap();
    }

    #[test]
    fn test_manual_mode_parks_then_approves() {
        let service = make_service(SignMode::Manual);
        let cart = make_cart(&service, "cart_manual");
        let response = service.sign_cart(cart).unwrap();
        assert_eq!(response.status, CartSignStatus::PendingMerchantSignature);
        assert_eq!(service.pending().len(), 1);

        let polled = service.poll("cart_manual").unwrap();
        assert_eq!(polled.status, CartSignStatus::PendingMerchantSignature);

        let approved = service.approve("cart_manual").unwrap();
        assert_eq!(approved.status, CartSignStatus::Signed);
        assert!(approved.signed_cart_mandate.unwrap().is_signed());
        assert!(service.pending().is_empty());

        // Approving a terminal cart conflicts.
        let error = service.approve("cart_manual").unwrap_err();
        assert_eq!(error.kind, ErrorKind::Conflict);
    }

    #[test]
    fn test_manual_mode_reject() {
        let service = make_service(SignMode::Manual);
        service.sign_cart(make_cart(&service, "cart_rej")).unwrap();
        let rejected = service.reject("cart_rej", "out of stock".to_string()).unwrap();
        assert_eq!(rejected.status, CartSignStatus::Rejected);
        let polled = service.poll("cart_rej").unwrap();
        assert_eq!(polled.status, CartSignStatus::Rejected);
        assert_eq!(polled.reason.as_deref(), Some("out of stock"));
    }

    #[test]
    fn test_wrong_merchant_rejected() {
        let service = make_service(SignMode::Auto);
        let mut cart = make_cart(&service, "cart_wrong");
        cart.contents.metadata.as_mut().unwrap().merchant_id = Some(Did::merchant("impostor"));
        let error = service.sign_cart(cart).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_expired_cart_rejected_at_validation() {
        let service = make_service(SignMode::Auto);
        let mut cart = make_cart(&service, "cart_expired");
        cart.contents.cart_expiry = Utc::now() - Duration::minutes(1);
        let error = service.sign_cart(cart).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Authorization);
    }

    #[test]
    fn test_pending_expires_at_deadline() {
        let service = make_service(SignMode::Manual);
        let mut cart = make_cart(&service, "cart_short");
        // Cart expiry in the past-adjacent future so the pending deadline is due.
        cart.contents.cart_expiry = Utc::now() + Duration::milliseconds(5);
        service.sign_cart(cart).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let polled = service.poll("cart_short").unwrap();
        assert_eq!(polled.status, CartSignStatus::Expired);
        // Operator action after expiry conflicts.
        assert_eq!(service.approve("cart_short").unwrap_err().kind, ErrorKind::Conflict);
    }

    #[test]
    fn test_unknown_cart_not_found() {
        let service = make_service(SignMode::Manual);
        assert_eq!(service.poll("ghost").unwrap_err().kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_double_sign_conflicts() {
        let service = make_service(SignMode::Auto);
        let cart = make_cart(&service, "cart_double");
        let signed = service.sign_cart(cart).unwrap().signed_cart_mandate.unwrap();
        let error = service.sign_cart(signed).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Conflict);
    }
}
