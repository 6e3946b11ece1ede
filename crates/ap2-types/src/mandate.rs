//! The AP2 mandate chain: IntentMandate, CartMandate, PaymentMandate.
//!
//! Mandates are content-addressed: a mandate's hash is the SHA-256 of its
//! RFC 8785 canonical JSON with the signature-bearing fields removed, so the
//! hash of a cart is identical before and after the merchant attaches its
//! authorization JWT. Downstream layers bind to these hashes — the merchant
//! JWT carries `cart_hash`, the user-authorization key-binding JWT carries
//! `[cart_hash, payment_hash]` — which is what makes tampering detectable at
//! every hop.
//!
//! Mandates reference each other only downstream (Intent ← Cart ← Payment);
//! there are no back-pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical::{self, CanonicalizationError};
use crate::did::Did;
use crate::money::MoneyAmount;
use crate::payment::{PaymentItem, PaymentRequest, PaymentResponse};

/// `dataPart.type` for an IntentMandate payload.
pub const INTENT_MANDATE_DATA_KEY: &str = "ap2.mandates.IntentMandate";
/// `dataPart.type` for a CartMandate payload.
pub const CART_MANDATE_DATA_KEY: &str = "ap2.mandates.CartMandate";
/// `dataPart.type` for a PaymentMandate payload.
pub const PAYMENT_MANDATE_DATA_KEY: &str = "ap2.mandates.PaymentMandate";

/// Fields stripped before hashing so pre- and post-signature hashes coincide.
const SIGNATURE_FIELDS: [&str; 3] = [
    "merchant_signature",
    "merchant_authorization",
    "user_authorization",
];

/// Internal bookkeeping attached to a mandate by its issuer. Hashed along with
/// the rest of the mandate; never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MandateMetadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<Did>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Optional hard limits the user placed on the purchase.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntentConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<MoneyAmount>,
}

/// What a user wants to buy, in their own words plus machine constraints.
///
/// Created once by the shopping agent at user request and immutable
/// thereafter. With the default `user_cart_confirmation_required = true` the
/// intent itself carries no signature; the user authorizes at cart time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMandate {
    pub natural_language_description: String,
    pub user_cart_confirmation_required: bool,
    /// Merchant DIDs allowed to fulfil the intent; `None` means any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchants: Option<Vec<Did>>,
    /// Product SKUs allowed; `None` means any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skus: Option<Vec<String>>,
    #[serde(default)]
    pub requires_refundability: bool,
    pub intent_expiry: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<IntentConstraints>,
    #[serde(rename = "_metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MandateMetadata>,
}

impl IntentMandate {
    pub fn max_amount(&self) -> Option<&MoneyAmount> {
        self.constraints.as_ref().and_then(|c| c.max_amount.as_ref())
    }
}

/// What a merchant commits to sell: items, prices, and acceptable methods,
/// valid until `cart_expiry` (typically 15 minutes out).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartContents {
    pub id: String,
    pub user_cart_confirmation_required: bool,
    pub payment_request: PaymentRequest,
    pub cart_expiry: DateTime<Utc>,
    pub merchant_name: String,
    #[serde(rename = "_metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MandateMetadata>,
}

impl CartContents {
    pub fn total(&self) -> &PaymentItem {
        &self.payment_request.details.total
    }
}

/// A cart plus, once the merchant has signed, the merchant-authorization JWT.
/// `contents` is frozen the moment the JWT is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartMandate {
    pub contents: CartContents,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_authorization: Option<String>,
}

impl CartMandate {
    pub fn unsigned(contents: CartContents) -> Self {
        Self {
            contents,
            merchant_authorization: None,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.merchant_authorization.is_some()
    }
}

/// What is about to be charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMandateContents {
    pub payment_mandate_id: String,
    /// The `payment_request.details.id` of the referenced cart.
    pub payment_details_id: String,
    /// Copy of the signed cart's total; chain validation checks the copy.
    pub payment_details_total: PaymentItem,
    pub payment_response: PaymentResponse,
    /// DID of the merchant agent that produced the cart.
    pub merchant_agent: Did,
    pub timestamp: DateTime<Utc>,
}

/// Payment instruction plus, once the user has approved via passkey, the
/// SD-JWT+KB user authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMandate {
    pub payment_mandate_contents: PaymentMandateContents,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_authorization: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MandateError {
    #[error(transparent)]
    Canonicalization(#[from] CanonicalizationError),
    #[error("mandate chain broken: {0}")]
    ChainBroken(&'static str),
    #[error("cart expired at {0}")]
    CartExpired(DateTime<Utc>),
    #[error("cart mandate invalid: {0}")]
    InvalidCart(&'static str),
}

/// SHA-256 over the canonical form of `mandate` with the signature fields
/// removed at the top level. Returns the raw digest; see [`mandate_hash_hex`]
/// and [`mandate_hash_b64url`] for the two claim encodings.
pub fn mandate_hash<T: Serialize>(mandate: &T) -> Result<[u8; 32], MandateError> {
    let mut tree = serde_json::to_value(mandate).map_err(CanonicalizationError::from)?;
    if let Some(map) = tree.as_object_mut() {
        for field in SIGNATURE_FIELDS {
            map.remove(field);
        }
    }
    let canonical = canonical::value_to_canonical_json(&tree)?;
    Ok(Sha256::digest(&canonical).into())
}

/// Hex encoding of [`mandate_hash`], used for logs and API-level comparison.
pub fn mandate_hash_hex<T: Serialize>(mandate: &T) -> Result<String, MandateError> {
    Ok(hex::encode(mandate_hash(mandate)?))
}

/// Base64url (no padding) encoding of [`mandate_hash`], the form carried in
/// JWT claims (`cart_hash`, `transaction_data`).
pub fn mandate_hash_b64url<T: Serialize>(mandate: &T) -> Result<String, MandateError> {
    use base64::Engine;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(mandate_hash(mandate)?))
}

/// The `cart_hash` bound into the merchant-authorization JWT.
pub fn cart_hash(cart: &CartMandate) -> Result<[u8; 32], MandateError> {
    mandate_hash(cart)
}

/// The `payment_hash` bound into the user-authorization KB JWT. Computed over
/// the contents only; `user_authorization` sits outside this struct and the
/// envelope-level risk metadata is never part of the hash.
pub fn payment_hash(contents: &PaymentMandateContents) -> Result<[u8; 32], MandateError> {
    mandate_hash(contents)
}

/// Structural checks every recipient of a CartMandate applies before trusting
/// it: non-empty id, a fresh expiry, and line items consistent with the total.
pub fn validate_cart_mandate(cart: &CartMandate, now: DateTime<Utc>) -> Result<(), MandateError> {
    let contents = &cart.contents;
    if contents.id.is_empty() {
        return Err(MandateError::InvalidCart("empty cart id"));
    }
    if contents.cart_expiry < now {
        return Err(MandateError::CartExpired(contents.cart_expiry));
    }
    let details = &contents.payment_request.details;
    let total = &details.total.amount;
    if !details.display_items.is_empty() {
        let mut sum: u64 = 0;
        for item in &details.display_items {
            if item.amount.currency != total.currency {
                return Err(MandateError::InvalidCart("display item currency mismatch"));
            }
            sum = sum.saturating_add(item.amount.value.get());
        }
        if sum != total.value.get() {
            return Err(MandateError::InvalidCart("display items do not sum to total"));
        }
    }
    Ok(())
}

/// Chain validation between a PaymentMandate and the CartMandate it charges:
/// the payment must reference the cart's details, copy its total exactly
/// (value and currency), and the cart must still be fresh.
pub fn validate_mandate_chain(
    payment: &PaymentMandate,
    cart: &CartMandate,
    now: DateTime<Utc>,
) -> Result<(), MandateError> {
    let contents = &payment.payment_mandate_contents;
    if contents.payment_details_id != cart.contents.payment_request.details.id {
        return Err(MandateError::ChainBroken(
            "payment_details_id does not reference the cart",
        ));
    }
    let cart_total = &cart.contents.payment_request.details.total.amount;
    let paid_total = &contents.payment_details_total.amount;
    if paid_total != cart_total {
        return Err(MandateError::ChainBroken("total differs from signed cart"));
    }
    if cart.contents.cart_expiry < now {
        return Err(MandateError::CartExpired(cart.contents.cart_expiry));
    }
    Ok(())
}
