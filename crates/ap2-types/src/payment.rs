//! W3C Payment Request API shapes embedded in AP2 mandates.
//!
//! Cart mandates carry a `PaymentRequest` describing what the merchant will
//! accept; payment mandates carry a `PaymentResponse` describing the tokenized
//! method the user selected. The response shape has no field a primary
//! account number or security code could travel in (PCI DSS 3.2.2: nothing
//! sensitive in transported or persisted state).

use serde::{Deserialize, Serialize};

use crate::money::MoneyAmount;

/// The AP2 payment-method identifier carried in `methodName`.
pub const AP2_PAYMENT_METHOD: &str = "https://a2a-protocol.org/payment-methods/ap2-payment";

/// A single labelled line in a payment request: a display item, the tax line,
/// the shipping line, or the total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentItem {
    pub label: String,
    pub amount: MoneyAmount,
    /// Set while the amount is not yet final (unused by the demo flows).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
}

impl PaymentItem {
    pub fn new<L: Into<String>>(label: L, amount: MoneyAmount) -> Self {
        Self {
            label: label.into(),
            amount,
            pending: None,
        }
    }
}

/// One payment method a merchant accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethodData {
    pub supported_methods: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// The items, total, and optional modifiers of a payment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    /// Unique id for these details, referenced by `payment_details_id`.
    pub id: String,
    #[serde(default)]
    pub display_items: Vec<PaymentItem>,
    pub total: PaymentItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifiers: Option<Vec<PaymentModifier>>,
}

/// A per-method price adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentModifier {
    pub supported_methods: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<PaymentItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_display_items: Option<Vec<PaymentItem>>,
}

/// What a merchant commits to accept for a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub method_data: Vec<PaymentMethodData>,
    pub details: PaymentDetails,
}

/// The tokenized payment method selected by the user.
///
/// `token` is an opaque reference held by the credential provider; the card
/// itself never appears here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodDetails {
    pub card_brand: String,
    pub token: String,
    pub tokenized: bool,
}

/// W3C-like payment response carried inside `PaymentMandateContents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub request_id: String,
    pub method_name: String,
    pub details: PaymentMethodDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer_email: Option<String>,
}

impl PaymentResponse {
    /// A tokenized AP2 payment response for the given method details.
    pub fn tokenized<R: Into<String>>(request_id: R, card_brand: &str, token: &str) -> Self {
        Self {
            request_id: request_id.into(),
            method_name: AP2_PAYMENT_METHOD.to_string(),
            details: PaymentMethodDetails {
                card_brand: card_brand.to_string(),
                token: token.to_string(),
                tokenized: true,
            },
            payer_name: None,
            payer_email: None,
        }
    }
}
