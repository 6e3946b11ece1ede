//! Merchant agent: turns an IntentMandate into signed cart candidates.
//!
//! Pipeline per incoming intent: keyword analysis (deterministic — the
//! rule-based minimum an LLM front-end may later replace), catalog search,
//! inventory check, rule-based cart planning (cheapest / balanced /
//! single-item), cart mandate assembly with 10 % tax and flat 500 JPY
//! shipping, then a parallel signing fan-out against the merchant signing
//! service. Every sign request that comes back pending gets its own bounded
//! poll loop (5 s interval, 270 s cap — strictly inside the shopping agent's
//! 300 s wait). Carts succeed or fail independently; only the signed subset
//! is returned, in completion order, as an unordered artifact bag.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::task::JoinSet;
use tracing::instrument;
use url::Url;

use ap2_types::a2a::{A2aMessage, CartArtifact, CartCandidates, DataPart, MessageKind};
use ap2_types::did::Did;
use ap2_types::mandate::{CartContents, CartMandate, IntentMandate, MandateMetadata};
use ap2_types::money::MoneyAmount;
use ap2_types::payment::{
    AP2_PAYMENT_METHOD, PaymentDetails, PaymentItem, PaymentMethodData, PaymentRequest,
};

use crate::a2a::A2aEndpoint;
use crate::catalog::{Catalog, Product};
use crate::did_resolver::DidDocument;
use crate::error::ServiceError;
use crate::services::merchant::{CartSignRequestOutcome, sign_cart_with_polling};

/// Tax applied to every cart, in percent.
const TAX_RATE_PERCENT: u64 = 10;
/// Flat shipping per cart.
const SHIPPING_JPY: u64 = 500;
/// Carts are guaranteed for this long once priced.
const CART_VALIDITY: Duration = Duration::minutes(15);
/// Catalog search width.
const SEARCH_LIMIT: usize = 20;

/// Default cadence of the per-cart signature poll loop.
pub const SIGN_POLL_INTERVAL: StdDuration = StdDuration::from_secs(5);
/// Hard cap on one cart's wait for a signature.
pub const SIGN_POLL_CAP: StdDuration = StdDuration::from_secs(270);

pub struct MerchantAgent {
    identity: Did,
    merchant: Did,
    merchant_name: String,
    merchant_url: Url,
    pub catalog: Catalog,
    http: reqwest::Client,
    poll_interval: StdDuration,
    poll_cap: StdDuration,
}

impl MerchantAgent {
    pub fn new(identity: Did, merchant: Did, merchant_name: String, merchant_url: Url) -> Self {
        Self {
            identity,
            merchant,
            merchant_name,
            merchant_url,
            catalog: Catalog::demo(),
            http: reqwest::Client::new(),
            poll_interval: SIGN_POLL_INTERVAL,
            poll_cap: SIGN_POLL_CAP,
        }
    }

    /// Shrinks the poll cadence; tests exercise timeout paths in milliseconds.
    pub fn with_poll_timing(mut self, interval: StdDuration, cap: StdDuration) -> Self {
        self.poll_interval = interval;
        self.poll_cap = cap;
        self
    }

    pub fn identity(&self) -> &Did {
        &self.identity
    }

    /// The full pipeline for one intent.
    pub async fn cart_candidates(
        self: &Arc<Self>,
        intent: &IntentMandate,
    ) -> Result<CartCandidates, ServiceError> {
        if intent.natural_language_description.trim().is_empty() {
            return Err(ServiceError::validation("empty intent description"));
        }
        if intent.intent_expiry < Utc::now() {
            return Err(ServiceError::validation("intent already expired"));
        }
        if let Some(allowed) = &intent.merchants {
            if !allowed.contains(&self.merchant) {
                tracing::info!(merchant = %self.merchant, "intent excludes this merchant");
                return Ok(CartCandidates::default());
            }
        }

        let keywords = analyze_intent(&intent.natural_language_description);
        let mut products: Vec<&Product> = self.catalog.search(&keywords, None, SEARCH_LIMIT);
        if let Some(skus) = &intent.skus {
            products.retain(|p| skus.contains(&p.sku));
        }
        if intent.requires_refundability {
            products.retain(|p| p.refundable);
        }
        products.retain(|p| self.catalog.in_stock(&p.id));
        if products.is_empty() {
            return Ok(CartCandidates::default());
        }

        let plans = plan_carts(&products, intent.max_amount());
        tracing::info!(
            keywords = ?keywords,
            products = products.len(),
            plans = plans.len(),
            "planned carts for intent"
        );

        // Fan out one signing task per plan; each polls independently and the
        // artifact list fills in completion order.
        let mut tasks = JoinSet::new();
        for plan in plans {
            let cart = self.build_cart_mandate(&plan);
            let agent = Arc::clone(self);
            tasks.spawn(async move {
                let cart_id = cart.contents.id.clone();
                let outcome = sign_cart_with_polling(
                    &agent.http,
                    &agent.merchant_url,
                    cart,
                    agent.poll_interval,
                    agent.poll_cap,
                )
                .await;
                (cart_id, plan.label, outcome)
            });
        }

        let mut artifacts = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((cart_id, label, outcome)) = joined else {
                continue;
            };
            match outcome {
                CartSignRequestOutcome::Signed(cart) => {
                    artifacts.push(CartArtifact {
                        artifact_id: format!("artifact_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
                        cart_mandate: cart,
                    });
                }
                CartSignRequestOutcome::Rejected(reason) => {
                    tracing::warn!(%cart_id, label, %reason, "cart rejected by merchant");
                }
                CartSignRequestOutcome::TimedOut => {
                    tracing::warn!(%cart_id, label, "signature wait timed out");
                }
                CartSignRequestOutcome::Failed(detail) => {
                    tracing::warn!(%cart_id, label, %detail, "sign request failed");
                }
            }
        }
        Ok(CartCandidates { artifacts })
    }

    /// Assembles the unsigned CartMandate for a plan.
    pub fn build_cart_mandate(&self, plan: &CartPlan) -> CartMandate {
        let quantity = plan.quantity as u64;
        let subtotal = plan.product.price.value.get() * quantity;
        let tax = subtotal * TAX_RATE_PERCENT / 100;
        let total = subtotal + tax + SHIPPING_JPY;
        let cart_id = format!("cart_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);

        let item_label = if quantity > 1 {
            format!("{} x{quantity}", plan.product.name)
        } else {
            plan.product.name.clone()
        };
        CartMandate::unsigned(CartContents {
            id: cart_id.clone(),
            user_cart_confirmation_required: true,
            payment_request: PaymentRequest {
                method_data: vec![PaymentMethodData {
                    supported_methods: AP2_PAYMENT_METHOD.to_string(),
                    data: None,
                }],
                details: PaymentDetails {
                    id: format!("details_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
                    display_items: vec![
                        PaymentItem::new(item_label, MoneyAmount::jpy(subtotal)),
                        PaymentItem::new(format!("Tax ({TAX_RATE_PERCENT}%)"), MoneyAmount::jpy(tax)),
                        PaymentItem::new("Shipping", MoneyAmount::jpy(SHIPPING_JPY)),
                    ],
                    total: PaymentItem::new("Total", MoneyAmount::jpy(total)),
                    modifiers: None,
                },
            },
            cart_expiry: Utc::now() + CART_VALIDITY,
            merchant_name: self.merchant_name.clone(),
            metadata: Some(MandateMetadata {
                id: cart_id,
                merchant_id: Some(self.merchant.clone()),
                created_at: Some(Utc::now()),
                ..Default::default()
            }),
        })
    }
}

/// One planned cart: a product, a quantity, and the rule that chose it.
#[derive(Debug, Clone)]
pub struct CartPlan {
    pub label: &'static str,
    pub product: Product,
    pub quantity: u32,
}

/// Deterministic keyword extraction: punctuation-stripped lowercase tokens of
/// length ≥ 2, with a small rule list folding generic nouns into
/// catalog-friendly terms. Order-preserving, deduplicated.
pub fn analyze_intent(description: &str) -> Vec<String> {
    let mut keywords = Vec::new();
    for raw in description.split_whitespace() {
        let token: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-')
            .collect::<String>()
            .to_lowercase();
        if token.chars().count() < 2 {
            continue;
        }
        let token = match token.as_str() {
            "goods" | "items" | "stuff" | "things" | "something" => "product".to_string(),
            "sneakers" | "sneaker" | "trainers" => "shoe".to_string(),
            other => other.to_string(),
        };
        if !keywords.contains(&token) {
            keywords.push(token);
        }
    }
    keywords
}

/// Rule-based planning: cheapest, balanced (median price), and single-item
/// (best search rank). Plans over the intent's max_amount are dropped when a
/// compliant plan exists; otherwise the cheapest plan is proposed anyway and
/// the authorization layer decides.
pub fn plan_carts(products: &[&Product], max_amount: Option<&MoneyAmount>) -> Vec<CartPlan> {
    let mut by_price: Vec<&Product> = products.to_vec();
    by_price.sort_by_key(|p| p.price.value.get());

    let mut plans: Vec<CartPlan> = Vec::new();
    let mut push_unique = |label: &'static str, product: &Product| {
        if !plans.iter().any(|p| p.product.id == product.id) {
            plans.push(CartPlan {
                label,
                product: product.clone(),
                quantity: 1,
            });
        }
    };
    if let Some(cheapest) = by_price.first() {
        push_unique("cheapest", cheapest);
    }
    if let Some(balanced) = by_price.get(by_price.len() / 2) {
        push_unique("balanced", balanced);
    }
    if let Some(top_ranked) = products.first() {
        push_unique("single_item", top_ranked);
    }

    if let Some(max) = max_amount {
        let fits = |plan: &CartPlan| {
            let subtotal = plan.product.price.value.get() * plan.quantity as u64;
            subtotal + subtotal * TAX_RATE_PERCENT / 100 + SHIPPING_JPY <= max.value.get()
        };
        let compliant: Vec<CartPlan> = plans.iter().filter(|p| fits(p)).cloned().collect();
        if !compliant.is_empty() {
            return compliant;
        }
        // Nothing fits the ceiling; propose the cheapest and let the risk
        // layer flag the constraint violation downstream.
        plans.truncate(1);
    }
    plans
}

// ============================================================================
// HTTP surface
// ============================================================================

pub struct MerchantAgentState {
    pub agent: Arc<MerchantAgent>,
    pub endpoint: A2aEndpoint,
    pub did_document: DidDocument,
}

pub fn router(state: Arc<MerchantAgentState>) -> Router {
    Router::new()
        .route("/search", get(get_search))
        .route("/inventory", get(get_inventory))
        .route("/inventory/update", post(post_inventory_update))
        .route("/create-cart", post(post_create_cart))
        .route("/a2a/message", post(post_a2a_message))
        .route("/.well-known/did.json", get(get_did_document))
        .with_state(state)
}

/// Registers the intent handler on a registry bound to `agent`.
pub fn register_handlers(registry: &mut crate::a2a::HandlerRegistry, agent: Arc<MerchantAgent>) {
    registry.register(MessageKind::IntentMandate, move |part: DataPart| {
        let agent = Arc::clone(&agent);
        async move {
            let intent: IntentMandate = serde_json::from_value(part.payload)
                .map_err(|e| ServiceError::validation(format!("malformed IntentMandate: {e}")))?;
            let candidates = agent.cart_candidates(&intent).await?;
            Ok(DataPart {
                kind: MessageKind::CartCandidates,
                id: part.id,
                payload: serde_json::to_value(&candidates)
                    .map_err(|e| ServiceError::internal(e.to_string()))?,
            })
        }
    });
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[instrument(skip_all)]
async fn get_search(
    State(state): State<Arc<MerchantAgentState>>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<Product>> {
    let keywords = analyze_intent(&params.query);
    let limit = params.limit.unwrap_or(SEARCH_LIMIT).min(SEARCH_LIMIT);
    let results = state
        .agent
        .catalog
        .search(&keywords, params.category.as_deref(), limit)
        .into_iter()
        .cloned()
        .collect();
    Json(results)
}

#[derive(Debug, Serialize, Deserialize)]
struct InventoryEntry {
    product_id: String,
    stock: u32,
}

#[instrument(skip_all)]
async fn get_inventory(State(state): State<Arc<MerchantAgentState>>) -> Json<Vec<InventoryEntry>> {
    Json(
        state
            .agent
            .catalog
            .inventory_snapshot()
            .into_iter()
            .map(|(product_id, stock)| InventoryEntry { product_id, stock })
            .collect(),
    )
}

#[instrument(skip_all)]
async fn post_inventory_update(
    State(state): State<Arc<MerchantAgentState>>,
    Json(body): Json<InventoryEntry>,
) -> Result<Json<InventoryEntry>, ServiceError> {
    if state.agent.catalog.by_id(&body.product_id).is_none() {
        return Err(ServiceError::not_found(format!("unknown product: {}", body.product_id)));
    }
    state.agent.catalog.set_stock(&body.product_id, body.stock);
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct CreateCartRequest {
    product_id: String,
    #[serde(default = "default_quantity")]
    quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[instrument(skip_all)]
async fn post_create_cart(
    State(state): State<Arc<MerchantAgentState>>,
    Json(body): Json<CreateCartRequest>,
) -> Result<Json<CartMandate>, ServiceError> {
    if body.quantity == 0 {
        return Err(ServiceError::validation("quantity must be positive"));
    }
    let product = state
        .agent
        .catalog
        .by_id(&body.product_id)
        .cloned()
        .ok_or_else(|| ServiceError::not_found(format!("unknown product: {}", body.product_id)))?;
    let plan = CartPlan {
        label: "single_item",
        product,
        quantity: body.quantity,
    };
    Ok(Json(state.agent.build_cart_mandate(&plan)))
}

#[instrument(skip_all)]
async fn post_a2a_message(
    State(state): State<Arc<MerchantAgentState>>,
    Json(message): Json<A2aMessage>,
) -> Result<Json<A2aMessage>, ServiceError> {
    state.endpoint.dispatch(message).await.map(Json)
}

#[instrument(skip_all)]
async fn get_did_document(State(state): State<Arc<MerchantAgentState>>) -> Json<DidDocument> {
    Json(state.did_document.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> Arc<MerchantAgent> {
        Arc::new(MerchantAgent::new(
            Did::agent("merchant_agent"),
            Did::merchant("mugi_shoten"),
            "Mugi Shoten".to_string(),
            "http://merchant:8003".parse().unwrap(),
        ))
    }

    #[test]
    fn test_analyze_intent_tokens() {
        let keywords = analyze_intent("Buy a red basketball shoe!");
        assert_eq!(keywords, vec!["buy", "red", "basketball", "shoe"]);
    }

    #[test]
    fn test_analyze_intent_generic_nouns_mapped() {
        let keywords = analyze_intent("some sporting goods");
        assert!(keywords.contains(&"product".to_string()));
        assert!(!keywords.contains(&"goods".to_string()));
    }

    #[test]
    fn test_analyze_intent_dedupes_preserving_order() {
        let keywords = analyze_intent("shoe shoe RED red");
        assert_eq!(keywords, vec!["shoe", "red"]);
    }

    #[test]
    fn test_plan_carts_produces_distinct_plans() {
        let agent = agent();
        let keywords = analyze_intent("basketball");
        let products = agent.catalog.search(&keywords, None, 20);
        assert!(products.len() >= 2);
        let plans = plan_carts(&products, None);
        assert!(!plans.is_empty());
        assert!(plans.len() <= 3);
        let mut ids: Vec<&str> = plans.iter().map(|p| p.product.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), plans.len());
    }

    #[test]
    fn test_plan_carts_prefers_compliant_plans() {
        let agent = agent();
        let keywords = analyze_intent("basketball shoe");
        let products = agent.catalog.search(&keywords, None, 20);
        let max = MoneyAmount::jpy(7000);
        let plans = plan_carts(&products, Some(&max));
        for plan in &plans {
            let subtotal = plan.product.price.value.get();
            assert!(subtotal + subtotal / 10 + SHIPPING_JPY <= 7000);
        }
    }

    #[test]
    fn test_plan_carts_falls_back_to_cheapest_when_nothing_fits() {
        let agent = agent();
        let keywords = analyze_intent("red basketball shoe");
        let mut products = agent.catalog.search(&keywords, None, 20);
        products.retain(|p| p.sku == "SHOE-001");
        let max = MoneyAmount::jpy(5000);
        let plans = plan_carts(&products, Some(&max));
        // The violating cart is still proposed; authorization decides later.
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].product.sku, "SHOE-001");
    }

    #[test]
    fn test_build_cart_mandate_totals() {
        // 8000 + 10% tax + 500 shipping = 9300 JPY, itemised consistently.
        let agent = agent();
        let product = agent.catalog.by_sku("SHOE-001").unwrap().clone();
        let cart = agent.build_cart_mandate(&CartPlan {
            label: "single_item",
            product,
            quantity: 1,
        });
        let details = &cart.contents.payment_request.details;
        assert_eq!(details.total.amount, MoneyAmount::jpy(9300));
        assert_eq!(details.display_items.len(), 3);
        ap2_types::mandate::validate_cart_mandate(&cart, Utc::now()).unwrap();
        assert_eq!(
            cart.contents.metadata.as_ref().unwrap().merchant_id,
            Some(Did::merchant("mugi_shoten"))
        );
        assert!(!cart.is_signed());
    }

    #[tokio::test]
    async fn test_intent_for_other_merchant_yields_empty() {
        let agent = agent();
        let intent = IntentMandate {
            natural_language_description: "Buy a red basketball shoe".to_string(),
            user_cart_confirmation_required: true,
            merchants: Some(vec![Did::merchant("somebody_else")]),
            skus: None,
            requires_refundability: false,
            intent_expiry: Utc::now() + Duration::hours(24),
            constraints: None,
            metadata: None,
        };
        let candidates = agent.cart_candidates(&intent).await.unwrap();
        assert!(candidates.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_expired_intent_rejected() {
        let agent = agent();
        let intent = IntentMandate {
            natural_language_description: "Buy a red basketball shoe".to_string(),
            user_cart_confirmation_required: true,
            merchants: None,
            skus: None,
            requires_refundability: false,
            intent_expiry: Utc::now() - Duration::hours(1),
            constraints: None,
            metadata: None,
        };
        assert!(agent.cart_candidates(&intent).await.is_err());
    }

    #[tokio::test]
    async fn test_no_matching_products_yields_empty() {
        let agent = agent();
        let intent = IntentMandate {
            natural_language_description: "Buy a zeppelin".to_string(),
            user_cart_confirmation_required: true,
            merchants: None,
            skus: None,
            requires_refundability: false,
            intent_expiry: Utc::now() + Duration::hours(24),
            constraints: None,
            metadata: None,
        };
        let candidates = agent.cart_candidates(&intent).await.unwrap();
        assert!(candidates.artifacts.is_empty());
    }
}
