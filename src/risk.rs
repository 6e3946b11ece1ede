//! Deterministic risk scoring for agentic payments.
//!
//! The score is a weighted sum of capped factors, clamped to 0..=100. Every
//! weight in this profile is 1, so the caps are the whole story:
//!
//! | factor            | cap | signals                                        |
//! |-------------------|-----|------------------------------------------------|
//! | amount            | 80  | stepped at 10k/50k/100k/500k/1M minor units,   |
//! |                   |     | plus proximity to the intent's max_amount      |
//! | constraint        | 50  | intent max exceeded or currency mismatch       |
//! | agent involvement | 5   | an agent is in the loop                        |
//! | transaction type  | 15  | 5 human-present, 15 not-present                |
//! | payment method    | 25  | tokenized w/o token +15, non-tokenized 25      |
//! | pattern           | 30  | velocity, spend spike, first-time payer        |
//! | shipping          | 20  | PO-Box +15, express +5                         |
//! | temporal          | 15  | intent→payment under 5 s / 30 s, or over 1 h   |
//!
//! Raising the amount while holding everything else fixed never lowers the
//! final score. The shopping agent runs the engine stateless (it has no payer
//! history); the processor runs it with a history store as defence in depth.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use ap2_types::mandate::IntentMandate;
use ap2_types::money::MoneyAmount;
use ap2_types::payment::PaymentResponse;

const LOW_RISK_THRESHOLD: u8 = 30;
const HIGH_RISK_THRESHOLD: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Approve,
    Review,
    Decline,
}

/// Per-factor breakdown, each already capped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactors {
    pub amount_risk: u32,
    pub constraint_risk: u32,
    pub agent_risk: u32,
    pub transaction_type_risk: u32,
    pub payment_method_risk: u32,
    pub pattern_risk: u32,
    pub shipping_risk: u32,
    pub temporal_risk: u32,
}

impl RiskFactors {
    fn total(&self) -> u32 {
        self.amount_risk
            + self.constraint_risk
            + self.agent_risk
            + self.transaction_type_risk
            + self.payment_method_risk
            + self.pattern_risk
            + self.shipping_risk
            + self.temporal_risk
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: u8,
    pub factors: RiskFactors,
    pub fraud_indicators: Vec<String>,
    pub recommendation: Recommendation,
}

/// Shipping details, when the cart carries them.
#[derive(Debug, Clone, Default)]
pub struct ShippingInfo {
    pub address_line1: String,
    pub method: String,
}

/// Everything one assessment looks at.
pub struct RiskInput<'a> {
    pub amount: &'a MoneyAmount,
    pub intent: Option<&'a IntentMandate>,
    pub payment_response: &'a PaymentResponse,
    pub payer_id: &'a str,
    pub human_present: bool,
    pub agent_involved: bool,
    pub intent_created_at: Option<DateTime<Utc>>,
    pub payment_created_at: DateTime<Utc>,
    pub shipping: Option<&'a ShippingInfo>,
}

#[derive(Debug, Clone)]
struct HistoryRecord {
    at: DateTime<Utc>,
    amount: u64,
}

/// The risk engine. `stateless()` scores without payer history (the shopping
/// agent's view); `with_history()` additionally tracks per-payer transaction
/// patterns (the processor's view).
pub struct RiskEngine {
    history: Option<DashMap<String, Vec<HistoryRecord>>>,
}

impl RiskEngine {
    pub fn stateless() -> Self {
        Self { history: None }
    }

    pub fn with_history() -> Self {
        Self {
            history: Some(DashMap::new()),
        }
    }

    /// Records a completed transaction for pattern analysis.
    pub fn record(&self, payer_id: &str, amount: u64, at: DateTime<Utc>) {
        if let Some(history) = &self.history {
            history
                .entry(payer_id.to_string())
                .or_default()
                .push(HistoryRecord { at, amount });
        }
    }

    pub fn assess(&self, input: &RiskInput<'_>) -> RiskAssessment {
        let mut indicators = Vec::new();
        let factors = RiskFactors {
            amount_risk: self.amount_risk(input, &mut indicators),
            constraint_risk: self.constraint_risk(input, &mut indicators),
            agent_risk: if input.agent_involved { 5 } else { 0 },
            transaction_type_risk: if input.human_present { 5 } else { 15 },
            payment_method_risk: self.payment_method_risk(input, &mut indicators),
            pattern_risk: self.pattern_risk(input, &mut indicators),
            shipping_risk: self.shipping_risk(input, &mut indicators),
            temporal_risk: self.temporal_risk(input, &mut indicators),
        };
        let risk_score = factors.total().min(100) as u8;
        RiskAssessment {
            risk_score,
            factors,
            fraud_indicators: indicators,
            recommendation: recommendation(risk_score),
        }
    }

    fn amount_risk(&self, input: &RiskInput<'_>, indicators: &mut Vec<String>) -> u32 {
        let value = input.amount.value.get();
        let mut risk = match value {
            v if v >= 1_000_000 => 60,
            v if v >= 500_000 => 45,
            v if v >= 100_000 => 35,
            v if v >= 50_000 => 25,
            v if v >= 10_000 => 10,
            _ => 0,
        };
        if risk >= 45 {
            indicators.push("high_transaction_amount".to_string());
        }
        if let Some(max) = input.intent.and_then(|i| i.max_amount()) {
            let max_value = max.value.get();
            if max_value > 0 {
                // Proximity to the user's ceiling, evaluated at 80% and 95%.
                if value * 100 >= max_value * 95 {
                    risk += 10;
                } else if value * 100 >= max_value * 80 {
                    risk += 5;
                }
            }
        }
        risk.min(80)
    }

    fn constraint_risk(&self, input: &RiskInput<'_>, indicators: &mut Vec<String>) -> u32 {
        let Some(max) = input.intent.and_then(|i| i.max_amount()) else {
            return 0;
        };
        if input.amount.currency != max.currency {
            indicators.push("constraint_currency_mismatch".to_string());
            return 50;
        }
        if input.amount.value > max.value {
            indicators.push("constraint_amount_exceeded".to_string());
            return 50;
        }
        0
    }

    fn payment_method_risk(&self, input: &RiskInput<'_>, indicators: &mut Vec<String>) -> u32 {
        let details = &input.payment_response.details;
        let risk = if !details.tokenized {
            // The wire shape cannot carry card data, so a non-tokenized
            // method is maximally suspect by construction.
            indicators.push("non_tokenized_payment_method".to_string());
            25
        } else if details.token.is_empty() {
            indicators.push("tokenized_method_missing_token".to_string());
            15
        } else {
            0
        };
        risk.min(25)
    }

    fn pattern_risk(&self, input: &RiskInput<'_>, indicators: &mut Vec<String>) -> u32 {
        let Some(history) = &self.history else {
            return 0;
        };
        let records = history
            .get(input.payer_id)
            .map(|r| r.clone())
            .unwrap_or_default();
        if records.is_empty() {
            indicators.push("first_time_payer".to_string());
            return 15;
        }
        let mut risk = 0;
        let day_ago = input.payment_created_at - Duration::hours(24);
        let recent = records.iter().filter(|r| r.at > day_ago).count();
        if recent >= 5 {
            indicators.push("transaction_velocity".to_string());
            risk += 30;
        } else if recent >= 3 {
            risk += 15;
        }
        let window = &records[records.len().saturating_sub(5)..];
        if !window.is_empty() {
            let average = window.iter().map(|r| r.amount).sum::<u64>() / window.len() as u64;
            if average > 0 && input.amount.value.get() > average * 3 {
                indicators.push("spend_spike".to_string());
                risk += 15;
            }
        }
        risk.min(30)
    }

    fn shipping_risk(&self, input: &RiskInput<'_>, indicators: &mut Vec<String>) -> u32 {
        let Some(shipping) = input.shipping else {
            return 0;
        };
        let mut risk = 0;
        let line = shipping.address_line1.as_str();
        if line.contains("P.O.") || line.contains("PO Box") || line.contains("私書箱") {
            indicators.push("po_box_shipping".to_string());
            risk += 15;
        }
        if matches!(shipping.method.as_str(), "express" | "overnight" | "速達") {
            risk += 5;
        }
        risk.min(20)
    }

    fn temporal_risk(&self, input: &RiskInput<'_>, indicators: &mut Vec<String>) -> u32 {
        let Some(intent_at) = input.intent_created_at else {
            return 0;
        };
        let elapsed = (input.payment_created_at - intent_at).num_seconds();
        if elapsed < 5 {
            indicators.push("instant_checkout".to_string());
            15
        } else if elapsed < 30 {
            10
        } else if elapsed > 3600 {
            5
        } else {
            0
        }
    }
}

fn recommendation(score: u8) -> Recommendation {
    if score < LOW_RISK_THRESHOLD {
        Recommendation::Approve
    } else if score < HIGH_RISK_THRESHOLD {
        Recommendation::Review
    } else {
        Recommendation::Decline
    }
}

/// The processor's gate: scores at or above the decline threshold fail the
/// payment outright.
pub fn exceeds_gate(score: u8) -> bool {
    score >= HIGH_RISK_THRESHOLD
}
