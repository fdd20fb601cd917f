//! Payment gate: fee split, payment-required payload, proof handling.
//!
//! Proofs are recorded for audit, never verified. A present proof lets the
//! call through whether or not it is valid.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved argument carrying the caller's payment proof.
pub const PAYMENT_PROOF_ARG: &str = "_paymentProof";

/// Characters of a proof kept in logs.
const PROOF_LOG_PREFIX: usize = 20;

/// Fee split of one tool price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payout {
    pub platform_amount: u64,
    pub creator_amount: u64,
}

/// Split `price` into platform fee and creator share.
///
/// `platform = round(price * pct / 100)`, clamped to `price`;
/// `creator = price - platform`.
pub fn calculate_payout(price: u64, fee_percentage: f64) -> Payout {
    let pct = if fee_percentage.is_finite() {
        fee_percentage.clamp(0.0, 100.0)
    } else {
        0.0
    };
    let platform = ((price as f64) * pct / 100.0).round() as u64;
    let platform_amount = platform.min(price);
    Payout {
        platform_amount,
        creator_amount: price - platform_amount,
    }
}

/// `payment` member of a payment-required response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTerms {
    pub amount: u64,
    pub currency: String,
    pub recipient: String,
    pub platform_fee: u64,
    pub creator_receives: u64,
    pub network: String,
}

/// Structured 402 payload returned when a paid tool is called without proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequired {
    pub error: String,
    pub code: u16,
    pub payment: PaymentTerms,
}

impl PaymentRequired {
    pub fn new(
        price: u64,
        fee_percentage: f64,
        recipient: impl Into<String>,
        currency: impl Into<String>,
        network: impl Into<String>,
    ) -> Self {
        let payout = calculate_payout(price, fee_percentage);
        Self {
            error: "Payment required".to_string(),
            code: 402,
            payment: PaymentTerms {
                amount: price,
                currency: currency.into(),
                recipient: recipient.into(),
                platform_fee: payout.platform_amount,
                creator_receives: payout.creator_amount,
                network: network.into(),
            },
        }
    }
}

/// Proof extracted from call arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentProof {
    Token(String),
    /// Present but not a string.
    Malformed,
}

impl PaymentProof {
    /// Log-safe rendering: the first 20 characters and `...`, or `invalid`.
    pub fn redacted(&self) -> String {
        match self {
            PaymentProof::Token(token) => {
                let prefix: String = token.chars().take(PROOF_LOG_PREFIX).collect();
                format!("{}...", prefix)
            }
            PaymentProof::Malformed => "invalid".to_string(),
        }
    }
}

/// Remove the reserved proof argument from `args` and return it.
///
/// Falsy proofs (`null`, `false`, `0`, `""`) count as absent.
pub fn take_payment_proof(args: &mut Value) -> Option<PaymentProof> {
    let proof = args.as_object_mut()?.remove(PAYMENT_PROOF_ARG)?;
    match proof {
        Value::Null | Value::Bool(false) => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(PaymentProof::Token(s)),
        _ => Some(PaymentProof::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_payout_twenty_percent_of_ten() {
        assert_eq!(
            calculate_payout(10, 20.0),
            Payout {
                platform_amount: 2,
                creator_amount: 8
            }
        );
    }

    #[test]
    fn test_payout_rounds_and_clamps() {
        assert_eq!(calculate_payout(3, 50.0).platform_amount, 2);
        assert_eq!(calculate_payout(7, 250.0).creator_amount, 0);
        assert_eq!(calculate_payout(7, -5.0).platform_amount, 0);
        assert_eq!(calculate_payout(7, f64::NAN).creator_amount, 7);
        assert_eq!(calculate_payout(0, 20.0).platform_amount, 0);
    }

    #[test]
    fn test_payment_required_wire_shape() {
        let payload = PaymentRequired::new(10, 20.0, "0xcreator", "USDC", "eip155:8453");
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "error": "Payment required",
                "code": 402,
                "payment": {
                    "amount": 10,
                    "currency": "USDC",
                    "recipient": "0xcreator",
                    "platformFee": 2,
                    "creatorReceives": 8,
                    "network": "eip155:8453",
                }
            })
        );
    }

    #[test]
    fn test_take_payment_proof_strips_argument() {
        let mut args = json!({"city": "Oslo", "_paymentProof": "0x1234567890abcdef1234567890"});
        let proof = take_payment_proof(&mut args).unwrap();
        assert_eq!(args, json!({"city": "Oslo"}));
        assert_eq!(proof.redacted(), "0x1234567890abcdef12...");
    }

    #[test]
    fn test_take_payment_proof_absent_and_malformed() {
        assert_eq!(take_payment_proof(&mut json!({"a": 1})), None);
        assert_eq!(take_payment_proof(&mut json!({"_paymentProof": null})), None);
        assert_eq!(take_payment_proof(&mut json!({"_paymentProof": ""})), None);
        assert_eq!(take_payment_proof(&mut json!({"_paymentProof": false})), None);
        assert_eq!(take_payment_proof(&mut json!({"_paymentProof": 0})), None);
        assert_eq!(take_payment_proof(&mut json!({"_paymentProof": 0.0})), None);
        assert_eq!(take_payment_proof(&mut json!("not an object")), None);

        let proof = take_payment_proof(&mut json!({"_paymentProof": {"tx": 1}})).unwrap();
        assert_eq!(proof, PaymentProof::Malformed);
        assert_eq!(proof.redacted(), "invalid");

        let mut args = json!({"_paymentProof": false, "q": 1});
        assert_eq!(take_payment_proof(&mut args), None);
        assert_eq!(args, json!({"q": 1}));
        assert_eq!(
            take_payment_proof(&mut json!({"_paymentProof": true})),
            Some(PaymentProof::Malformed)
        );
    }
}
