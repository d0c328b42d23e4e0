//! Typed view of the processor's webhook payloads.
//!
//! Only the fields settlement needs are modelled. Anything the receiver does
//! not understand becomes [`PaymentEvent::Skipped`] so the processor stops
//! redelivering it.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;

use super::businesses::AccountUpdate;

pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_INTENT_FAILED: &str = "payment_intent.payment_failed";
pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const CHARGE_SUCCEEDED: &str = "charge.succeeded";
pub const ACCOUNT_UPDATED: &str = "account.updated";

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed event body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{0} event {1} is missing metadata field '{2}'")]
    MissingMetadata(String, String, &'static str),
    #[error("{0} event {1} has no amount")]
    MissingAmount(String, String),
    #[error("payment {0} has non-positive amount {1}")]
    InvalidAmount(String, i64),
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentObject {
    id: String,
    amount: i64,
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    payment_intent: Option<String>,
    amount_total: Option<i64>,
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct ChargeObject {
    id: String,
    payment_intent: Option<String>,
    amount: i64,
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct AccountObject {
    id: String,
    #[serde(default)]
    details_submitted: bool,
    #[serde(default)]
    charges_enabled: bool,
    #[serde(default)]
    payouts_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct ObjectRef {
    id: String,
}

/// Metadata attached to the payment at checkout creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentMetadata {
    pub business_id: String,
    pub user_id: String,
    pub save_payment_method: bool,
}

impl PaymentMetadata {
    fn from_map(
        event_type: &str,
        object_id: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<Self, EventError> {
        let metadata = metadata.unwrap_or_default();
        let required = |key: &'static str| {
            metadata
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    EventError::MissingMetadata(event_type.to_string(), object_id.to_string(), key)
                })
        };

        Ok(Self {
            business_id: required("businessId")?,
            user_id: required("userId")?,
            save_payment_method: metadata
                .get("savePaymentMethod")
                .is_some_and(|v| v == "true"),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SucceededPayment {
    pub payment_id: String,
    /// Major units, converted exactly from the processor's minor units.
    pub amount: Decimal,
    pub metadata: PaymentMetadata,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentEvent {
    Succeeded(SucceededPayment),
    Failed { payment_id: String },
    AccountUpdated(AccountUpdate),
    Skipped { event_type: String, reason: &'static str },
}

impl PaymentEvent {
    pub fn parse(body: &[u8]) -> Result<Self, EventError> {
        let event: StripeEvent = serde_json::from_slice(body)?;
        Self::from_event(event)
    }

    pub fn from_event(event: StripeEvent) -> Result<Self, EventError> {
        let StripeEvent {
            event_type, data, ..
        } = event;

        match event_type.as_str() {
            PAYMENT_INTENT_SUCCEEDED => {
                let intent: PaymentIntentObject = serde_json::from_value(data.object)?;
                succeeded(&event_type, intent.id, Some(intent.amount), intent.metadata)
            }
            CHECKOUT_SESSION_COMPLETED => {
                let session: CheckoutSessionObject = serde_json::from_value(data.object)?;
                if session.payment_intent.is_some() {
                    return Ok(skipped(event_type, "settled by its payment intent"));
                }
                succeeded(&event_type, session.id, session.amount_total, session.metadata)
            }
            CHARGE_SUCCEEDED => {
                let charge: ChargeObject = serde_json::from_value(data.object)?;
                if charge.payment_intent.is_some() {
                    return Ok(skipped(event_type, "settled by its payment intent"));
                }
                succeeded(&event_type, charge.id, Some(charge.amount), charge.metadata)
            }
            PAYMENT_INTENT_FAILED => {
                let intent: ObjectRef = serde_json::from_value(data.object)?;
                Ok(PaymentEvent::Failed {
                    payment_id: intent.id,
                })
            }
            ACCOUNT_UPDATED => {
                let account: AccountObject = serde_json::from_value(data.object)?;
                if !account.details_submitted {
                    return Ok(skipped(event_type, "account details not submitted"));
                }
                Ok(PaymentEvent::AccountUpdated(AccountUpdate {
                    stripe_account_id: account.id,
                    charges_enabled: account.charges_enabled,
                    payouts_enabled: account.payouts_enabled,
                }))
            }
            _ => Ok(skipped(event_type, "unhandled event type")),
        }
    }
}

fn skipped(event_type: String, reason: &'static str) -> PaymentEvent {
    PaymentEvent::Skipped { event_type, reason }
}

fn succeeded(
    event_type: &str,
    payment_id: String,
    amount_in_cents: Option<i64>,
    metadata: Option<HashMap<String, String>>,
) -> Result<PaymentEvent, EventError> {
    let amount_in_cents = amount_in_cents
        .ok_or_else(|| EventError::MissingAmount(event_type.to_string(), payment_id.clone()))?;
    if amount_in_cents <= 0 {
        return Err(EventError::InvalidAmount(payment_id, amount_in_cents));
    }

    let metadata = PaymentMetadata::from_map(event_type, &payment_id, metadata)?;

    Ok(PaymentEvent::Succeeded(SucceededPayment {
        payment_id,
        amount: Decimal::new(amount_in_cents, 2),
        metadata,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn body(event_type: &str, object: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": event_type,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn parses_payment_intent_succeeded() {
        let event = PaymentEvent::parse(&body(
            PAYMENT_INTENT_SUCCEEDED,
            json!({
                "id": "pi_1",
                "amount": 10000,
                "metadata": { "businessId": "b1", "userId": "u1", "savePaymentMethod": "true" }
            }),
        ))
        .unwrap();

        assert_eq!(
            event,
            PaymentEvent::Succeeded(SucceededPayment {
                payment_id: "pi_1".to_string(),
                amount: Decimal::new(10000, 2),
                metadata: PaymentMetadata {
                    business_id: "b1".to_string(),
                    user_id: "u1".to_string(),
                    save_payment_method: true,
                },
            })
        );
    }

    #[rstest]
    #[case::no_business(json!({ "userId": "u1" }), "businessId")]
    #[case::no_user(json!({ "businessId": "b1" }), "userId")]
    #[case::blank_user(json!({ "businessId": "b1", "userId": " " }), "userId")]
    fn rejects_missing_metadata(#[case] metadata: serde_json::Value, #[case] field: &str) {
        let result = PaymentEvent::parse(&body(
            PAYMENT_INTENT_SUCCEEDED,
            json!({ "id": "pi_1", "amount": 500, "metadata": metadata }),
        ));

        match result {
            Err(EventError::MissingMetadata(_, id, missing)) => {
                assert_eq!(id, "pi_1");
                assert_eq!(missing, field);
            }
            other => panic!("expected missing metadata, got {:?}", other),
        }
    }

    #[test]
    fn rejects_null_metadata() {
        let result = PaymentEvent::parse(&body(
            PAYMENT_INTENT_SUCCEEDED,
            json!({ "id": "pi_1", "amount": 500, "metadata": null }),
        ));

        assert!(matches!(result, Err(EventError::MissingMetadata(..))));
    }

    #[test]
    fn rejects_zero_amount() {
        let result = PaymentEvent::parse(&body(
            PAYMENT_INTENT_SUCCEEDED,
            json!({ "id": "pi_1", "amount": 0, "metadata": { "businessId": "b1", "userId": "u1" } }),
        ));

        assert!(matches!(result, Err(EventError::InvalidAmount(_, 0))));
    }

    #[test]
    fn rejects_malformed_body() {
        assert!(matches!(
            PaymentEvent::parse(b"{not json"),
            Err(EventError::Malformed(_))
        ));
    }

    #[rstest]
    #[case::checkout(CHECKOUT_SESSION_COMPLETED, json!({ "id": "cs_1", "payment_intent": "pi_1", "amount_total": 100 }))]
    #[case::charge(CHARGE_SUCCEEDED, json!({ "id": "ch_1", "payment_intent": "pi_1", "amount": 100 }))]
    #[case::unknown("customer.created", json!({ "id": "cus_1" }))]
    #[case::account_not_submitted(ACCOUNT_UPDATED, json!({ "id": "acct_1", "details_submitted": false }))]
    fn skips_events_that_do_not_settle(#[case] event_type: &str, #[case] object: serde_json::Value) {
        let event = PaymentEvent::parse(&body(event_type, object)).unwrap();

        assert!(matches!(event, PaymentEvent::Skipped { .. }));
    }

    #[test]
    fn checkout_without_intent_settles_on_session_id() {
        let event = PaymentEvent::parse(&body(
            CHECKOUT_SESSION_COMPLETED,
            json!({
                "id": "cs_1",
                "payment_intent": null,
                "amount_total": 2550,
                "metadata": { "businessId": "b1", "userId": "u1" }
            }),
        ))
        .unwrap();

        match event {
            PaymentEvent::Succeeded(payment) => {
                assert_eq!(payment.payment_id, "cs_1");
                assert_eq!(payment.amount, Decimal::new(2550, 2));
                assert!(!payment.metadata.save_payment_method);
            }
            other => panic!("expected settlement, got {:?}", other),
        }
    }

    #[test]
    fn parses_failed_and_account_events() {
        let failed =
            PaymentEvent::parse(&body(PAYMENT_INTENT_FAILED, json!({ "id": "pi_9", "amount": 100 })))
                .unwrap();
        assert_eq!(
            failed,
            PaymentEvent::Failed {
                payment_id: "pi_9".to_string()
            }
        );

        let account = PaymentEvent::parse(&body(
            ACCOUNT_UPDATED,
            json!({
                "id": "acct_1",
                "details_submitted": true,
                "charges_enabled": true,
                "payouts_enabled": false
            }),
        ))
        .unwrap();
        assert_eq!(
            account,
            PaymentEvent::AccountUpdated(AccountUpdate {
                stripe_account_id: "acct_1".to_string(),
                charges_enabled: true,
                payouts_enabled: false,
            })
        );
    }
}
