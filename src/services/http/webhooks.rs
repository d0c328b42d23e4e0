use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use super::{ApiError, AppState};
use crate::models::events::{EventError, PaymentEvent};
use crate::services::settlement::SettlementResult;

const SIGNATURE_HEADER: &str = "stripe-signature";

/// Receives processor events. The body is taken raw because the signature
/// covers the exact bytes sent.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            log::warn!("Rejected webhook without a signature header.");
            ApiError::Verification("missing Stripe-Signature header".to_string())
        })?;

    state.verifier.verify(&body, signature).map_err(|e| {
        log::warn!("Rejected webhook with bad signature: {}", e);
        ApiError::Verification(e.to_string())
    })?;

    let event = PaymentEvent::parse(&body).map_err(|e| match e {
        EventError::Malformed(_) => {
            log::warn!("Rejected malformed webhook: {}", e);
            ApiError::Verification(e.to_string())
        }
        _ => {
            log::error!("Rejected webhook, integration bug upstream: {}", e);
            ApiError::Validation(e.to_string())
        }
    })?;

    let result = match event {
        PaymentEvent::Succeeded(payment) => {
            if payment.metadata.save_payment_method {
                log::info!(
                    "Payment {} requested saving its payment method; the processor keeps it.",
                    payment.payment_id
                );
            }

            let settlement = state
                .settle(
                    payment.payment_id,
                    payment.amount,
                    payment.metadata.business_id,
                    payment.metadata.user_id,
                )
                .await?;

            match settlement {
                SettlementResult::Settled(_) => "processed",
                SettlementResult::AlreadyProcessed { .. } => "duplicate",
            }
        }
        PaymentEvent::Failed { payment_id } => {
            state.fail_payment(payment_id).await?;
            "processed"
        }
        PaymentEvent::AccountUpdated(update) => {
            state.update_account(update).await?;
            "processed"
        }
        PaymentEvent::Skipped { event_type, reason } => {
            log::info!("Skipped {} event: {}.", event_type, reason);
            "skipped"
        }
    };

    Ok(Json(json!({ "received": true, "result": result })))
}
