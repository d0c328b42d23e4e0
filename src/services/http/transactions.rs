use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, AppState};
use crate::services::settlement::SettlementResult;

/// Settlement requested by an operator rather than by a processor event.
/// `order_id` is the idempotency key.
#[derive(Debug, Deserialize)]
pub struct ManualTransaction {
    pub user_id: String,
    pub business_id: String,
    pub amount: Decimal,
    pub order_id: String,
}

pub async fn new_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<ManualTransaction>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let token = state.admin_token.as_deref().ok_or(ApiError::Disabled)?;
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if presented != Some(token) {
        log::warn!("Rejected manual transaction with bad credentials.");
        return Err(ApiError::Unauthorized);
    }

    let Json(req) = req.map_err(|e| ApiError::Validation(e.body_text()))?;
    for (field, value) in [
        ("user_id", &req.user_id),
        ("business_id", &req.business_id),
        ("order_id", &req.order_id),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::Validation(format!("missing field: {}", field)));
        }
    }

    let settlement = state
        .settle(req.order_id, req.amount, req.business_id, req.user_id)
        .await?;

    match settlement {
        SettlementResult::Settled(settlement) => Ok((
            StatusCode::CREATED,
            Json(json!({
                "result": "processed",
                "transaction": settlement.transaction,
                "wallet_balance": settlement.wallet_balance
            })),
        )),
        SettlementResult::AlreadyProcessed { payment_id } => Ok((
            StatusCode::OK,
            Json(json!({ "result": "duplicate", "order_id": payment_id })),
        )),
    }
}
