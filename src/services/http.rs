use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{
    settlement::{SettlementError, SettlementRequest, SettlementResult},
    ServiceError,
};
use crate::signature::SignatureVerifier;

mod transactions;
mod webhooks;

#[derive(Clone)]
pub struct AppState {
    settlement_channel: mpsc::Sender<SettlementRequest>,
    verifier: Arc<SignatureVerifier>,
    admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        settlement_channel: mpsc::Sender<SettlementRequest>,
        verifier: SignatureVerifier,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            settlement_channel,
            verifier: Arc::new(verifier),
            admin_token: admin_token
                .filter(|token| !token.trim().is_empty())
                .map(Arc::from),
        }
    }

    async fn settle(
        &self,
        payment_id: String,
        amount: Decimal,
        business_id: String,
        user_id: String,
    ) -> Result<SettlementResult, ApiError> {
        let (response, result) = oneshot::channel();
        self.request(
            SettlementRequest::Settle {
                payment_id,
                amount,
                business_id,
                user_id,
                response,
            },
            result,
        )
        .await
    }

    async fn fail_payment(&self, payment_id: String) -> Result<bool, ApiError> {
        let (response, result) = oneshot::channel();
        self.request(
            SettlementRequest::FailPayment {
                payment_id,
                response,
            },
            result,
        )
        .await
    }

    async fn update_account(
        &self,
        update: crate::models::businesses::AccountUpdate,
    ) -> Result<bool, ApiError> {
        let (response, result) = oneshot::channel();
        self.request(SettlementRequest::UpdateAccount { update, response }, result)
            .await
    }

    async fn request<T>(
        &self,
        request: SettlementRequest,
        result: oneshot::Receiver<Result<T, ServiceError>>,
    ) -> Result<T, ApiError> {
        self.settlement_channel.send(request).await.map_err(|e| {
            ServiceError::Communication("HTTP => Settlement".to_string(), e.to_string())
        })?;

        let result = result.await.map_err(|e| {
            ServiceError::Communication("Settlement => HTTP".to_string(), e.to_string())
        })?;

        Ok(result?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Verification failed: {0}")]
    Verification(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Endpoint disabled")]
    Disabled,
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Settlement(SettlementError::UserNotFound(_))
            | ServiceError::Settlement(SettlementError::BusinessNotFound(_)) => {
                ApiError::NotFound(e.to_string())
            }
            ServiceError::Settlement(SettlementError::InvalidAmount(..)) => {
                ApiError::Validation(e.to_string())
            }
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ApiError::Verification(_) => (StatusCode::BAD_REQUEST, "Verification failed"),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation failed"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "Not found"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::Disabled => (StatusCode::NOT_FOUND, "Not found"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        (
            status,
            Json(json!({
                "error": error,
                "details": self.to_string()
            })),
        )
            .into_response()
    }
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .route("/transactions", post(transactions::new_transaction))
        .route("/health", get(|| async { "OK" }))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(app_state: AppState, listen: &str) -> Result<(), anyhow::Error> {
    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
