use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::repositories::{LedgerStore, RepositoryError};
use crate::settings::Settings;
use crate::signature::SignatureVerifier;

pub mod http;
pub mod settlement;

use settlement::{SettlementEngine, SettlementError, SettlementRequest};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Starts the settlement service on its own task and returns the channel
/// that feeds it. The service stops once every sender is dropped.
pub fn spawn_settlement_service<S: LedgerStore>(
    engine: SettlementEngine<S>,
) -> mpsc::Sender<SettlementRequest> {
    let (settlement_tx, mut settlement_rx) = mpsc::channel(512);
    let mut settlement_service = settlement::SettlementService::new();
    let handler = settlement::SettlementRequestHandler::new(Arc::new(engine));

    tokio::spawn(async move {
        settlement_service.run(handler, &mut settlement_rx).await;
        log::info!("Settlement service stopped.");
    });

    settlement_tx
}

pub async fn start_services<S: LedgerStore>(
    store: S,
    settings: &Settings,
    listen: &str,
) -> Result<(), anyhow::Error> {
    let policy = settings.reward_policy()?;

    log::info!("Starting settlement service.");
    let settlement_tx = spawn_settlement_service(SettlementEngine::new(store, policy));

    log::info!("Starting HTTP server.");
    let verifier = SignatureVerifier::new(
        settings.stripe.webhook_secret.clone(),
        Duration::from_secs(settings.stripe.signature_tolerance_secs),
    );
    let app_state = http::AppState::new(
        settlement_tx,
        verifier,
        settings.server.admin_token.clone(),
    );

    http::start_http_server(app_state, listen).await
}
