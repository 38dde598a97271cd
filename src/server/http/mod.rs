//! HTTP transport.
//!
//! Middleware runs in this order: request logging, trusted subnet check,
//! gzip (response compression and request decompression), HMAC verification
//! with response signing, RSA decryption. Any stage may short-circuit the
//! request with an error status.

use super::Security;
use crate::core::{CollectorError, Result};
use crate::storage::MetricsStorage;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;

pub mod handlers;
pub mod middleware;

/// State shared by handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub storage: MetricsStorage,
    pub security: Arc<Security>,
}

impl AppState {
    pub fn new(storage: MetricsStorage, security: Arc<Security>) -> Self {
        Self { storage, security }
    }
}

/// Build the router with all endpoints and the middleware chain.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/ping", get(handlers::ping))
        .route("/update/", post(handlers::update_json))
        .route("/update/:mtype/:name/:value", post(handlers::update_path))
        .route("/updates/", post(handlers::update_many))
        .route("/value/", post(handlers::value_json))
        .route("/value/:mtype/:name", get(handlers::value_path))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(middleware::log_request))
                .layer(from_fn_with_state(state.clone(), middleware::check_subnet))
                .layer(CompressionLayer::new())
                .layer(from_fn(middleware::decompress))
                .layer(from_fn_with_state(state.clone(), middleware::verify_hash))
                .layer(from_fn_with_state(state.clone(), middleware::decrypt)),
        )
        .with_state(state)
}

/// Serve the router until `token` is cancelled.
pub async fn serve(listener: TcpListener, state: AppState, token: CancellationToken) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .map_err(|e| CollectorError::protocol(format!("HTTP server error: {}", e)))?;

    tracing::info!("HTTP server stopped gracefully");
    Ok(())
}
