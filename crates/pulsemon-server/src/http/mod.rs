//! HTTP transport: router assembly and shared request state.

pub mod handlers;
pub mod middleware;

use crate::service::MetricService;
use crate::subnet::TrustedSubnet;
use axum::routing::{get, post};
use axum::Router;
use pulsemon_crypto::Decryptor;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: MetricService,
    pub decryptor: Option<Arc<Decryptor>>,
    pub trusted: Option<TrustedSubnet>,
}

/// Builds the collector's router. Layer order (outermost first): request
/// logging, gzip response encoding, trusted-network check, body
/// decryption, handlers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::list_page))
        .route("/ping", get(handlers::health))
        .route("/update/", post(handlers::update_one))
        .route("/updates/", post(handlers::update_many))
        .route("/value/", post(handlers::get_one))
        // deprecated text path
        .route("/update/:kind/:name/:value", post(handlers::update_legacy))
        .route("/update/:kind", post(handlers::legacy_not_found))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::decrypt_body,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::trusted_network_check,
        ))
        .layer(CompressionLayer::new())
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .with_state(state)
}
