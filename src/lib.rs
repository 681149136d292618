pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;

use {
    adapters::{signature::SignatureVerifier, webhook::webhook_handler},
    axum::{
        Router,
        extract::DefaultBodyLimit,
        routing::{get, post},
    },
    domain::store::Store,
    std::{sync::Arc, time::Duration},
    tower_http::timeout::TimeoutLayer,
};

/// Payment notifications are small; anything bigger is not ours.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState<S> {
    pub store: S,
    pub verifier: Arc<SignatureVerifier>,
    pub max_attempts: i32,
}

pub fn router<S: Store + Clone + 'static>(state: AppState<S>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/webhook", post(webhook_handler::<S>))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
