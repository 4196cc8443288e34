use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::campaigns::send_campaign;
use super::health::{health, stats};
use super::messages::{
    create_message, get_message, list_messages, requeue_messages, resend_message,
};
use super::metrics::prometheus_metrics;

/// Probes and metrics, never behind the API key
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
}

pub fn api_routes() -> Router<AppState> {
    Router::new().route("/stats", get(stats)).nest(
        "/api/v1",
        Router::new()
            // Messages
            .route("/messages", post(create_message).get(list_messages))
            .route("/messages/requeue", post(requeue_messages))
            .route("/messages/{id}", get(get_message))
            .route("/messages/{id}/resend", post(resend_message))
            // Campaigns
            .route("/campaigns", post(send_campaign)),
    )
}
