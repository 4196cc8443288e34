//! Health check and statistics endpoints.

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::error::Result;
use crate::scheduler::QueueStats;
use crate::server::AppState;
use crate::store::MessageFilter;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: StoreHealthResponse,
    pub queue: QueueHealthResponse,
    pub smssync: bool,
}

#[derive(Debug, Serialize)]
pub struct StoreHealthResponse {
    pub backend: String,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueHealthResponse {
    pub accepting: bool,
    pub pending: usize,
    pub in_flight: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub messages: MessageStats,
    pub queue: QueueStats,
    pub transports: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageStats {
    pub total: usize,
    /// Count per state
    pub states: BTreeMap<String, usize>,
    /// Count per channel
    pub types: BTreeMap<String, usize>,
}

/// GET /health - 503 while the store is unreachable
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = state.service.store();
    let available = store.count().await.is_ok();
    let queue = state.scheduler.stats();

    let (status, label) = if available && queue.accepting {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
            store: StoreHealthResponse {
                backend: store.backend_type().to_string(),
                available,
            },
            queue: QueueHealthResponse {
                accepting: queue.accepting,
                pending: queue.pending + queue.delayed,
                in_flight: queue.in_flight,
            },
            smssync: state.settings.smssync.enabled,
        }),
    )
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let messages = state.service.find(&MessageFilter::new()).await?;

    let mut states = BTreeMap::new();
    let mut types = BTreeMap::new();
    for message in &messages {
        *states.entry(message.state.as_str().to_string()).or_insert(0) += 1;
        *types.entry(message.message_type.as_str().to_string()).or_insert(0) += 1;
    }

    Ok(Json(StatsResponse {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        messages: MessageStats {
            total: messages.len(),
            states,
            types,
        },
        queue: state.scheduler.stats(),
        transports: state.service.transports().names(),
    }))
}
