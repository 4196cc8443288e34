//! HTTP endpoint polled by SMSSync devices.
//!
//! Every branch answers 200 with a protocol payload, including a wrong
//! secret or an unreadable body.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use crate::metrics::SyncMetrics;

use super::{DeliveryReport, InboundSms, SmsSync, SyncResponse};

/// Query string of every sync request
#[derive(Debug, Default, Deserialize)]
pub struct SyncQuery {
    pub task: Option<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct QueuedBody {
    #[serde(default)]
    queued_messages: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultBody {
    #[serde(default)]
    message_result: Vec<DeliveryReport>,
}

/// Router serving `/{endpoint}`, mergeable into any application router
pub fn smssync_routes<S>(sync: Arc<SmsSync>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let path = format!("/{}", sync.config().endpoint.trim_matches('/'));
    Router::new()
        .route(&path, get(handle_get).post(handle_post))
        .with_state(sync)
}

async fn handle_get(
    State(sync): State<Arc<SmsSync>>,
    Query(query): Query<SyncQuery>,
) -> Json<SyncResponse> {
    let task = query.task.as_deref().unwrap_or("send");

    if !sync.check_secret(query.secret.as_deref()) {
        return reply(task, SyncResponse::secret_mismatch());
    }

    let response = match task {
        "" | "send" => sync.fetch_to_send().await,
        "result" => sync.awaiting_delivery().await,
        other => {
            tracing::debug!(task = %other, "Unknown sync task");
            SyncResponse::failure("Unknown task")
        }
    };

    reply(task, response)
}

async fn handle_post(
    State(sync): State<Arc<SmsSync>>,
    Query(query): Query<SyncQuery>,
    body: Bytes,
) -> Json<SyncResponse> {
    let task = query.task.as_deref().unwrap_or("receive");

    let parsed: Option<Value> = if body.is_empty() {
        Some(Value::Null)
    } else {
        serde_json::from_slice(&body).ok()
    };

    let secret = query.secret.clone().or_else(|| {
        parsed
            .as_ref()
            .and_then(|v| v.get("secret"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    if !sync.check_secret(secret.as_deref()) {
        return reply(task, SyncResponse::secret_mismatch());
    }

    let Some(body) = parsed else {
        tracing::debug!(task = %task, "Unreadable sync request body");
        return reply(task, SyncResponse::failure("Invalid request body"));
    };

    let response = match task {
        "" | "receive" => match decode::<InboundSms>(body) {
            Some(sms) => sync.receive(sms).await,
            None => SyncResponse::failure("Invalid message"),
        },
        "sent" => match decode::<QueuedBody>(body) {
            Some(body) => sync.acknowledge_queued(body.queued_messages).await,
            None => SyncResponse::failure("Invalid request body"),
        },
        "result" => match decode::<ResultBody>(body) {
            Some(body) => sync.report_delivered(body.message_result).await,
            None => SyncResponse::failure("Invalid request body"),
        },
        other => {
            tracing::debug!(task = %other, "Unknown sync task");
            SyncResponse::failure("Unknown task")
        }
    };

    reply(task, response)
}

/// Null bodies decode as the type's default
fn decode<T: for<'de> Deserialize<'de> + Default>(body: Value) -> Option<T> {
    if body.is_null() {
        return Some(T::default());
    }
    match serde_json::from_value(body) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, "Sync request body did not match the task");
            None
        }
    }
}

fn reply(task: &str, response: SyncResponse) -> Json<SyncResponse> {
    let label = match task {
        "send" | "receive" | "sent" | "result" => task,
        "" => "default",
        _ => "unknown",
    };
    SyncMetrics::record_request(label, response.is_success());
    Json(response)
}
