//! Message endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::message::{Direction, Message, MessageDraft, MessageState, MessageType, SendMode};
use crate::scheduler::RequeueReport;
use crate::server::AppState;
use crate::store::MessageFilter;

const DEFAULT_LIST_LIMIT: usize = 100;

/// Filter accepted by the list and requeue endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    #[serde(rename = "type")]
    pub message_type: Option<MessageType>,
    pub direction: Option<Direction>,
    pub mode: Option<SendMode>,
    pub transport: Option<String>,
    pub state: Option<MessageState>,
    pub campaign: Option<Uuid>,
    pub limit: Option<usize>,
}

impl MessageQuery {
    fn into_filter(self) -> MessageFilter {
        let mut filter = MessageFilter::new();
        filter.message_type = self.message_type;
        filter.direction = self.direction;
        filter.mode = self.mode;
        filter.transport = self.transport;
        filter.campaign = self.campaign;
        if let Some(state) = self.state {
            filter = filter.state(state);
        }
        filter.limit = self.limit;
        filter
    }
}

/// POST /api/v1/messages - create a message and queue it for sending
pub async fn create_message(
    State(state): State<AppState>,
    Json(draft): Json<MessageDraft>,
) -> Result<(StatusCode, Json<Message>)> {
    let message = state.scheduler.submit(draft, None).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/v1/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
) -> Result<Json<Vec<Message>>> {
    let mut filter = query.into_filter();
    filter.limit.get_or_insert(DEFAULT_LIST_LIMIT);
    let messages = state.service.find(&filter).await?;
    Ok(Json(messages))
}

/// GET /api/v1/messages/{id}
pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Message>> {
    Ok(Json(state.service.load(id).await?))
}

/// POST /api/v1/messages/{id}/resend - send again now, same id and hash
pub async fn resend_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Message>> {
    Ok(Json(state.service.resend(id).await?))
}

/// POST /api/v1/messages/requeue - queue again unsent messages matching the
/// query string
pub async fn requeue_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
) -> Result<Json<RequeueReport>> {
    let report = state.scheduler.requeue(query.into_filter()).await?;
    Ok(Json(report))
}
