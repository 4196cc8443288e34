//! Message service.
//!
//! Glue between the pure state machine, the store and the transport
//! registry: load a message, apply one transition, persist it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use uuid::Uuid;

use crate::metrics::MessageMetrics;
use crate::store::{Insert, MessageFilter, MessageStore};
use crate::transport::TransportRegistry;

use super::error::MessageError;
use super::normalize::NormalizeOptions;
use super::state::Transition;
use super::types::{Message, MessageDraft, MessageState, MessageType, SendMode, SendResult};

/// Result of ingesting a message that may already exist
#[derive(Debug, Clone)]
pub struct Ingested {
    pub message: Message,
    /// True when a message with the same hash was already stored
    pub duplicate: bool,
}

/// Creates messages and drives their lifecycle against the store.
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    transports: Arc<TransportRegistry>,
    options: NormalizeOptions,
    /// Transport used when a draft names none
    defaults: HashMap<MessageType, String>,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        transports: Arc<TransportRegistry>,
        options: NormalizeOptions,
    ) -> Self {
        Self {
            store,
            transports,
            options,
            defaults: HashMap::new(),
        }
    }

    /// Route drafts of `message_type` without a transport to `transport`
    pub fn with_default_transport(
        mut self,
        message_type: MessageType,
        transport: impl Into<String>,
    ) -> Self {
        self.defaults.insert(message_type, transport.into());
        self
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn transports(&self) -> &Arc<TransportRegistry> {
        &self.transports
    }

    pub fn normalize_options(&self) -> &NormalizeOptions {
        &self.options
    }

    /// Validate, normalize and store a new message.
    ///
    /// Creating the same logical message twice returns the stored one. A
    /// stored message with the same hash but a different payload is a
    /// [`MessageError::DuplicateConflict`].
    #[tracing::instrument(
        name = "message.create",
        skip(self, draft),
        fields(message_type = %draft.message_type)
    )]
    pub async fn create(&self, draft: MessageDraft) -> Result<Message, MessageError> {
        let message = self.build(draft)?;

        match self.store.insert_if_absent(message.clone()).await? {
            Insert::Created(created) => {
                MessageMetrics::record_created(created.message_type, created.direction);
                tracing::info!(
                    message_id = %created.id,
                    transport = %created.transport,
                    mode = created.mode.as_str(),
                    recipients = created.to.len(),
                    "Message created"
                );
                Ok(created)
            }
            Insert::Existing(existing) if existing.same_payload(&message) => {
                MessageMetrics::record_duplicate(existing.direction);
                tracing::debug!(message_id = %existing.id, hash = %existing.hash, "Message already exists");
                Ok(existing)
            }
            Insert::Existing(existing) => {
                tracing::warn!(
                    message_id = %existing.id,
                    hash = %existing.hash,
                    "Hash collision with a different payload"
                );
                Err(MessageError::DuplicateConflict {
                    hash: existing.hash,
                    existing: existing.id,
                })
            }
        }
    }

    /// Store a message unless its hash is already known (upsert-or-ignore).
    ///
    /// Used for inbound traffic, where the same message can legitimately
    /// arrive more than once.
    pub async fn ingest(&self, draft: MessageDraft) -> Result<Ingested, MessageError> {
        let message = self.build(draft)?;

        let insert = self.store.insert_if_absent(message).await?;
        let duplicate = !insert.is_created();
        let message = insert.into_message();

        if duplicate {
            MessageMetrics::record_duplicate(message.direction);
            tracing::info!(message_id = %message.id, hash = %message.hash, "Duplicate message ignored");
        } else {
            MessageMetrics::record_created(message.message_type, message.direction);
            tracing::info!(
                message_id = %message.id,
                transport = %message.transport,
                "Inbound message stored"
            );
        }

        Ok(Ingested { message, duplicate })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Message>, MessageError> {
        Ok(self.store.find_by_id(id).await?)
    }

    /// Load a message that must exist
    pub async fn load(&self, id: Uuid) -> Result<Message, MessageError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(MessageError::NotFound(id))
    }

    pub async fn find(&self, filter: &MessageFilter) -> Result<Vec<Message>, MessageError> {
        Ok(self.store.find(filter).await?)
    }

    /// Messages matching `filter` that were never sent
    pub async fn unsent(&self, filter: MessageFilter) -> Result<Vec<Message>, MessageError> {
        self.find(&filter.unsent()).await
    }

    /// Messages matching `filter` that were sent at least once
    pub async fn sent(&self, filter: MessageFilter) -> Result<Vec<Message>, MessageError> {
        self.find(&filter.sent()).await
    }

    /// Put the stored message (back) into its send cycle.
    ///
    /// `Unchanged` means the message already went out and was left as is.
    pub async fn queue(&self, id: Uuid) -> Result<(Message, Transition), MessageError> {
        self.apply(id, |message, now| message.queue(now)).await
    }

    /// Send a message through its transport and record the outcome.
    ///
    /// Transport failures are not errors here: they end up on the message
    /// as `Failed` with the normalized result.
    #[tracing::instrument(name = "message.send", skip(self))]
    pub async fn send(&self, id: Uuid) -> Result<Message, MessageError> {
        let mut message = self.load(id).await?;

        let defers = self
            .transports
            .get(&message.transport)
            .map(|t| t.defers_confirmation())
            .unwrap_or_else(|| message.is_pull());

        let result = self.transports.send(&message).await;
        let success = result.success;
        message.apply_send_result(result, defers, Utc::now())?;
        self.store.save(&message).await?;
        MessageMetrics::record_transition(message.state);

        if success {
            tracing::info!(
                message_id = %message.id,
                transport = %message.transport,
                state = %message.state,
                "Message sent"
            );
        } else {
            tracing::warn!(
                message_id = %message.id,
                transport = %message.transport,
                error = ?message.result.as_ref().and_then(|r| r.message.as_deref()),
                "Message send failed"
            );
        }

        Ok(message)
    }

    /// Send again a message that failed or was never sent, keeping its id
    /// and hash.
    pub async fn resend(&self, id: Uuid) -> Result<Message, MessageError> {
        let message = self.load(id).await?;
        if !message.can_resend() {
            return Err(MessageError::InvalidTransition {
                id,
                from: message.state,
                to: MessageState::Queued,
            });
        }
        self.send(id).await
    }

    /// Resend every unsent message matching `filter` concurrently.
    ///
    /// One failure does not stop the others; every outcome is returned.
    pub async fn resend_all(
        &self,
        filter: MessageFilter,
    ) -> Result<Vec<(Uuid, Result<Message, MessageError>)>, MessageError> {
        let messages = self.unsent(filter).await?;
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();

        let outcomes = join_all(ids.iter().map(|id| self.resend(*id))).await;
        Ok(ids.into_iter().zip(outcomes).collect())
    }

    /// A polling device accepted the message for sending
    pub async fn acknowledge_queued(&self, id: Uuid) -> Result<(Message, Transition), MessageError> {
        self.apply(id, |message, now| message.acknowledge_queued(now))
            .await
    }

    pub async fn mark_delivered(
        &self,
        id: Uuid,
        result: Option<SendResult>,
    ) -> Result<(Message, Transition), MessageError> {
        self.apply(id, move |message, now| message.mark_delivered(result, now))
            .await
    }

    pub async fn mark_failed(
        &self,
        id: Uuid,
        result: SendResult,
    ) -> Result<(Message, Transition), MessageError> {
        self.apply(id, move |message, now| message.mark_failed(result, now))
            .await
    }

    /// Load, transition, persist. Unchanged messages are not written back.
    async fn apply<F>(&self, id: Uuid, transition: F) -> Result<(Message, Transition), MessageError>
    where
        F: FnOnce(&mut Message, DateTime<Utc>) -> Result<Transition, MessageError> + Send,
    {
        let mut message = self.load(id).await?;
        let outcome = transition(&mut message, Utc::now())?;
        if outcome.is_applied() {
            self.store.save(&message).await?;
            MessageMetrics::record_transition(message.state);
        }
        Ok((message, outcome))
    }

    fn build(&self, mut draft: MessageDraft) -> Result<Message, MessageError> {
        let name = draft
            .transport
            .take()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| self.defaults.get(&draft.message_type).cloned())
            .ok_or_else(|| {
                MessageError::validation(format!(
                    "no transport configured for {} messages",
                    draft.message_type
                ))
            })?;

        let transport = self
            .transports
            .get(&name)
            .ok_or_else(|| MessageError::validation(format!("unknown transport: {}", name)))?;

        if !transport.channels().contains(&draft.message_type) {
            return Err(MessageError::validation(format!(
                "transport {} does not carry {} messages",
                name, draft.message_type
            )));
        }

        let mode: SendMode = transport.mode();
        Message::create(draft, &name, mode, &self.options, Utc::now())
    }
}
