//! Message persistence.
//!
//! The store is the single source of truth for messages. Writes are
//! last-writer-wins; the only uniqueness constraint is the message hash,
//! enforced by [`MessageStore::insert_if_absent`].

mod memory;

pub use memory::MemoryMessageStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::message::{Direction, Message, MessageState, MessageType, SendMode};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend is unreachable; callers see this as `StoreUnavailableError`
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of a hash-keyed insert
#[derive(Debug, Clone)]
pub enum Insert {
    /// The message was stored
    Created(Message),
    /// A message with the same hash already existed and was left untouched
    Existing(Message),
}

impl Insert {
    pub fn into_message(self) -> Message {
        match self {
            Insert::Created(m) | Insert::Existing(m) => m,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Insert::Created(_))
    }
}

/// Query over stored messages. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub message_type: Option<MessageType>,
    pub direction: Option<Direction>,
    pub mode: Option<SendMode>,
    pub transport: Option<String>,
    pub states: Vec<MessageState>,
    pub campaign: Option<Uuid>,
    /// Only messages whose `sent_at` is unset
    pub unsent: bool,
    /// Only messages whose `sent_at` is set
    pub sent: bool,
    pub limit: Option<usize>,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn mode(mut self, mode: SendMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = Some(transport.into());
        self
    }

    pub fn state(mut self, state: MessageState) -> Self {
        self.states.push(state);
        self
    }

    pub fn campaign(mut self, campaign: Uuid) -> Self {
        self.campaign = Some(campaign);
        self
    }

    pub fn unsent(mut self) -> Self {
        self.unsent = true;
        self
    }

    pub fn sent(mut self) -> Self {
        self.sent = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check a message against this filter
    pub fn matches(&self, message: &Message) -> bool {
        self.message_type.map_or(true, |t| message.message_type == t)
            && self.direction.map_or(true, |d| message.direction == d)
            && self.mode.map_or(true, |m| message.mode == m)
            && self
                .transport
                .as_deref()
                .map_or(true, |t| message.transport == t)
            && (self.states.is_empty() || self.states.contains(&message.state))
            && self.campaign.map_or(true, |c| message.campaign == Some(c))
            && (!self.unsent || message.sent_at.is_none())
            && (!self.sent || message.sent_at.is_some())
    }
}

/// Trait for message persistence backends.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store a message unless one with the same hash exists.
    async fn insert_if_absent(&self, message: Message) -> Result<Insert, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Message>, StoreError>;

    async fn find_by_hash(&self, hash: &str) -> Result<Option<Message>, StoreError>;

    /// Messages matching the filter, oldest first
    async fn find(&self, filter: &MessageFilter) -> Result<Vec<Message>, StoreError>;

    /// Overwrite a stored message (last writer wins)
    async fn save(&self, message: &Message) -> Result<(), StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// Backend type identifier
    fn backend_type(&self) -> &'static str;
}
