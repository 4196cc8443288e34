use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel a message travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MessageType {
    #[serde(rename = "SMS")]
    Sms,
    /// E-mail (default)
    #[default]
    #[serde(rename = "EMAIL")]
    Email,
    #[serde(rename = "PUSH")]
    Push,
}

impl MessageType {
    pub const ALL: [MessageType; 3] = [MessageType::Sms, MessageType::Email, MessageType::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Sms => "SMS",
            MessageType::Email => "EMAIL",
            MessageType::Push => "PUSH",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the message was produced here or received from a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Direction {
    Inbound,
    #[default]
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "Inbound",
            Direction::Outbound => "Outbound",
        }
    }
}

/// Body mime type, derived from the body content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mime {
    #[default]
    #[serde(rename = "text/plain")]
    Text,
    #[serde(rename = "text/html")]
    Html,
}

/// How a transport gets a message out of the system.
///
/// `Push` transports accept an immediate send call. `Pull` transports wait
/// for a remote device to poll for pending work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SendMode {
    Pull,
    #[default]
    Push,
}

impl SendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendMode::Pull => "Pull",
            SendMode::Push => "Push",
        }
    }
}

/// Send priority, used as a scheduling hint by the dispatch queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Get numeric value for priority comparison
    pub fn as_weight(&self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Normal => 2,
            Priority::Medium => 3,
            Priority::High => 4,
            Priority::Critical => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_weight().cmp(&other.as_weight())
    }
}

/// Lifecycle state of a message.
///
/// `Unknown` is the initial state of pull-mode work waiting for a device,
/// `Received` the initial state of inbound messages. `Delivered` and
/// `Failed` end a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MessageState {
    #[default]
    Unknown,
    Received,
    Queued,
    Sent,
    Delivered,
    Failed,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Unknown => "Unknown",
            MessageState::Received => "Received",
            MessageState::Queued => "Queued",
            MessageState::Sent => "Sent",
            MessageState::Delivered => "Delivered",
            MessageState::Failed => "Failed",
        }
    }

    /// Terminal for the current send attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageState::Delivered | MessageState::Failed)
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the last transport interaction, success or normalized error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SendResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Identifier assigned by the provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// State reported by the transport, if it knows better than the default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<MessageState>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl SendResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_provider_id(mut self, id: impl Into<String>) -> Self {
        self.provider_id = Some(id.into());
        self
    }

    pub fn with_state(mut self, state: MessageState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A discrete unit of communication from a sender to one or more recipients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    /// Identity fingerprint, fixed at creation
    pub hash: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub direction: Direction,
    pub mime: Mime,
    pub transport: String,
    pub mode: SendMode,
    /// Bulk identifier shared by messages produced together (e.g. a campaign)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulk: Option<String>,
    pub sender: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub priority: Priority,
    pub state: MessageState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SendResult>,
    /// Weak back-reference to the campaign that produced this message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a builder for an outbound message
    pub fn builder(message_type: MessageType) -> MessageBuilder {
        MessageBuilder::new(message_type)
    }

    pub fn is_html(&self) -> bool {
        self.mime == Mime::Html
    }

    pub fn is_pull(&self) -> bool {
        self.mode == SendMode::Pull
    }

    /// Whether `other` describes the same logical message.
    ///
    /// Lifecycle fields are ignored; only what went into the fingerprint and
    /// the visible envelope is compared.
    pub fn same_payload(&self, other: &Message) -> bool {
        self.hash == other.hash
            && self.message_type == other.message_type
            && self.direction == other.direction
            && self.transport == other.transport
            && self.sender == other.sender
            && self.to == other.to
            && self.cc == other.cc
            && self.bcc == other.bcc
            && self.subject == other.subject
            && self.body == other.body
            && self.priority == other.priority
    }
}

/// Raw, unvalidated message payload.
///
/// This is what callers hand to `MessageService::create`; normalization,
/// fingerprinting and validation turn it into a [`Message`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    #[serde(default, rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub direction: Direction,
    pub transport: Option<String>,
    pub bulk: Option<String>,
    pub sender: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub reply_to: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Externally supplied fingerprint; wins over the computed one
    pub hash: Option<String>,
    /// Initial state, only honored for inbound messages. Set through the
    /// builder; never read from a request body.
    #[serde(skip)]
    pub state: Option<MessageState>,
    pub campaign: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: Option<DateTime<Utc>>,
}

/// Builder for message drafts
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    draft: MessageDraft,
}

impl MessageBuilder {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            draft: MessageDraft {
                message_type,
                ..Default::default()
            },
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.draft.direction = direction;
        self
    }

    pub fn transport(mut self, transport: impl Into<String>) -> Self {
        self.draft.transport = Some(transport.into());
        self
    }

    pub fn bulk(mut self, bulk: impl Into<String>) -> Self {
        self.draft.bulk = Some(bulk.into());
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.draft.sender = Some(sender.into());
        self
    }

    /// Add a recipient
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.draft.to.push(recipient.into());
        self
    }

    pub fn cc(mut self, recipient: impl Into<String>) -> Self {
        self.draft.cc.push(recipient.into());
        self
    }

    pub fn bcc(mut self, recipient: impl Into<String>) -> Self {
        self.draft.bcc.push(recipient.into());
        self
    }

    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.draft.reply_to = Some(address.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.draft.subject = Some(subject.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.draft.body = Some(body.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.draft.priority = priority;
        self
    }

    pub fn hash(mut self, hash: impl Into<String>) -> Self {
        self.draft.hash = Some(hash.into());
        self
    }

    pub fn state(mut self, state: MessageState) -> Self {
        self.draft.state = Some(state);
        self
    }

    pub fn campaign(mut self, campaign: Uuid) -> Self {
        self.draft.campaign = Some(campaign);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.draft.tags.push(tag.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.draft.metadata = metadata;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.draft.created_at = Some(created_at);
        self
    }

    pub fn build(self) -> MessageDraft {
        self.draft
    }
}
