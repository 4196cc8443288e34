use async_trait::async_trait;

use crate::message::{Message, MessageType, SendMode, SendResult};

use super::{Transport, TransportError};

/// Push transport that accepts every message and logs it.
///
/// Used in development and tests; the message counts as delivered as soon
/// as it is sent.
pub struct EchoTransport {
    name: String,
}

impl EchoTransport {
    pub const NAME: &'static str = "echo";

    pub fn new() -> Self {
        Self::named(Self::NAME)
    }

    /// Echo transport registered under a custom name
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for EchoTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for EchoTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> SendMode {
        SendMode::Push
    }

    fn channels(&self) -> &[MessageType] {
        &MessageType::ALL
    }

    async fn send(&self, message: &Message) -> Result<SendResult, TransportError> {
        tracing::info!(
            transport = %self.name,
            message_id = %message.id,
            message_type = %message.message_type,
            recipients = message.to.len(),
            subject = ?message.subject,
            "Echo transport sent message"
        );

        Ok(SendResult::ok().with_provider_id(message.id.to_string()))
    }
}
