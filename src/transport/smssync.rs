use async_trait::async_trait;

use crate::message::{Message, MessageType, SendMode, SendResult};

use super::{Transport, TransportError};

/// Pull transport backed by an SMSSync phone relay.
///
/// Sending only leaves the message for the device: the phone fetches it on
/// its next poll and reports progress through the sync protocol.
pub struct SmsSyncTransport {
    name: String,
}

impl SmsSyncTransport {
    pub const NAME: &'static str = "smssync";

    pub fn new() -> Self {
        Self::named(Self::NAME)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for SmsSyncTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SmsSyncTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> SendMode {
        SendMode::Pull
    }

    fn channels(&self) -> &[MessageType] {
        &[MessageType::Sms]
    }

    async fn send(&self, message: &Message) -> Result<SendResult, TransportError> {
        if message.message_type != MessageType::Sms {
            return Err(TransportError::new(format!(
                "{} transport only carries SMS, got {}",
                self.name, message.message_type
            ))
            .with_code("UNSUPPORTED_TYPE"));
        }

        tracing::debug!(
            transport = %self.name,
            message_id = %message.id,
            recipients = message.to.len(),
            "Message left for device pickup"
        );

        Ok(SendResult::ok())
    }
}
