//! Transports and the transport registry.
//!
//! A transport is the black box that actually gets a message to its
//! recipients (SMTP relay, SMS gateway, push service, a polling phone).
//! Transports are registered by name once at startup and resolved by
//! lookup. The registry normalizes every transport error into a
//! [`SendResult`], so nothing past it depends on transport-specific errors.

mod echo;
mod smssync;

pub use echo::EchoTransport;
pub use smssync::SmsSyncTransport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{Message, MessageType, SendMode, SendResult};
use crate::metrics::TransportMetrics;

/// Provider failure as reported by a transport
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub code: Option<String>,
    pub status: Option<u16>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status: None,
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

    /// Normalized failure payload recorded on the message
    pub fn into_result(self) -> SendResult {
        SendResult {
            success: false,
            code: self.code,
            message: Some(self.message),
            status: self.status,
            ..Default::default()
        }
    }
}

/// Trait for message transports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Registry key, copied onto every message using this transport
    fn name(&self) -> &str;

    /// Send mode, copied onto every message using this transport
    fn mode(&self) -> SendMode;

    /// Channels this transport can carry
    fn channels(&self) -> &[MessageType];

    /// Whether a successful send still waits for a device to confirm
    fn defers_confirmation(&self) -> bool {
        self.mode() == SendMode::Pull
    }

    async fn send(&self, message: &Message) -> Result<SendResult, TransportError>;
}

/// Name-keyed map of transports, built once at startup
#[derive(Default, Clone)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport under its own name, replacing any previous one
    pub fn register(&mut self, transport: Arc<dyn Transport>) {
        let name = transport.name().to_string();
        if self.transports.insert(name.clone(), transport).is_some() {
            tracing::warn!(transport = %name, "Transport registered twice, keeping the latest");
        } else {
            tracing::debug!(transport = %name, "Transport registered");
        }
    }

    /// Builder-style registration
    pub fn with(mut self, transport: Arc<dyn Transport>) -> Self {
        self.register(transport);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transports.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transports.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn mode_of(&self, name: &str) -> Option<SendMode> {
        self.transports.get(name).map(|t| t.mode())
    }

    /// Send through the named transport.
    ///
    /// Never fails: unknown transports and transport errors both come back
    /// as an unsuccessful [`SendResult`].
    pub async fn send(&self, message: &Message) -> SendResult {
        let Some(transport) = self.get(&message.transport) else {
            tracing::warn!(
                message_id = %message.id,
                transport = %message.transport,
                "No transport registered under this name"
            );
            TransportMetrics::record_send(&message.transport, false);
            return SendResult::failure(format!("Unknown transport: {}", message.transport))
                .with_code("UNKNOWN_TRANSPORT");
        };

        let start = Instant::now();
        let result = match transport.send(message).await {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(
                    message_id = %message.id,
                    transport = %message.transport,
                    error = %e,
                    "Transport send failed"
                );
                e.into_result()
            }
        };

        TransportMetrics::record_send(&message.transport, result.success);
        TransportMetrics::observe_latency(&message.transport, start.elapsed().as_secs_f64());
        result
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("transports", &self.names())
            .finish()
    }
}
