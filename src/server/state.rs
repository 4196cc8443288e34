use std::sync::Arc;
use std::time::Instant;

use crate::campaign::{CampaignFanout, ContactResolver};
use crate::config::Settings;
use crate::error::AppError;
use crate::message::MessageService;
use crate::scheduler::Scheduler;
use crate::smssync::{InboundHook, SmsSync};
use crate::store::{MemoryMessageStore, MessageStore};
use crate::transport::{EchoTransport, SmsSyncTransport, TransportRegistry};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub service: Arc<MessageService>,
    pub scheduler: Arc<Scheduler>,
    pub fanout: Arc<CampaignFanout>,
    pub smssync: Arc<SmsSync>,
    pub start_time: Instant,
}

/// Optional collaborators supplied by the embedding application
#[derive(Default)]
pub struct Collaborators {
    pub store: Option<Arc<dyn MessageStore>>,
    pub hook: Option<Arc<dyn InboundHook>>,
    pub resolver: Option<Arc<dyn ContactResolver>>,
}

impl AppState {
    /// In-memory store, no inbound hook, no contact resolver
    pub fn new(settings: Settings) -> Result<Self, AppError> {
        Self::with_collaborators(settings, Collaborators::default())
    }

    pub fn with_collaborators(
        settings: Settings,
        collaborators: Collaborators,
    ) -> Result<Self, AppError> {
        let transports = Arc::new(default_transports());
        for (channel, name) in settings.transports.routes() {
            if !transports.contains(name) {
                return Err(AppError::Config(config::ConfigError::Message(format!(
                    "unknown transport {:?} configured for {}",
                    name, channel
                ))));
            }
        }

        let store = collaborators
            .store
            .unwrap_or_else(|| Arc::new(MemoryMessageStore::new()));
        tracing::info!(
            backend = store.backend_type(),
            transports = ?transports.names(),
            "Message store ready"
        );

        let service = settings.transports.routes().into_iter().fold(
            MessageService::new(store, transports, settings.message.normalize_options()),
            |service, (channel, name)| service.with_default_transport(channel, name),
        );
        let service = Arc::new(service);

        let scheduler = Arc::new(Scheduler::new(service.clone(), settings.scheduler.clone()));

        let mut fanout = CampaignFanout::new(scheduler.clone());
        if let Some(resolver) = collaborators.resolver {
            fanout = fanout.with_resolver(resolver);
        }

        let mut smssync = SmsSync::new(settings.smssync.clone(), service.clone());
        if let Some(hook) = collaborators.hook {
            smssync = smssync.with_hook(hook);
        }

        Ok(Self {
            settings: Arc::new(settings),
            service,
            scheduler,
            fanout: Arc::new(fanout),
            smssync: Arc::new(smssync),
            start_time: Instant::now(),
        })
    }
}

/// Transports compiled into the service
fn default_transports() -> TransportRegistry {
    TransportRegistry::new()
        .with(Arc::new(EchoTransport::new()))
        .with(Arc::new(SmsSyncTransport::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_default_settings() {
        let state = AppState::new(Settings::default()).unwrap();
        assert!(state.service.transports().contains("echo"));
        assert!(state.service.transports().contains("smssync"));
        assert_eq!(state.smssync.config().endpoint, "smssync");
    }

    #[test]
    fn test_unknown_transport_is_rejected() {
        let mut settings = Settings::default();
        settings.transports.email = "sendgrid".to_string();
        assert!(matches!(AppState::new(settings), Err(AppError::Config(_))));
    }
}
