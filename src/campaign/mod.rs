//! Campaign fanout.
//!
//! A campaign expands into one message per distinct recipient address per
//! channel. Channel batches run concurrently and every per-recipient outcome
//! is collected; a failing channel does not hold back the others.

mod types;

pub use types::{Campaign, CampaignForm, CampaignStatistics, ChannelStatistics, Contact};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::message::{normalize::normalize_recipient, Message, MessageError, MessageType};
use crate::metrics::CampaignMetrics;
use crate::scheduler::{Scheduler, SchedulerError};
use crate::store::MessageFilter;

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// The contact resolver could not produce the audience
    #[error("Contact resolution failed: {0}")]
    Resolver(String),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl CampaignError {
    pub fn resolver(msg: impl Into<String>) -> Self {
        Self::Resolver(msg.into())
    }
}

/// Resolves audiences and criteria into contacts
#[async_trait]
pub trait ContactResolver: Send + Sync {
    async fn fetch_contacts(
        &self,
        criteria: &serde_json::Value,
        audiences: &[String],
    ) -> Result<Vec<Contact>, CampaignError>;
}

#[derive(Debug, Serialize)]
pub struct RecipientFailure {
    pub address: String,
    pub error: String,
}

/// Outcome of one channel batch
#[derive(Debug, Serialize)]
pub struct ChannelReport {
    pub channel: MessageType,
    pub messages: Vec<Uuid>,
    pub failed: Vec<RecipientFailure>,
    /// Contacts without an address on this channel
    pub skipped: usize,
}

/// Outcome of a whole fanout
#[derive(Debug, Serialize)]
pub struct FanoutReport {
    pub campaign: Uuid,
    pub recipients: usize,
    pub channels: Vec<ChannelReport>,
}

impl FanoutReport {
    pub fn channel(&self, channel: MessageType) -> Option<&ChannelReport> {
        self.channels.iter().find(|c| c.channel == channel)
    }

    pub fn total_messages(&self) -> usize {
        self.channels.iter().map(|c| c.messages.len()).sum()
    }
}

pub struct CampaignFanout {
    scheduler: Arc<Scheduler>,
    resolver: Option<Arc<dyn ContactResolver>>,
}

impl CampaignFanout {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ContactResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Create and queue the campaign's messages, then refresh its
    /// statistics.
    ///
    /// Messages carry the campaign id as bulk id and the campaign creation
    /// time, so sending the same campaign again reuses the stored messages.
    #[tracing::instrument(name = "campaign.send", skip(self, campaign), fields(campaign_id = %campaign.id))]
    pub async fn send(&self, campaign: &mut Campaign) -> Result<FanoutReport, CampaignError> {
        if campaign.message.trim().is_empty() {
            return Err(CampaignError::Validation("message is required".to_string()));
        }
        let channels = campaign.distinct_channels();
        if channels.is_empty() {
            return Err(CampaignError::Validation("at least one channel is required".to_string()));
        }

        let contacts = self.resolve(campaign).await?;
        let view: &Campaign = campaign;
        let batches = channels
            .iter()
            .map(|channel| self.send_channel(view, *channel, &contacts));
        let reports = join_all(batches).await;

        for report in &reports {
            CampaignMetrics::record_messages(report.channel, report.messages.len() as u64);
        }

        campaign.sent_at = Some(Utc::now());
        // Every batch already ran; stale counters do not void the report
        if let Err(e) = self.refresh_statistics(campaign).await {
            tracing::warn!(error = %e, "Failed to refresh campaign statistics");
        }

        let report = FanoutReport {
            campaign: campaign.id,
            recipients: contacts.len(),
            channels: reports,
        };
        tracing::info!(
            recipients = report.recipients,
            messages = report.total_messages(),
            "Campaign dispatched"
        );
        Ok(report)
    }

    /// Recompute per-channel counters from the stored messages
    pub async fn refresh_statistics(&self, campaign: &mut Campaign) -> Result<(), CampaignError> {
        let messages = self
            .scheduler
            .service()
            .find(&MessageFilter::new().campaign(campaign.id))
            .await?;

        let mut statistics = CampaignStatistics::default();
        for message in &messages {
            statistics
                .channel_mut(message.message_type)
                .record(message.state);
        }
        campaign.statistics = statistics;
        Ok(())
    }

    /// Explicit recipients merged with resolved contacts, without repeats
    async fn resolve(&self, campaign: &Campaign) -> Result<Vec<Contact>, CampaignError> {
        let mut contacts = campaign.to.clone();
        if let Some(resolver) = &self.resolver {
            let resolved = resolver
                .fetch_contacts(&campaign.criteria, &campaign.audiences)
                .await?;
            contacts.extend(resolved);
        }

        let mut distinct: Vec<Contact> = Vec::with_capacity(contacts.len());
        for contact in contacts {
            if !distinct.contains(&contact) {
                distinct.push(contact);
            }
        }
        Ok(distinct)
    }

    async fn send_channel(
        &self,
        campaign: &Campaign,
        channel: MessageType,
        contacts: &[Contact],
    ) -> ChannelReport {
        let options = self.scheduler.service().normalize_options();

        let mut addresses: Vec<String> = Vec::new();
        let mut skipped = 0;
        for contact in contacts {
            match contact.address(channel) {
                Some(address) => {
                    let address = normalize_recipient(address, options);
                    if !addresses.contains(&address) {
                        addresses.push(address);
                    }
                }
                None => skipped += 1,
            }
        }

        let sender = campaign
            .sender
            .address(channel)
            .or(campaign.sender.name.as_deref())
            .map(str::to_string);

        let submits = addresses.iter().map(|address| {
            let mut builder = Message::builder(channel)
                .to(address.clone())
                .body(campaign.message.clone())
                .bulk(campaign.id.to_string())
                .campaign(campaign.id)
                .priority(campaign.priority)
                .created_at(campaign.created_at)
                .metadata(json!({ "form": campaign.form, "title": campaign.title }));
            if let Some(sender) = &sender {
                builder = builder.sender(sender.clone());
            }
            if let Some(subject) = &campaign.subject {
                builder = builder.subject(subject.clone());
            }
            self.scheduler.submit(builder.build(), None)
        });
        let outcomes = join_all(submits).await;

        let mut report = ChannelReport {
            channel,
            messages: Vec::new(),
            failed: Vec::new(),
            skipped,
        };
        for (address, outcome) in addresses.into_iter().zip(outcomes) {
            match outcome {
                Ok(message) => report.messages.push(message.id),
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Campaign message not queued");
                    report.failed.push(RecipientFailure {
                        address,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }
}
