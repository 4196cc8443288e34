use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{MessageState, MessageType, Priority};

/// Kind of announcement a campaign carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CampaignForm {
    Alert,
    #[default]
    Information,
    Warning,
    Announcement,
    Reminder,
}

/// A person reachable on one or more channels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
}

impl Contact {
    /// Address of this contact on `channel`, if it has one
    pub fn address(&self, channel: MessageType) -> Option<&str> {
        let address = match channel {
            MessageType::Email => self.email.as_deref(),
            MessageType::Sms => self.mobile.as_deref(),
            MessageType::Push => self.push_token.as_deref(),
        };
        address.map(str::trim).filter(|a| !a.is_empty())
    }
}

/// Message counters of one channel, by lifecycle bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatistics {
    /// Waiting for a transport or a device
    pub queued: u64,
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl ChannelStatistics {
    pub fn record(&mut self, state: MessageState) {
        match state {
            MessageState::Unknown | MessageState::Queued => self.queued += 1,
            MessageState::Sent => self.sent += 1,
            MessageState::Delivered => self.delivered += 1,
            MessageState::Failed => self.failed += 1,
            MessageState::Received => {}
        }
    }

    pub fn total(&self) -> u64 {
        self.queued + self.sent + self.delivered + self.failed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStatistics {
    #[serde(default)]
    pub sms: ChannelStatistics,
    #[serde(default)]
    pub email: ChannelStatistics,
    #[serde(default)]
    pub push: ChannelStatistics,
}

impl CampaignStatistics {
    pub fn channel(&self, channel: MessageType) -> &ChannelStatistics {
        match channel {
            MessageType::Sms => &self.sms,
            MessageType::Email => &self.email,
            MessageType::Push => &self.push,
        }
    }

    pub fn channel_mut(&mut self, channel: MessageType) -> &mut ChannelStatistics {
        match channel {
            MessageType::Sms => &mut self.sms,
            MessageType::Email => &mut self.email,
            MessageType::Push => &mut self.push,
        }
    }
}

/// One message to many recipients across one or more channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub form: CampaignForm,
    #[serde(default)]
    pub title: Option<String>,
    /// Sending identity; its address on each channel is used as the sender
    #[serde(default)]
    pub sender: Contact,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    #[serde(default = "default_channels")]
    pub channels: Vec<MessageType>,
    /// Labels handed to the contact resolver
    #[serde(default)]
    pub audiences: Vec<String>,
    /// Opaque filter handed to the contact resolver
    #[serde(default)]
    pub criteria: serde_json::Value,
    #[serde(default)]
    pub to: Vec<Contact>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub statistics: CampaignStatistics,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

fn default_channels() -> Vec<MessageType> {
    vec![MessageType::Sms]
}

impl Campaign {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            form: CampaignForm::default(),
            title: None,
            sender: Contact::default(),
            subject: None,
            message: message.into(),
            channels: default_channels(),
            audiences: Vec::new(),
            criteria: serde_json::Value::Null,
            to: Vec::new(),
            priority: Priority::default(),
            statistics: CampaignStatistics::default(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            sent_at: None,
        }
    }

    pub fn with_channels(mut self, channels: impl IntoIterator<Item = MessageType>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    pub fn with_sender(mut self, sender: Contact) -> Self {
        self.sender = sender;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_recipient(mut self, contact: Contact) -> Self {
        self.to.push(contact);
        self
    }

    /// Requested channels without repeats, in request order
    pub fn distinct_channels(&self) -> Vec<MessageType> {
        let mut channels = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            if !channels.contains(channel) {
                channels.push(*channel);
            }
        }
        channels
    }
}
