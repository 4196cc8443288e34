//! SMSSync pull synchronization.
//!
//! A phone running the SMSSync app does the actual SMS sending and polls
//! this service over HTTP. The handshake has five steps, each safe to repeat:
//!
//! 1. receive: the device posts an SMS it received
//! 2. fetch-to-send: the device asks for pending outbound SMS
//! 3. acknowledge-queued: the device reports which of those it accepted
//! 4. fetch-awaiting-delivery: the device asks which sent SMS still need a
//!    delivery report
//! 5. report-delivered: the device posts delivery reports
//!
//! Units handed to the device are correlated by `"<messageId>:<recipient>"`,
//! so one message with N recipients becomes N trackable units. Every step
//! answers with a well-formed payload; nothing here fails at the HTTP level.

mod protocol;
mod routes;

pub use protocol::{
    correlation, parse_correlation, DeliveryReport, InboundSms, OutgoingSms, Payload,
    SyncResponse, SECRET_MISMATCH,
};
pub use routes::{smssync_routes, SyncQuery};

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use uuid::Uuid;

use crate::config::SmsSyncConfig;
use crate::message::{
    inbound_fingerprint, Direction, Message, MessageError, MessageService, MessageState,
    MessageType, Priority, SendMode, SendResult,
};
use crate::metrics::SyncMetrics;
use crate::store::MessageFilter;
use crate::transport::SmsSyncTransport;

/// Application hook for inbound SMS.
///
/// Returns the body of an auto-reply, or `None` to stay silent.
#[async_trait]
pub trait InboundHook: Send + Sync {
    async fn on_message_received(&self, message: &Message) -> Option<String>;
}

/// How one correlated message fared in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Applied,
    Unknown,
    /// Store trouble; the device should try again
    Transient,
}

/// Server side of the SMSSync handshake
pub struct SmsSync {
    config: SmsSyncConfig,
    transport: String,
    service: Arc<MessageService>,
    hook: Option<Arc<dyn InboundHook>>,
}

impl SmsSync {
    pub fn new(config: SmsSyncConfig, service: Arc<MessageService>) -> Self {
        Self {
            config,
            transport: SmsSyncTransport::NAME.to_string(),
            service,
            hook: None,
        }
    }

    /// Serve messages of the transport registered under `name`
    pub fn with_transport(mut self, name: impl Into<String>) -> Self {
        self.transport = name.into();
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn InboundHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn config(&self) -> &SmsSyncConfig {
        &self.config
    }

    pub fn check_secret(&self, provided: Option<&str>) -> bool {
        provided.map(str::trim) == Some(self.config.secret.as_str())
    }

    /// Ingest an SMS received by the device and answer with the auto-reply,
    /// if any. The same SMS posted twice is stored once and the hook only
    /// runs the first time.
    #[tracing::instrument(name = "smssync.receive", skip(self, sms), fields(device_id = ?sms.device_id))]
    pub async fn receive(&self, sms: InboundSms) -> SyncResponse {
        let from = sms.from.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let body = sms.message.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let (Some(from), Some(body)) = (from, body) else {
            tracing::debug!("Inbound SMS without sender or text");
            return SyncResponse::failure("Invalid message");
        };

        let sent_to = sms
            .sent_to
            .as_deref()
            .or(sms.device_id.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.transport.as_str())
            .to_string();
        let hash = inbound_fingerprint(
            sms.external_id(),
            from,
            &sent_to,
            body,
            sms.timestamp().as_deref(),
        );

        let draft = Message::builder(MessageType::Sms)
            .direction(Direction::Inbound)
            .transport(self.transport.clone())
            .sender(from)
            .to(sent_to)
            .body(body)
            .priority(Priority::Low)
            .state(MessageState::Received)
            .hash(hash)
            .metadata(json!({ "raw": &sms }))
            .build();

        let ingested = match self.service.ingest(draft).await {
            Ok(ingested) => ingested,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to store inbound SMS");
                return SyncResponse::failure(Self::describe(&e));
            }
        };

        let mut messages = Vec::new();
        if !ingested.duplicate {
            if let Some(reply) = self.reply_to(&ingested.message).await {
                messages.push(reply);
            }
        }

        SyncResponse::send_task(&self.config.secret, messages)
    }

    /// Pending outbound SMS for the device, one unit per recipient
    pub async fn fetch_to_send(&self) -> SyncResponse {
        let filter = self.filter().state(MessageState::Unknown);
        match self.service.find(&filter).await {
            Ok(messages) => {
                let units: Vec<OutgoingSms> = messages.iter().flat_map(expand).collect();
                tracing::debug!(units = units.len(), "Handing SMS to device");
                SyncResponse::send_task(&self.config.secret, units)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load pending SMS");
                SyncResponse::failure(Self::describe(&e))
            }
        }
    }

    /// Mark the messages behind `uuids` queued on the device and echo the
    /// ids that were recognized.
    #[tracing::instrument(name = "smssync.acknowledge", skip(self, uuids), fields(count = uuids.len()))]
    pub async fn acknowledge_queued(&self, uuids: Vec<String>) -> SyncResponse {
        let (groups, mut unknown) = group_by_message(uuids);

        let outcomes = join_all(groups.iter().map(|(id, _)| self.acknowledge_one(*id))).await;

        let mut recognized = Vec::new();
        for ((_, uuids), outcome) in groups.into_iter().zip(outcomes) {
            match outcome {
                Outcome::Applied => recognized.extend(uuids),
                Outcome::Unknown => unknown += uuids.len(),
                Outcome::Transient => {}
            }
        }

        if unknown > 0 {
            SyncMetrics::record_unknown_correlation(unknown as u64);
        }
        tracing::info!(recognized = recognized.len(), unknown, "Device acknowledged queued SMS");

        SyncResponse::queued(recognized)
    }

    /// Units the device sent but has not reported on yet
    pub async fn awaiting_delivery(&self) -> SyncResponse {
        let filter = self.filter().state(MessageState::Queued);
        match self.service.find(&filter).await {
            Ok(messages) => SyncResponse::awaiting(
                messages
                    .iter()
                    .flat_map(expand)
                    .map(|unit| unit.uuid)
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load SMS awaiting delivery");
                SyncResponse::failure(Self::describe(&e))
            }
        }
    }

    /// Finalize messages from device delivery reports.
    ///
    /// All reports for one message in a batch decide it together: any
    /// failure fails the message. Reports for messages that are already
    /// delivered or failed are accepted and ignored.
    #[tracing::instrument(name = "smssync.report", skip(self, reports), fields(count = reports.len()))]
    pub async fn report_delivered(&self, reports: Vec<DeliveryReport>) -> SyncResponse {
        let mut unknown = 0usize;
        let mut groups: Vec<(Uuid, Vec<DeliveryReport>)> = Vec::new();
        for report in reports {
            match parse_correlation(&report.uuid) {
                Some((id, _)) => match groups.iter_mut().find(|(g, _)| *g == id) {
                    Some((_, group)) => group.push(report),
                    None => groups.push((id, vec![report])),
                },
                None => {
                    tracing::debug!(uuid = %report.uuid, "Malformed correlation id in report");
                    unknown += 1;
                }
            }
        }

        let outcomes = join_all(groups.iter().map(|(id, reports)| self.report_one(*id, reports))).await;

        let mut transient = 0usize;
        for ((_, reports), outcome) in groups.iter().zip(outcomes) {
            match outcome {
                Outcome::Applied => {}
                Outcome::Unknown => unknown += reports.len(),
                Outcome::Transient => transient += 1,
            }
        }

        if unknown > 0 {
            SyncMetrics::record_unknown_correlation(unknown as u64);
        }

        if transient > 0 {
            SyncResponse::failure("Store unavailable")
        } else {
            SyncResponse::success()
        }
    }

    async fn acknowledge_one(&self, id: Uuid) -> Outcome {
        match self.owned(id).await {
            Outcome::Applied => {}
            other => return other,
        }

        match self.service.acknowledge_queued(id).await {
            Ok(_) => Outcome::Applied,
            Err(e) => self.failed(id, e),
        }
    }

    async fn report_one(&self, id: Uuid, reports: &[DeliveryReport]) -> Outcome {
        match self.owned(id).await {
            Outcome::Applied => {}
            other => return other,
        }

        let failed = reports.iter().any(DeliveryReport::is_failure);
        let first = reports.iter().find(|r| r.is_failure() == failed);
        let mut result = if failed {
            SendResult::failure(
                first
                    .and_then(DeliveryReport::describe)
                    .unwrap_or_else(|| "Delivery failed".to_string()),
            )
            .with_state(MessageState::Failed)
        } else {
            let mut ok = SendResult::ok().with_state(MessageState::Delivered);
            ok.message = first.and_then(DeliveryReport::describe);
            ok
        };
        if let Some(code) = first.and_then(|r| r.sent_result_code) {
            result = result.with_code(code.to_string());
        }
        result = result.with_metadata(json!({ "reports": reports }));

        let outcome = if failed {
            self.service.mark_failed(id, result).await
        } else {
            self.service.mark_delivered(id, Some(result)).await
        };

        match outcome {
            Ok((message, transition)) => {
                tracing::debug!(
                    message_id = %id,
                    state = %message.state,
                    applied = transition.is_applied(),
                    "Delivery report applied"
                );
                Outcome::Applied
            }
            Err(e) => self.failed(id, e),
        }
    }

    /// Whether `id` is an outbound message of this transport
    async fn owned(&self, id: Uuid) -> Outcome {
        match self.service.get(id).await {
            Ok(Some(message))
                if message.transport == self.transport
                    && message.direction == Direction::Outbound =>
            {
                Outcome::Applied
            }
            Ok(_) => {
                tracing::warn!(message_id = %id, "Device referenced an unknown message");
                Outcome::Unknown
            }
            Err(e) => self.failed(id, e),
        }
    }

    fn failed(&self, id: Uuid, error: MessageError) -> Outcome {
        if error.is_transient() {
            tracing::warn!(message_id = %id, error = %error, "Store error during sync");
            Outcome::Transient
        } else {
            tracing::warn!(message_id = %id, error = %error, "Device update rejected");
            Outcome::Unknown
        }
    }

    /// Persist the hook's auto-reply as an outbound message already handed
    /// to the device, so its delivery report correlates like any other.
    async fn reply_to(&self, inbound: &Message) -> Option<OutgoingSms> {
        if !self.config.reply {
            return None;
        }
        let hook = self.hook.as_ref()?;
        let body = hook.on_message_received(inbound).await?;
        let body = body.trim();
        if body.is_empty() || Some(body) == inbound.body.as_deref() {
            return None;
        }

        let sender = inbound
            .to
            .first()
            .cloned()
            .unwrap_or_else(|| self.transport.clone());
        let draft = Message::builder(MessageType::Sms)
            .transport(self.transport.clone())
            .sender(sender)
            .to(inbound.sender.clone())
            .body(body)
            .metadata(json!({ "inReplyTo": inbound.id }))
            .build();

        let reply = match self.service.create(draft).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(message_id = %inbound.id, error = %e, "Failed to store auto-reply");
                return None;
            }
        };
        if let Err(e) = self.service.acknowledge_queued(reply.id).await {
            tracing::warn!(message_id = %reply.id, error = %e, "Failed to mark auto-reply queued");
        }

        expand(&reply).into_iter().next()
    }

    fn filter(&self) -> MessageFilter {
        MessageFilter::new()
            .message_type(MessageType::Sms)
            .direction(Direction::Outbound)
            .mode(SendMode::Pull)
            .transport(self.transport.clone())
    }

    fn describe(error: &MessageError) -> String {
        if error.is_transient() {
            "Store unavailable".to_string()
        } else {
            error.to_string()
        }
    }
}

/// One unit per recipient
fn expand(message: &Message) -> Vec<OutgoingSms> {
    let text = message
        .body
        .clone()
        .or_else(|| message.subject.clone())
        .unwrap_or_default();
    message
        .to
        .iter()
        .map(|to| OutgoingSms {
            to: to.clone(),
            message: text.clone(),
            uuid: correlation(message.id, to),
        })
        .collect()
}

/// Distinct message ids in first-seen order, with their correlation ids.
/// Also returns the number of ids that could not be parsed.
fn group_by_message(uuids: Vec<String>) -> (Vec<(Uuid, Vec<String>)>, usize) {
    let mut groups: Vec<(Uuid, Vec<String>)> = Vec::new();
    let mut malformed = 0;
    for uuid in uuids {
        match parse_correlation(&uuid).map(|(id, _)| id) {
            Some(id) => match groups.iter_mut().find(|(g, _)| *g == id) {
                Some((_, group)) => {
                    if !group.contains(&uuid) {
                        group.push(uuid);
                    }
                }
                None => groups.push((id, vec![uuid])),
            },
            None => {
                tracing::debug!(uuid = %uuid, "Malformed correlation id");
                malformed += 1;
            }
        }
    }
    (groups, malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NormalizeOptions;
    use crate::store::{MemoryMessageStore, MessageStore};
    use crate::transport::{EchoTransport, TransportRegistry};

    struct EchoBack;

    #[async_trait]
    impl InboundHook for EchoBack {
        async fn on_message_received(&self, message: &Message) -> Option<String> {
            message.body.as_ref().map(|b| format!("Received: {}", b))
        }
    }

    fn create_test_sync() -> (SmsSync, Arc<MessageService>, Arc<MemoryMessageStore>) {
        let store = Arc::new(MemoryMessageStore::new());
        let registry = TransportRegistry::new()
            .with(Arc::new(EchoTransport::new()))
            .with(Arc::new(SmsSyncTransport::new()));
        let service = Arc::new(
            MessageService::new(store.clone(), Arc::new(registry), NormalizeOptions::default())
                .with_default_transport(MessageType::Sms, "smssync"),
        );
        let sync = SmsSync::new(SmsSyncConfig::default(), service.clone());
        (sync, service, store)
    }

    async fn pending_sms(service: &MessageService, to: &[&str]) -> Message {
        let mut builder = Message::builder(MessageType::Sms)
            .sender("postman")
            .body("Your code is 1234");
        for recipient in to {
            builder = builder.to(*recipient);
        }
        let message = service.create(builder.build()).await.unwrap();
        service.queue(message.id).await.unwrap().0
    }

    fn inbound() -> InboundSms {
        InboundSms {
            from: Some("+255700000001".into()),
            sent_to: Some("9090".into()),
            message: Some("hi".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_check_secret() {
        let (sync, _, _) = create_test_sync();
        assert!(sync.check_secret(Some("smssync")));
        assert!(!sync.check_secret(Some("nope")));
        assert!(!sync.check_secret(None));
    }

    #[tokio::test]
    async fn test_receive_stores_inbound_once() {
        let (sync, service, store) = create_test_sync();

        assert!(sync.receive(inbound()).await.is_success());
        assert!(sync.receive(inbound()).await.is_success());
        assert_eq!(store.count().await.unwrap(), 1);

        let stored = service
            .find(&MessageFilter::new().direction(Direction::Inbound))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].state, MessageState::Received);
        assert_eq!(stored[0].mode, SendMode::Pull);
        assert_eq!(stored[0].sender, "255700000001");
        assert_eq!(stored[0].metadata["raw"]["message"], "hi");
    }

    #[tokio::test]
    async fn test_receive_rejects_incomplete_sms() {
        let (sync, _, _) = create_test_sync();
        let response = sync.receive(InboundSms::default()).await;
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_receive_with_reply() {
        let (sync, service, _) = create_test_sync();
        let sync = sync.with_hook(Arc::new(EchoBack));

        let response = sync.receive(inbound()).await;
        let SyncResponse::Payload { payload } = response else {
            panic!("expected payload");
        };
        let messages = payload.messages.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].to, "255700000001");
        assert_eq!(messages[0].message, "Received: hi");

        let (reply_id, _) = parse_correlation(&messages[0].uuid).unwrap();
        let reply = service.load(reply_id).await.unwrap();
        assert_eq!(reply.state, MessageState::Queued);
        assert_eq!(reply.direction, Direction::Outbound);

        // Duplicate delivery of the same SMS does not reply again
        let again = sync.receive(inbound()).await;
        let SyncResponse::Payload { payload } = again else {
            panic!("expected payload");
        };
        assert!(payload.messages.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_expands_recipients() {
        let (sync, service, _) = create_test_sync();
        let message = pending_sms(&service, &["0714000001", "0714000002"]).await;

        let SyncResponse::Payload { payload } = sync.fetch_to_send().await else {
            panic!("expected payload");
        };
        assert_eq!(payload.task.as_deref(), Some("send"));
        assert_eq!(payload.secret.as_deref(), Some("smssync"));
        let units = payload.messages.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].uuid, correlation(message.id, "255714000001"));
        assert_eq!(units[1].to, "255714000002");
        assert_eq!(units[0].message, "Your code is 1234");
    }

    #[tokio::test]
    async fn test_full_handshake() {
        let (sync, service, _) = create_test_sync();
        let message = pending_sms(&service, &["0714000001"]).await;
        let uuid = correlation(message.id, "255714000001");

        let acked = sync.acknowledge_queued(vec![uuid.clone()]).await;
        assert_eq!(acked, SyncResponse::queued(vec![uuid.clone()]));
        assert_eq!(service.load(message.id).await.unwrap().state, MessageState::Queued);

        // Nothing left to fetch, one unit awaiting a report
        let SyncResponse::Payload { payload } = sync.fetch_to_send().await else {
            panic!("expected payload");
        };
        assert!(payload.messages.unwrap().is_empty());
        assert_eq!(sync.awaiting_delivery().await, SyncResponse::awaiting(vec![uuid.clone()]));

        let report = DeliveryReport {
            uuid: uuid.clone(),
            sent_result_code: Some(0),
            delivered_result_code: Some(-1),
            ..Default::default()
        };
        assert!(sync.report_delivered(vec![report]).await.is_success());

        let delivered = service.load(message.id).await.unwrap();
        assert_eq!(delivered.state, MessageState::Delivered);
        assert!(delivered.delivered_at.is_some());
        assert_eq!(sync.awaiting_delivery().await, SyncResponse::awaiting(vec![]));
    }

    #[tokio::test]
    async fn test_failed_report() {
        let (sync, service, _) = create_test_sync();
        let message = pending_sms(&service, &["0714000001"]).await;
        let uuid = correlation(message.id, "255714000001");
        sync.acknowledge_queued(vec![uuid.clone()]).await;

        let report = DeliveryReport {
            uuid,
            sent_result_code: Some(1),
            sent_result_message: Some("No service".into()),
            ..Default::default()
        };
        assert!(sync.report_delivered(vec![report]).await.is_success());

        let failed = service.load(message.id).await.unwrap();
        assert_eq!(failed.state, MessageState::Failed);
        let result = failed.result.unwrap();
        assert_eq!(result.message.as_deref(), Some("No service"));
        assert_eq!(result.code.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_resend_after_failed_report_is_fetched_again() {
        let (sync, service, _) = create_test_sync();
        let message = pending_sms(&service, &["0714000001"]).await;
        let uuid = correlation(message.id, "255714000001");
        sync.acknowledge_queued(vec![uuid.clone()]).await;

        let report = DeliveryReport {
            uuid: uuid.clone(),
            sent_result_code: Some(1),
            ..Default::default()
        };
        sync.report_delivered(vec![report]).await;
        assert_eq!(service.load(message.id).await.unwrap().state, MessageState::Failed);

        let resent = service.resend(message.id).await.unwrap();
        assert_eq!(resent.state, MessageState::Unknown);
        assert!(resent.sent_at.is_none());

        let SyncResponse::Payload { payload } = sync.fetch_to_send().await else {
            panic!("expected payload");
        };
        let units = payload.messages.unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].uuid, uuid);

        // The second pass goes through the handshake like the first
        assert_eq!(
            sync.acknowledge_queued(vec![uuid.clone()]).await,
            SyncResponse::queued(vec![uuid])
        );
        assert_eq!(service.load(message.id).await.unwrap().state, MessageState::Queued);
    }

    #[tokio::test]
    async fn test_unknown_uuids_are_not_echoed() {
        let (sync, service, _) = create_test_sync();
        let message = pending_sms(&service, &["0714000001"]).await;
        let known = correlation(message.id, "255714000001");
        let stale = correlation(Uuid::new_v4(), "255714000009");

        let response = sync
            .acknowledge_queued(vec![known.clone(), stale, "garbage".into()])
            .await;
        assert_eq!(response, SyncResponse::queued(vec![known]));
    }

    #[tokio::test]
    async fn test_store_outage_reports_failure() {
        let (sync, service, store) = create_test_sync();
        let message = pending_sms(&service, &["0714000001"]).await;
        store.set_available(false);

        let report = DeliveryReport {
            uuid: correlation(message.id, "255714000001"),
            sent_result_code: Some(0),
            ..Default::default()
        };
        assert!(!sync.report_delivered(vec![report]).await.is_success());
        assert!(!sync.fetch_to_send().await.is_success());
    }
}
