//! Dispatch scheduler.
//!
//! Decouples creating a message from sending it. Push messages get a job on
//! the dispatch queue and are sent by a worker, with retries and backoff.
//! Pull messages get no job: they wait in the store until a device fetches
//! them through the sync protocol.

mod backoff;
mod events;
mod job;
mod queue;

pub use backoff::{Backoff, BackoffConfig, ExponentialBackoff};
pub use events::SchedulerEvent;
pub use job::{Job, JobHandler, JobOptions, JobOutcome};
pub use queue::{DrainReport, JobQueue, QueueError, QueueStats};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::message::{
    Message, MessageDraft, MessageError, MessageService, MessageState, Transition,
};
use crate::store::MessageFilter;

/// Errors returned by scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Per-message outcome of a bulk requeue
#[derive(Debug, Default, Serialize)]
pub struct RequeueReport {
    pub requeued: Vec<Uuid>,
    /// Messages that already had a job waiting or running, or went out
    /// since the filter matched them
    pub skipped: Vec<Uuid>,
    pub failed: Vec<RequeueFailure>,
}

#[derive(Debug, Serialize)]
pub struct RequeueFailure {
    pub message_id: Uuid,
    pub error: String,
}

/// Owns the dispatch queue and feeds it messages
pub struct Scheduler {
    service: Arc<MessageService>,
    queue: Arc<JobQueue>,
    events: broadcast::Sender<SchedulerEvent>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(service: Arc<MessageService>, config: SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        let queue = Arc::new(JobQueue::new(
            config.queue_name.clone(),
            config.concurrency,
            events.clone(),
        ));
        Self {
            service,
            queue,
            events,
            config,
        }
    }

    pub fn service(&self) -> &Arc<MessageService> {
        &self.service
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Job options from configuration
    pub fn default_options(&self) -> JobOptions {
        JobOptions::default()
            .with_attempts(self.config.attempts)
            .with_backoff(self.config.backoff())
    }

    /// Persist a message in its queued state and, for push transports,
    /// submit a send job keyed by the message id.
    ///
    /// Only the id of `message` is used: the stored record is transitioned,
    /// so a copy loaded earlier cannot undo a send that happened since. A
    /// message that already went out is returned as stored, without a job.
    #[tracing::instrument(
        name = "scheduler.enqueue",
        skip(self, message, options),
        fields(message_id = %message.id, mode = message.mode.as_str())
    )]
    pub async fn enqueue(
        &self,
        message: Message,
        options: Option<JobOptions>,
    ) -> Result<Message, SchedulerError> {
        let message_id = message.id;

        if !self.queue.is_accepting() {
            let error = QueueError::Closed(self.queue.name().to_string());
            self.emit_error(Some(message_id), &error.to_string());
            return Err(error.into());
        }

        if self.queue.contains(message_id) {
            tracing::debug!(message_id = %message_id, "Message already has a pending job");
            return Ok(message);
        }

        let message = match self.service.queue(message_id).await {
            Ok((message, Transition::Applied)) => message,
            Ok((message, Transition::Unchanged)) => {
                tracing::debug!(message_id = %message_id, state = %message.state, "Message already went out, not queued again");
                return Ok(message);
            }
            Err(e) => {
                self.emit_error(Some(message_id), &e.to_string());
                return Err(e.into());
            }
        };

        if message.is_pull() {
            let _ = self.events.send(SchedulerEvent::Queued {
                message_id,
                job_id: None,
            });
            return Ok(message);
        }

        let options = options
            .unwrap_or_else(|| self.default_options())
            .with_priority(message.priority);

        match self.queue.push(message_id, &options) {
            Ok(Some(job_id)) => {
                let _ = self.events.send(SchedulerEvent::Queued {
                    message_id,
                    job_id: Some(job_id),
                });
            }
            Ok(None) => {
                tracing::debug!(message_id = %message_id, "Job already pending, not duplicated");
            }
            Err(e) => {
                self.emit_error(Some(message_id), &e.to_string());
                return Err(e.into());
            }
        }

        Ok(message)
    }

    /// Create a message and enqueue it
    pub async fn submit(
        &self,
        draft: MessageDraft,
        options: Option<JobOptions>,
    ) -> Result<Message, SchedulerError> {
        let message = match self.service.create(draft).await {
            Ok(message) => message,
            Err(e) => {
                self.emit_error(None, &e.to_string());
                return Err(e.into());
            }
        };

        // Re-submitting a message that already went out must not send it again
        if message.sent_at.is_some() || message.state == MessageState::Received {
            return Ok(message);
        }

        self.enqueue(message, options).await
    }

    /// Queue again every unsent message matching `filter`.
    ///
    /// Each message is handled independently; one failure does not stop the
    /// rest.
    pub async fn requeue(&self, filter: MessageFilter) -> Result<RequeueReport, SchedulerError> {
        let messages = self.service.unsent(filter).await?;
        let mut report = RequeueReport::default();

        for message in messages {
            let id = message.id;
            if self.queue.contains(id) {
                report.skipped.push(id);
                continue;
            }
            match self.enqueue(message, None).await {
                Ok(message) if message.sent_at.is_some() => report.skipped.push(id),
                Ok(_) => report.requeued.push(id),
                Err(e) => report.failed.push(RequeueFailure {
                    message_id: id,
                    error: e.to_string(),
                }),
            }
        }

        tracing::info!(
            requeued = report.requeued.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Requeue finished"
        );
        let _ = self.events.send(SchedulerEvent::Requeued {
            count: report.requeued.len(),
        });

        Ok(report)
    }

    /// Start the worker pool
    pub fn start(&self) {
        let handler = Arc::new(DispatchHandler {
            service: Arc::clone(&self.service),
        });
        self.queue.start(handler);
    }

    /// Drain with the configured timeout. `None` if already shutting down.
    pub async fn shutdown(&self) -> Option<DrainReport> {
        self.queue
            .shutdown(Duration::from_millis(self.config.shutdown_timeout_ms))
            .await
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    fn emit_error(&self, message_id: Option<Uuid>, error: &str) {
        tracing::warn!(message_id = ?message_id, error = %error, "Failed to queue message");
        let _ = self.events.send(SchedulerEvent::QueueError {
            message_id,
            error: error.to_string(),
        });
    }
}

/// Sends the message behind a job and judges the job by the message's
/// resulting state, not by the transport call alone.
struct DispatchHandler {
    service: Arc<MessageService>,
}

#[async_trait]
impl JobHandler for DispatchHandler {
    async fn handle(&self, job: &Job) -> JobOutcome {
        let message = match self.service.get(job.message_id).await {
            Ok(Some(message)) => message,
            Ok(None) => return JobOutcome::Failed(format!("message {} not found", job.message_id)),
            Err(e) => return JobOutcome::Retry(e.to_string()),
        };

        if message.state == MessageState::Delivered {
            tracing::debug!(message_id = %message.id, "Message already delivered, skipping send");
            return JobOutcome::Completed;
        }

        match self.service.send(job.message_id).await {
            Ok(message) if message.state == MessageState::Failed => JobOutcome::Retry(
                message
                    .result
                    .and_then(|r| r.message)
                    .unwrap_or_else(|| "transport reported failure".to_string()),
            ),
            Ok(_) => JobOutcome::Completed,
            Err(e) if e.is_transient() => JobOutcome::Retry(e.to_string()),
            Err(e) => JobOutcome::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageType, NormalizeOptions};
    use crate::store::MemoryMessageStore;
    use crate::transport::{EchoTransport, SmsSyncTransport, TransportRegistry};

    fn create_test_scheduler() -> Scheduler {
        let store = Arc::new(MemoryMessageStore::new());
        let registry = TransportRegistry::new()
            .with(Arc::new(EchoTransport::new()))
            .with(Arc::new(SmsSyncTransport::new()));
        let service = Arc::new(
            MessageService::new(store, Arc::new(registry), NormalizeOptions::default())
                .with_default_transport(MessageType::Email, "echo")
                .with_default_transport(MessageType::Sms, "smssync"),
        );
        let config = SchedulerConfig {
            concurrency: 2,
            ..SchedulerConfig::default()
        };
        Scheduler::new(service, config)
    }

    fn email(to: &str) -> MessageDraft {
        Message::builder(MessageType::Email)
            .sender("postman@example.com")
            .to(to)
            .body("hello")
            .build()
    }

    #[tokio::test]
    async fn test_enqueue_push_message_creates_job() {
        let scheduler = create_test_scheduler();
        let mut events = scheduler.subscribe();

        let message = scheduler.submit(email("a@example.com"), None).await.unwrap();
        assert_eq!(message.state, MessageState::Queued);
        assert!(message.queued_at.is_some());
        assert_eq!(scheduler.stats().pending, 1);

        match events.recv().await.unwrap() {
            SchedulerEvent::Queued { message_id, job_id } => {
                assert_eq!(message_id, message.id);
                assert!(job_id.is_some());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_enqueue_pull_message_has_no_job() {
        let scheduler = create_test_scheduler();
        let draft = Message::builder(MessageType::Sms)
            .sender("postman")
            .to("0714000000")
            .body("hello")
            .build();

        let message = scheduler.submit(draft, None).await.unwrap();
        assert_eq!(message.state, MessageState::Unknown);
        assert_eq!(scheduler.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_worker_delivers_message() {
        let scheduler = create_test_scheduler();
        let mut events = scheduler.subscribe();
        scheduler.start();

        let message = scheduler.submit(email("b@example.com"), None).await.unwrap();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let SchedulerEvent::Completed { message_id, attempts } = event {
                assert_eq!(message_id, message.id);
                assert_eq!(attempts, 1);
                break;
            }
        }

        let stored = scheduler.service().load(message.id).await.unwrap();
        assert_eq!(stored.state, MessageState::Delivered);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_requeue_skips_pending_jobs() {
        let scheduler = create_test_scheduler();
        let message = scheduler.submit(email("c@example.com"), None).await.unwrap();

        let report = scheduler.requeue(MessageFilter::new()).await.unwrap();
        assert_eq!(report.skipped, vec![message.id]);
        assert!(report.requeued.is_empty());
    }

    #[tokio::test]
    async fn test_stale_enqueue_leaves_delivered_message() {
        let scheduler = create_test_scheduler();
        let service = scheduler.service().clone();
        let created = service.create(email("e@example.com")).await.unwrap();
        let snapshot = service
            .unsent(MessageFilter::new())
            .await
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(snapshot.id, created.id);

        let delivered = service.send(created.id).await.unwrap();
        assert_eq!(delivered.state, MessageState::Delivered);

        let message = scheduler.enqueue(snapshot, None).await.unwrap();
        assert_eq!(message.state, MessageState::Delivered);
        assert_eq!(scheduler.stats().pending, 0);

        let stored = service.load(created.id).await.unwrap();
        assert_eq!(stored.state, MessageState::Delivered);
        assert_eq!(stored.sent_at, delivered.sent_at);
        assert_eq!(stored.delivered_at, delivered.delivered_at);
    }

    #[tokio::test]
    async fn test_requeue_skips_messages_sent_meanwhile() {
        let scheduler = create_test_scheduler();
        let service = scheduler.service().clone();
        let first = service.create(email("f@example.com")).await.unwrap();
        let second = service.create(email("g@example.com")).await.unwrap();
        service.send(first.id).await.unwrap();

        let report = scheduler.requeue(MessageFilter::new()).await.unwrap();
        assert_eq!(report.requeued, vec![second.id]);
        assert!(report.failed.is_empty());
        assert_eq!(scheduler.stats().pending, 1);
        assert_eq!(
            service.load(first.id).await.unwrap().state,
            MessageState::Delivered
        );
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let scheduler = create_test_scheduler();
        scheduler.start();
        assert!(scheduler.shutdown().await.is_some());
        assert!(scheduler.shutdown().await.is_none());

        let mut events = scheduler.subscribe();
        let result = scheduler.submit(email("d@example.com"), None).await;
        assert!(matches!(result, Err(SchedulerError::Queue(QueueError::Closed(_)))));
        assert!(matches!(
            events.recv().await.unwrap(),
            SchedulerEvent::QueueError { .. }
        ));
    }
}
