use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::message::{Direction, MessageState, SendMode};
use crate::scheduler::{RequeueReport, Scheduler};
use crate::store::MessageFilter;

/// Background task that puts unsent push messages back on the dispatch
/// queue.
///
/// Jobs live in memory only, so messages created or queued before a
/// restart (or dropped by a shutdown drain) are found again here. Pull
/// messages are left alone: they wait in the store for a device anyway.
pub struct RecoveryTask {
    scheduler: Arc<Scheduler>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl RecoveryTask {
    /// An `interval` of zero sweeps once at startup only
    pub fn new(
        scheduler: Arc<Scheduler>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            scheduler,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        self.sweep().await;

        if self.interval.is_zero() {
            tracing::info!("Recovery sweep interval disabled, startup sweep only");
            return;
        }

        let mut timer = tokio::time::interval(self.interval);
        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Recovery task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Recovery task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.sweep().await;
                }
            }
        }

        tracing::info!("Recovery task stopped");
    }

    /// Requeue outbound push messages that were never sent
    pub async fn sweep(&self) -> Option<RequeueReport> {
        let filter = MessageFilter::new()
            .direction(Direction::Outbound)
            .mode(SendMode::Push)
            .state(MessageState::Unknown)
            .state(MessageState::Queued);

        match self.scheduler.requeue(filter).await {
            Ok(report) => {
                if !report.requeued.is_empty() || !report.failed.is_empty() {
                    tracing::info!(
                        requeued = report.requeued.len(),
                        failed = report.failed.len(),
                        "Recovered unsent messages"
                    );
                }
                Some(report)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Recovery sweep failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::message::{Message, MessageService, MessageType, NormalizeOptions};
    use crate::store::MemoryMessageStore;
    use crate::transport::{EchoTransport, SmsSyncTransport, TransportRegistry};

    fn create_test_scheduler() -> Arc<Scheduler> {
        let registry = TransportRegistry::new()
            .with(Arc::new(EchoTransport::new()))
            .with(Arc::new(SmsSyncTransport::new()));
        let service = Arc::new(
            MessageService::new(
                Arc::new(MemoryMessageStore::new()),
                Arc::new(registry),
                NormalizeOptions::default(),
            )
            .with_default_transport(MessageType::Email, "echo")
            .with_default_transport(MessageType::Sms, "smssync"),
        );
        Arc::new(Scheduler::new(service, SchedulerConfig::default()))
    }

    #[tokio::test]
    async fn test_sweep_requeues_only_push_messages() {
        let scheduler = create_test_scheduler();
        let service = scheduler.service().clone();

        // Created but never enqueued, as after a crash
        let email = service
            .create(
                Message::builder(MessageType::Email)
                    .sender("postman@example.com")
                    .to("a@example.com")
                    .body("hello")
                    .build(),
            )
            .await
            .unwrap();
        service
            .create(
                Message::builder(MessageType::Sms)
                    .sender("postman")
                    .to("0714000000")
                    .body("hello")
                    .build(),
            )
            .await
            .unwrap();

        let (_tx, rx) = broadcast::channel(1);
        let task = RecoveryTask::new(scheduler.clone(), Duration::ZERO, rx);
        let report = task.sweep().await.unwrap();

        assert_eq!(report.requeued, vec![email.id]);
        assert_eq!(scheduler.stats().pending, 1);
        assert_eq!(
            service.load(email.id).await.unwrap().state,
            MessageState::Queued
        );

        // Second sweep finds the job already pending
        let again = task.sweep().await.unwrap();
        assert!(again.requeued.is_empty());
        assert_eq!(again.skipped, vec![email.id]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let scheduler = create_test_scheduler();
        let (tx, rx) = broadcast::channel(1);
        let task = RecoveryTask::new(scheduler, Duration::from_secs(3600), rx);

        let handle = tokio::spawn(task.run());
        tokio::task::yield_now().await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
