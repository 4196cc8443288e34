//! Graceful shutdown handling.
//!
//! Runs after the HTTP server stopped accepting requests:
//! 1. Signals background tasks (recovery sweep) to stop
//! 2. Closes the dispatch queue and drains in-flight jobs with a timeout
//!
//! Jobs that never ran are dropped from the queue. Their messages stay
//! `Queued` in the store and the recovery sweep picks them up on the next
//! start.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::scheduler::Scheduler;

/// Handles graceful shutdown of the dispatch service
pub struct GracefulShutdown {
    scheduler: Arc<Scheduler>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GracefulShutdown {
    pub fn new(scheduler: Arc<Scheduler>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            scheduler,
            shutdown_tx,
        }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(in_flight = self.scheduler.stats().in_flight)
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Signaling background tasks");
        result.tasks_signaled = self.shutdown_tx.send(()).unwrap_or(0);

        tracing::info!("Phase 2: Draining dispatch queue");
        match self.scheduler.shutdown().await {
            Some(report) => {
                result.queue_drained = report.drained;
                result.jobs_abandoned = report.abandoned;
                result.workers_aborted = report.aborted_workers;
                result.success = true;
            }
            None => {
                tracing::warn!("Dispatch queue was already shutting down");
            }
        }

        result.duration = start.elapsed();

        tracing::info!(
            tasks_signaled = result.tasks_signaled,
            queue_drained = result.queue_drained,
            jobs_abandoned = result.jobs_abandoned,
            workers_aborted = result.workers_aborted,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// False when another shutdown was already in progress
    pub success: bool,
    /// Background tasks that received the stop signal
    pub tasks_signaled: usize,
    /// All in-flight jobs finished within the timeout
    pub queue_drained: bool,
    /// Jobs dropped before they ran; their messages stay queued
    pub jobs_abandoned: usize,
    pub workers_aborted: usize,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::message::{MessageService, NormalizeOptions};
    use crate::store::MemoryMessageStore;
    use crate::transport::{EchoTransport, TransportRegistry};

    fn create_test_scheduler() -> Arc<Scheduler> {
        let registry = TransportRegistry::new().with(Arc::new(EchoTransport::new()));
        let service = Arc::new(MessageService::new(
            Arc::new(MemoryMessageStore::new()),
            Arc::new(registry),
            NormalizeOptions::default(),
        ));
        Arc::new(Scheduler::new(service, SchedulerConfig::default()))
    }

    #[tokio::test]
    async fn test_shutdown_idle_scheduler() {
        let scheduler = create_test_scheduler();
        scheduler.start();
        let (tx, mut rx) = broadcast::channel(1);

        let shutdown = GracefulShutdown::new(scheduler.clone(), tx);
        let result = shutdown.execute("test shutdown").await;

        assert!(result.success);
        assert!(result.queue_drained);
        assert_eq!(result.tasks_signaled, 1);
        assert_eq!(result.jobs_abandoned, 0);
        assert!(rx.try_recv().is_ok());
        assert!(!scheduler.stats().accepting);
    }

    #[tokio::test]
    async fn test_second_shutdown_is_noop() {
        let scheduler = create_test_scheduler();
        let (tx, _) = broadcast::channel(1);
        let shutdown = GracefulShutdown::new(scheduler, tx);

        assert!(shutdown.execute("first").await.success);
        let second = shutdown.execute("second").await;
        assert!(!second.success);
        assert_eq!(second.tasks_signaled, 0);
    }
}
