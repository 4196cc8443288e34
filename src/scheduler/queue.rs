//! In-process job queue with a fixed worker pool.
//!
//! One named queue, N workers. Jobs are keyed by message id: while a job for
//! a message is waiting or running, a second one for the same message is
//! not accepted, so no message is ever in two workers at once. Failed
//! attempts go to a delayed heap until their backoff expires.

use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use uuid::Uuid;

use crate::metrics::JobMetrics;

use super::events::SchedulerEvent;
use super::job::{Delayed, Job, JobHandler, JobOptions, JobOutcome, Ready};

/// Errors that can occur when submitting to the queue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue {0} is shutting down and no longer accepts jobs")]
    Closed(String),
}

/// Counters and depths of a queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub name: String,
    pub concurrency: usize,
    pub accepting: bool,
    /// Jobs ready to run
    pub pending: usize,
    /// Jobs waiting out a backoff delay
    pub delayed: usize,
    pub in_flight: usize,
    pub total_enqueued: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_retried: u64,
}

/// Outcome of a drain
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
    /// All in-flight jobs finished before the timeout
    pub drained: bool,
    /// Jobs that never ran and were dropped (ready or delayed)
    pub abandoned: usize,
    /// Workers aborted after the timeout
    pub aborted_workers: usize,
}

#[derive(Default)]
struct QueueState {
    ready: BinaryHeap<Ready>,
    delayed: BinaryHeap<Delayed>,
    /// Message ids with a waiting or running job
    keys: HashSet<Uuid>,
    next_id: u64,
}

/// Priority job queue processed by a pool of tokio workers
pub struct JobQueue {
    name: String,
    concurrency: usize,
    state: Mutex<QueueState>,
    notify: Notify,
    accepting: AtomicBool,
    shutting_down: AtomicBool,
    stop_tx: watch::Sender<bool>,
    events: broadcast::Sender<SchedulerEvent>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    in_flight: AtomicUsize,
    total_enqueued: AtomicU64,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
    total_retried: AtomicU64,
}

impl JobQueue {
    pub fn new(
        name: impl Into<String>,
        concurrency: usize,
        events: broadcast::Sender<SchedulerEvent>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            concurrency: concurrency.max(1),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            accepting: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
            stop_tx,
            events,
            workers: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            total_enqueued: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_retried: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Whether a job for this message is waiting or running
    pub fn contains(&self, message_id: Uuid) -> bool {
        self.lock_state().keys.contains(&message_id)
    }

    /// Submit a job for a message.
    ///
    /// Returns the job id, or `None` when a job for the message is already
    /// waiting or running.
    pub fn push(&self, message_id: Uuid, options: &JobOptions) -> Result<Option<u64>, QueueError> {
        if !self.is_accepting() {
            return Err(QueueError::Closed(self.name.clone()));
        }

        let job_id = {
            let mut state = self.lock_state();
            if !state.keys.insert(message_id) {
                return Ok(None);
            }
            state.next_id += 1;
            let job = Job::new(state.next_id, message_id, options);
            let id = job.id;
            state.ready.push(Ready(job));
            JobMetrics::set_depth(state.ready.len(), state.delayed.len());
            id
        };

        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        JobMetrics::record_enqueued();
        self.notify.notify_one();

        tracing::debug!(queue = %self.name, job_id, message_id = %message_id, "Job enqueued");
        Ok(Some(job_id))
    }

    /// Spawn the worker pool. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>, handler: Arc<dyn JobHandler>) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        if !workers.is_empty() || self.shutting_down.load(Ordering::SeqCst) {
            tracing::warn!(queue = %self.name, "Queue already started or stopped");
            return;
        }

        for worker_id in 0..self.concurrency {
            let queue = Arc::clone(self);
            let handler = Arc::clone(&handler);
            let stop_rx = self.stop_tx.subscribe();
            workers.push(tokio::spawn(async move {
                queue.worker_loop(worker_id, handler, stop_rx).await;
            }));
        }

        tracing::info!(queue = %self.name, concurrency = self.concurrency, "Dispatch workers started");
    }

    /// Stop accepting jobs, let in-flight jobs finish within `drain_timeout`,
    /// then release the workers.
    ///
    /// Waiting and delayed jobs are dropped; their messages stay queued in
    /// the store and are picked up again by a later requeue. Returns `None`
    /// when a shutdown is already under way.
    pub async fn shutdown(&self, drain_timeout: Duration) -> Option<DrainReport> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::debug!(queue = %self.name, "Shutdown already in progress");
            return None;
        }

        self.accepting.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);

        let mut handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            workers.drain(..).collect()
        };

        tracing::info!(
            queue = %self.name,
            in_flight = self.in_flight.load(Ordering::SeqCst),
            timeout_ms = drain_timeout.as_millis() as u64,
            "Draining dispatch queue"
        );

        let joined = timeout(drain_timeout, async {
            for handle in handles.iter_mut() {
                let _ = handle.await;
            }
        })
        .await;

        let mut report = DrainReport {
            drained: joined.is_ok(),
            ..Default::default()
        };

        if joined.is_err() {
            for handle in &handles {
                if !handle.is_finished() {
                    handle.abort();
                    report.aborted_workers += 1;
                }
            }
            tracing::warn!(
                queue = %self.name,
                aborted = report.aborted_workers,
                "Drain timeout, aborting busy workers"
            );
        }

        {
            let mut state = self.lock_state();
            report.abandoned = state.ready.len() + state.delayed.len();
            state.ready.clear();
            state.delayed.clear();
            state.keys.clear();
            JobMetrics::set_depth(0, 0);
        }

        tracing::info!(
            queue = %self.name,
            drained = report.drained,
            abandoned = report.abandoned,
            "Dispatch queue stopped"
        );

        Some(report)
    }

    pub fn stats(&self) -> QueueStats {
        let (pending, delayed) = {
            let state = self.lock_state();
            (state.ready.len(), state.delayed.len())
        };

        QueueStats {
            name: self.name.clone(),
            concurrency: self.concurrency,
            accepting: self.is_accepting(),
            pending,
            delayed,
            in_flight: self.in_flight.load(Ordering::SeqCst),
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_completed: self.total_completed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_retried: self.total_retried.load(Ordering::Relaxed),
        }
    }

    async fn worker_loop(
        &self,
        worker_id: usize,
        handler: Arc<dyn JobHandler>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        tracing::debug!(queue = %self.name, worker_id, "Worker started");

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let (job, next_due) = self.take_ready();
            if let Some(job) = job {
                self.process(job, handler.as_ref()).await;
                continue;
            }

            match next_due {
                Some(due) => {
                    tokio::select! {
                        _ = stop_rx.changed() => {}
                        _ = self.notify.notified() => {}
                        _ = sleep_until(due) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = stop_rx.changed() => {}
                        _ = self.notify.notified() => {}
                    }
                }
            }
        }

        tracing::debug!(queue = %self.name, worker_id, "Worker stopped");
    }

    /// Promote due delayed jobs and pop the best ready one. Also returns the
    /// next delayed due time for the idle wait.
    fn take_ready(&self) -> (Option<Job>, Option<Instant>) {
        let mut state = self.lock_state();
        let now = Instant::now();

        while state.delayed.peek().is_some_and(|d| d.due <= now) {
            if let Some(delayed) = state.delayed.pop() {
                state.ready.push(Ready(delayed.job));
            }
        }

        let job = state.ready.pop().map(|ready| ready.0);
        if job.is_some() {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
        }
        JobMetrics::set_depth(state.ready.len(), state.delayed.len());
        let next_due = state.delayed.peek().map(|d| d.due);
        (job, next_due)
    }

    async fn process(&self, mut job: Job, handler: &dyn JobHandler) {
        job.attempts_made += 1;
        JobMetrics::worker_started();
        let outcome = handler.handle(&job).await;
        JobMetrics::worker_finished();

        match outcome {
            JobOutcome::Completed => {
                self.finish(job.message_id);
                self.total_completed.fetch_add(1, Ordering::Relaxed);
                JobMetrics::record_completed();
                self.emit(SchedulerEvent::Completed {
                    message_id: job.message_id,
                    attempts: job.attempts_made,
                });
            }
            JobOutcome::Retry(error) if job.has_attempts_left() && self.is_accepting() => {
                let delay = job.delay.next_delay();
                tracing::info!(
                    queue = %self.name,
                    message_id = %job.message_id,
                    attempt = job.attempts_made,
                    max_attempts = job.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Send attempt failed, retrying"
                );
                self.total_retried.fetch_add(1, Ordering::Relaxed);
                JobMetrics::record_retried();
                self.emit(SchedulerEvent::Retrying {
                    message_id: job.message_id,
                    attempt: job.attempts_made,
                    delay_ms: delay.as_millis() as u64,
                    error,
                });

                {
                    let mut state = self.lock_state();
                    state.delayed.push(Delayed {
                        due: Instant::now() + delay,
                        job,
                    });
                    JobMetrics::set_depth(state.ready.len(), state.delayed.len());
                }
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.notify.notify_one();
            }
            JobOutcome::Retry(error) | JobOutcome::Failed(error) => {
                tracing::warn!(
                    queue = %self.name,
                    message_id = %job.message_id,
                    attempts = job.attempts_made,
                    error = %error,
                    "Job failed"
                );
                self.finish(job.message_id);
                self.total_failed.fetch_add(1, Ordering::Relaxed);
                JobMetrics::record_failed();
                self.emit(SchedulerEvent::Failed {
                    message_id: job.message_id,
                    attempts: job.attempts_made,
                    error,
                });
            }
        }
    }

    fn finish(&self, message_id: Uuid) {
        self.lock_state().keys.remove(&message_id);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
