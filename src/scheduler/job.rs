use std::cmp::Ordering;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use crate::message::Priority;

use super::backoff::{Backoff, RetryDelay};

/// Per-job dispatch policy
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Scheduling hint; higher priority jobs run first when several are ready
    pub priority: Priority,
    /// Total attempts, including the first
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl JobOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// A request to send one message
#[derive(Debug, Clone)]
pub struct Job {
    /// Queue-assigned sequence number
    pub id: u64,
    pub message_id: Uuid,
    pub priority: Priority,
    pub max_attempts: u32,
    /// Attempts started so far
    pub attempts_made: u32,
    pub(crate) delay: RetryDelay,
}

impl Job {
    pub(crate) fn new(id: u64, message_id: Uuid, options: &JobOptions) -> Self {
        Self {
            id,
            message_id,
            priority: options.priority,
            max_attempts: options.attempts.max(1),
            attempts_made: 0,
            delay: options.backoff.start(),
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts_made < self.max_attempts
    }
}

/// How a job attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The attempt failed and may be retried
    Retry(String),
    /// The job can never succeed; do not retry
    Failed(String),
}

/// Processes dispatch jobs pulled off the queue
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> JobOutcome;
}

/// Ready-heap entry: highest priority first, then oldest
pub(crate) struct Ready(pub Job);

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ready {}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.id.cmp(&self.0.id))
    }
}

/// Delayed-heap entry: earliest due first
pub(crate) struct Delayed {
    pub due: Instant,
    pub job: Job,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.job.id.cmp(&self.job.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;
    use std::time::Duration;

    fn job(id: u64, priority: Priority) -> Job {
        Job::new(id, Uuid::new_v4(), &JobOptions::default().with_priority(priority))
    }

    #[test]
    fn test_ready_heap_prefers_priority_then_age() {
        let mut heap = BinaryHeap::new();
        heap.push(Ready(job(1, Priority::Normal)));
        heap.push(Ready(job(2, Priority::Critical)));
        heap.push(Ready(job(3, Priority::Normal)));
        heap.push(Ready(job(4, Priority::Low)));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|r| r.0.id)).collect();
        assert_eq!(order, vec![2, 1, 3, 4]);
    }

    #[test]
    fn test_delayed_heap_is_earliest_first() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        heap.push(Delayed { due: now + Duration::from_secs(5), job: job(1, Priority::High) });
        heap.push(Delayed { due: now + Duration::from_secs(1), job: job(2, Priority::Low) });

        assert_eq!(heap.pop().unwrap().job.id, 2);
    }

    #[test]
    fn test_attempts_floor() {
        let options = JobOptions::default().with_attempts(0);
        assert_eq!(options.attempts, 1);
        let job = Job::new(1, Uuid::new_v4(), &options);
        assert!(job.has_attempts_left());
    }
}
