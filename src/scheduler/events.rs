use serde::Serialize;
use uuid::Uuid;

/// Observable scheduler activity.
///
/// Delivered over a broadcast channel for telemetry and tests. Nothing in
/// the dispatch path waits on a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// Message persisted in its queued state; `job_id` is unset for pull
    /// messages, which wait for a device instead of a worker
    Queued {
        message_id: Uuid,
        job_id: Option<u64>,
    },
    /// The message could not be queued
    QueueError {
        message_id: Option<Uuid>,
        error: String,
    },
    /// A bulk requeue finished
    Requeued { count: usize },
    Retrying {
        message_id: Uuid,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    Completed {
        message_id: Uuid,
        attempts: u32,
    },
    /// Attempts exhausted, or the job can never succeed
    Failed {
        message_id: Uuid,
        attempts: u32,
        error: String,
    },
}

impl SchedulerEvent {
    pub fn message_id(&self) -> Option<Uuid> {
        match self {
            SchedulerEvent::Queued { message_id, .. }
            | SchedulerEvent::Retrying { message_id, .. }
            | SchedulerEvent::Completed { message_id, .. }
            | SchedulerEvent::Failed { message_id, .. } => Some(*message_id),
            SchedulerEvent::QueueError { message_id, .. } => *message_id,
            SchedulerEvent::Requeued { .. } => None,
        }
    }
}
