//! Prometheus metrics for the dispatch service.
//!
//! - Message metrics (created, duplicates, state transitions)
//! - Transport metrics (sends by outcome, send latency)
//! - Scheduler metrics (jobs, queue depth, busy workers)
//! - SMSSync metrics (requests by task, unknown correlation ids)
//! - Campaign metrics (messages per channel)

mod helpers;

pub use helpers::{
    encode_metrics, CampaignMetrics, JobMetrics, MessageMetrics, SyncMetrics, TransportMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "postman";

lazy_static! {
    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Messages stored, by type and direction
    pub static ref MESSAGES_CREATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_created_total", METRIC_PREFIX),
        "Total messages created",
        &["type", "direction"]
    ).unwrap();

    /// Creates and ingests that matched an existing hash
    pub static ref MESSAGES_DUPLICATE_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_duplicate_total", METRIC_PREFIX),
        "Total messages recognized as duplicates of a stored message",
        &["direction"]
    ).unwrap();

    /// Applied state transitions, by target state
    pub static ref MESSAGE_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_message_transitions_total", METRIC_PREFIX),
        "Total message state transitions",
        &["state"]
    ).unwrap();

    // ============================================================================
    // Transport Metrics
    // ============================================================================

    /// Transport sends by outcome
    pub static ref TRANSPORT_SENDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_transport_sends_total", METRIC_PREFIX),
        "Total transport send calls",
        &["transport", "outcome"]
    ).unwrap();

    /// Transport send latency
    pub static ref TRANSPORT_SEND_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_transport_send_latency_seconds", METRIC_PREFIX),
        "Transport send latency in seconds",
        &["transport"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();

    // ============================================================================
    // Scheduler Metrics
    // ============================================================================

    /// Jobs accepted by the dispatch queue
    pub static ref JOBS_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_jobs_enqueued_total", METRIC_PREFIX),
        "Total dispatch jobs enqueued"
    ).unwrap();

    /// Failed attempts that were scheduled again
    pub static ref JOBS_RETRIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_jobs_retried_total", METRIC_PREFIX),
        "Total dispatch job retries"
    ).unwrap();

    /// Jobs that finished successfully
    pub static ref JOBS_COMPLETED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_jobs_completed_total", METRIC_PREFIX),
        "Total dispatch jobs completed"
    ).unwrap();

    /// Jobs that exhausted their attempts
    pub static ref JOBS_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_jobs_failed_total", METRIC_PREFIX),
        "Total dispatch jobs failed after all attempts"
    ).unwrap();

    /// Jobs waiting, split into ready and delayed (backoff)
    pub static ref QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_queue_depth", METRIC_PREFIX),
        "Dispatch jobs waiting to run",
        &["kind"]
    ).unwrap();

    /// Workers currently processing a job
    pub static ref WORKERS_BUSY: IntGauge = register_int_gauge!(
        format!("{}_workers_busy", METRIC_PREFIX),
        "Dispatch workers currently processing a job"
    ).unwrap();

    // ============================================================================
    // SMSSync Metrics
    // ============================================================================

    /// Device requests by task and outcome
    pub static ref SMSSYNC_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_smssync_requests_total", METRIC_PREFIX),
        "Total SMSSync device requests",
        &["task", "outcome"]
    ).unwrap();

    /// Correlation ids that referenced no stored message
    pub static ref SMSSYNC_UNKNOWN_CORRELATION_TOTAL: IntCounter = register_int_counter!(
        format!("{}_smssync_unknown_correlation_total", METRIC_PREFIX),
        "Total correlation ids reported by a device that matched no message"
    ).unwrap();

    // ============================================================================
    // Campaign Metrics
    // ============================================================================

    /// Messages produced by campaign fanout, by channel
    pub static ref CAMPAIGN_MESSAGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_campaign_messages_total", METRIC_PREFIX),
        "Total messages produced by campaign fanout",
        &["channel"]
    ).unwrap();
}
