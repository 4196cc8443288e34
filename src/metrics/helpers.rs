//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::message::{Direction, MessageState, MessageType};

use super::{
    CAMPAIGN_MESSAGES_TOTAL, JOBS_COMPLETED_TOTAL, JOBS_ENQUEUED_TOTAL, JOBS_FAILED_TOTAL,
    JOBS_RETRIED_TOTAL, MESSAGES_CREATED_TOTAL, MESSAGES_DUPLICATE_TOTAL,
    MESSAGE_TRANSITIONS_TOTAL, QUEUE_DEPTH, SMSSYNC_REQUESTS_TOTAL,
    SMSSYNC_UNKNOWN_CORRELATION_TOTAL, TRANSPORT_SENDS_TOTAL, TRANSPORT_SEND_LATENCY,
    WORKERS_BUSY,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording message metrics
pub struct MessageMetrics;

impl MessageMetrics {
    /// Record a newly stored message
    pub fn record_created(message_type: MessageType, direction: Direction) {
        MESSAGES_CREATED_TOTAL
            .with_label_values(&[message_type.as_str(), direction.as_str()])
            .inc();
    }

    /// Record a create or ingest that matched an existing hash
    pub fn record_duplicate(direction: Direction) {
        MESSAGES_DUPLICATE_TOTAL
            .with_label_values(&[direction.as_str()])
            .inc();
    }

    /// Record an applied transition into `state`
    pub fn record_transition(state: MessageState) {
        MESSAGE_TRANSITIONS_TOTAL
            .with_label_values(&[state.as_str()])
            .inc();
    }
}

/// Helper struct for recording transport metrics
pub struct TransportMetrics;

impl TransportMetrics {
    pub fn record_send(transport: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        TRANSPORT_SENDS_TOTAL
            .with_label_values(&[transport, outcome])
            .inc();
    }

    pub fn observe_latency(transport: &str, seconds: f64) {
        TRANSPORT_SEND_LATENCY
            .with_label_values(&[transport])
            .observe(seconds);
    }
}

/// Helper struct for recording dispatch queue metrics
pub struct JobMetrics;

impl JobMetrics {
    pub fn record_enqueued() {
        JOBS_ENQUEUED_TOTAL.inc();
    }

    pub fn record_retried() {
        JOBS_RETRIED_TOTAL.inc();
    }

    pub fn record_completed() {
        JOBS_COMPLETED_TOTAL.inc();
    }

    pub fn record_failed() {
        JOBS_FAILED_TOTAL.inc();
    }

    /// Update ready/delayed queue depth gauges
    pub fn set_depth(ready: usize, delayed: usize) {
        QUEUE_DEPTH.with_label_values(&["ready"]).set(ready as i64);
        QUEUE_DEPTH.with_label_values(&["delayed"]).set(delayed as i64);
    }

    pub fn worker_started() {
        WORKERS_BUSY.inc();
    }

    pub fn worker_finished() {
        WORKERS_BUSY.dec();
    }
}

/// Helper struct for recording SMSSync protocol metrics
pub struct SyncMetrics;

impl SyncMetrics {
    pub fn record_request(task: &str, success: bool) {
        let outcome = if success { "ok" } else { "rejected" };
        SMSSYNC_REQUESTS_TOTAL
            .with_label_values(&[task, outcome])
            .inc();
    }

    pub fn record_unknown_correlation(count: u64) {
        SMSSYNC_UNKNOWN_CORRELATION_TOTAL.inc_by(count);
    }
}

/// Helper struct for recording campaign fanout metrics
pub struct CampaignMetrics;

impl CampaignMetrics {
    pub fn record_messages(channel: MessageType, count: u64) {
        CAMPAIGN_MESSAGES_TOTAL
            .with_label_values(&[channel.as_str()])
            .inc_by(count);
    }
}
