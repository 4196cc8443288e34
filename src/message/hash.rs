//! Message fingerprints used for duplicate detection.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::types::{Direction, MessageType, Priority};

/// Identity fields of a message, in fingerprint order.
///
/// Recipients must already be normalized; the creation instant is truncated
/// to milliseconds so a value that went through storage hashes the same.
#[derive(Debug, Clone, Serialize)]
pub struct HashFields<'a> {
    pub message_type: MessageType,
    pub direction: Direction,
    pub bulk: Option<&'a str>,
    pub sender: &'a str,
    pub to: &'a [String],
    pub transport: &'a str,
    pub body: Option<&'a str>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

/// Deterministic fingerprint over the ordered identity tuple
pub fn compute_hash(fields: &HashFields<'_>) -> String {
    let tuple = (
        fields.message_type.as_str(),
        fields.direction.as_str(),
        fields.bulk.unwrap_or(""),
        fields.sender,
        fields.to,
        fields.transport,
        fields.body.unwrap_or(""),
        fields.priority.as_str(),
        fields.created_at.timestamp_millis(),
    );
    digest(&tuple)
}

/// Fingerprint for a message received from a device.
///
/// A transport-supplied id is authoritative and returned as is. Otherwise
/// the fingerprint covers the sender, the receiving address, the body and
/// the device timestamp when one was reported.
pub fn inbound_fingerprint(
    external_id: Option<&str>,
    from: &str,
    sent_to: &str,
    body: &str,
    sent_timestamp: Option<&str>,
) -> String {
    if let Some(id) = external_id.map(str::trim).filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    digest(&("Inbound", from, sent_to, body, sent_timestamp.unwrap_or("")))
}

fn digest<T: Serialize>(value: &T) -> String {
    // Tuples of strings and integers always serialize
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}
