//! SMSSync wire format.
//!
//! Field names follow the SMSSync device app. See
//! <http://smssync.ushahidi.com/developers/>.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Answer sent for a secret mismatch, on every task
pub const SECRET_MISMATCH: &str = "Secret Key Mismatch";

/// Inbound message posted by a device
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InboundSms {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Device-side message id; authoritative fingerprint when present
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub sent_to: Option<String>,
    #[serde(default)]
    pub sent_timestamp: Option<Value>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
}

impl InboundSms {
    /// Device-supplied identity, `message_id` first
    pub fn external_id(&self) -> Option<&str> {
        [&self.message_id, &self.hash]
            .into_iter()
            .flatten()
            .map(|id| id.trim())
            .find(|id| !id.is_empty())
    }

    /// Device timestamp as text, whatever JSON type it came in
    pub fn timestamp(&self) -> Option<String> {
        match &self.sent_timestamp {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// One deliverable unit handed to a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingSms {
    pub to: String,
    pub message: String,
    pub uuid: String,
}

/// Delivery report for one unit
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeliveryReport {
    pub uuid: String,
    #[serde(default)]
    pub sent_result_code: Option<i64>,
    #[serde(default)]
    pub sent_result_message: Option<String>,
    #[serde(default)]
    pub delivered_result_code: Option<i64>,
    #[serde(default)]
    pub delivered_result_message: Option<String>,
}

impl DeliveryReport {
    /// Sending failed on the device, or the network reported a delivery
    /// failure. A delivered code of -1 means no report yet and counts as
    /// delivered.
    pub fn is_failure(&self) -> bool {
        self.sent_result_code.is_some_and(|code| code != 0)
            || self.delivered_result_code.is_some_and(|code| code > 0)
    }

    /// Most specific message the device gave
    pub fn describe(&self) -> Option<String> {
        [&self.delivered_result_message, &self.sent_result_message]
            .into_iter()
            .flatten()
            .map(|m| m.trim())
            .find(|m| !m.is_empty())
            .map(str::to_string)
    }
}

/// Split a correlation id `<messageId>:<recipient>`.
///
/// Only the part before the first `:` identifies the message; `None` when it
/// is not a valid id.
pub fn parse_correlation(uuid: &str) -> Option<(Uuid, Option<&str>)> {
    let (id, recipient) = match uuid.split_once(':') {
        Some((id, recipient)) => (id, Some(recipient)),
        None => (uuid, None),
    };
    Uuid::parse_str(id.trim()).ok().map(|id| (id, recipient))
}

/// Build the correlation id for one recipient of a message
pub fn correlation(message_id: Uuid, recipient: &str) -> String {
    format!("{}:{}", message_id, recipient)
}

/// Body of the `payload` envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<OutgoingSms>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Every response the sync endpoint can give
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncResponse {
    Payload { payload: Payload },
    QueuedMessages { queued_messages: Vec<String> },
    MessageUuids { message_uuids: Vec<String> },
}

impl SyncResponse {
    /// Work for the device to send
    pub fn send_task(secret: &str, messages: Vec<OutgoingSms>) -> Self {
        SyncResponse::Payload {
            payload: Payload {
                success: true,
                task: Some("send".to_string()),
                secret: Some(secret.to_string()),
                messages: Some(messages),
                error: None,
            },
        }
    }

    pub fn success() -> Self {
        SyncResponse::Payload {
            payload: Payload {
                success: true,
                ..Default::default()
            },
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        SyncResponse::Payload {
            payload: Payload {
                success: false,
                error: Some(error.into()),
                ..Default::default()
            },
        }
    }

    pub fn secret_mismatch() -> Self {
        Self::failure(SECRET_MISMATCH)
    }

    pub fn queued(uuids: Vec<String>) -> Self {
        SyncResponse::QueuedMessages {
            queued_messages: uuids,
        }
    }

    pub fn awaiting(uuids: Vec<String>) -> Self {
        SyncResponse::MessageUuids {
            message_uuids: uuids,
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            SyncResponse::Payload { payload } => payload.success,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_correlation() {
        let id = Uuid::new_v4();
        let uuid = correlation(id, "255714000000");
        let (parsed, recipient) = parse_correlation(&uuid).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(recipient, Some("255714000000"));

        let bare_uuid = id.to_string();
        let (bare, none) = parse_correlation(&bare_uuid).unwrap();
        assert_eq!(bare, id);
        assert!(none.is_none());

        assert!(parse_correlation("not-a-uuid:255714000000").is_none());
        assert!(parse_correlation("").is_none());
    }

    #[test]
    fn test_recipient_may_contain_colons() {
        let id = Uuid::new_v4();
        let uuid = format!("{}:a:b", id);
        let (parsed, recipient) = parse_correlation(&uuid).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(recipient, Some("a:b"));
    }

    #[test]
    fn test_report_failure_codes() {
        let delivered = DeliveryReport {
            uuid: "x".into(),
            sent_result_code: Some(0),
            delivered_result_code: Some(-1),
            ..Default::default()
        };
        assert!(!delivered.is_failure());

        let send_failed = DeliveryReport {
            uuid: "x".into(),
            sent_result_code: Some(1),
            ..Default::default()
        };
        assert!(send_failed.is_failure());

        let not_delivered = DeliveryReport {
            uuid: "x".into(),
            sent_result_code: Some(0),
            delivered_result_code: Some(2),
            delivered_result_message: Some("Generic failure".into()),
            ..Default::default()
        };
        assert!(not_delivered.is_failure());
        assert_eq!(not_delivered.describe().as_deref(), Some("Generic failure"));
    }

    #[test]
    fn test_response_shapes() {
        assert_eq!(
            serde_json::to_value(SyncResponse::secret_mismatch()).unwrap(),
            json!({"payload": {"success": false, "error": "Secret Key Mismatch"}})
        );
        assert_eq!(
            serde_json::to_value(SyncResponse::queued(vec!["a:1".into()])).unwrap(),
            json!({"queued_messages": ["a:1"]})
        );
        assert_eq!(
            serde_json::to_value(SyncResponse::awaiting(vec![])).unwrap(),
            json!({"message_uuids": []})
        );
        assert_eq!(
            serde_json::to_value(SyncResponse::send_task("smssync", vec![])).unwrap(),
            json!({"payload": {"success": true, "task": "send", "secret": "smssync", "messages": []}})
        );
    }

    #[test]
    fn test_inbound_identity() {
        let sms: InboundSms = serde_json::from_value(json!({
            "from": "+255700000001",
            "message": "hi",
            "message_id": "  ",
            "hash": "abc",
            "sent_timestamp": 1_700_000_000_000i64
        }))
        .unwrap();
        assert_eq!(sms.external_id(), Some("abc"));
        assert_eq!(sms.timestamp().as_deref(), Some("1700000000000"));
    }
}
