//! Message state machine.
//!
//! Every lifecycle change of a [`Message`] goes through one of the methods
//! here. They are pure: no I/O, the caller supplies the clock and persists
//! the result. Transitions that target the state a message is already in are
//! no-ops, so applying the same update twice has the same effect as once.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::MessageError;
use super::hash::{compute_hash, HashFields};
use super::normalize::{
    clean_text, detect_mime, normalize_recipient, normalize_recipients, normalize_tags,
    NormalizeOptions,
};
use super::types::{Direction, Message, MessageDraft, MessageState, SendMode, SendResult};

/// Whether a transition changed the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Unchanged,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }
}

impl Message {
    /// Validate and normalize a draft into a new message.
    ///
    /// `transport` and `mode` come from the transport registry, never from
    /// the draft, so a message's mode is fixed for its whole life.
    pub fn create(
        draft: MessageDraft,
        transport: &str,
        mode: SendMode,
        options: &NormalizeOptions,
        now: DateTime<Utc>,
    ) -> Result<Message, MessageError> {
        let sender = clean_text(draft.sender)
            .map(|s| normalize_recipient(&s, options))
            .ok_or_else(|| MessageError::validation("sender is required"))?;

        let to = normalize_recipients(&draft.to, options);
        if to.is_empty() {
            return Err(MessageError::validation("at least one recipient is required"));
        }

        let subject = clean_text(draft.subject);
        let body = clean_text(draft.body);
        if subject.is_none() && body.is_none() {
            return Err(MessageError::validation("body or subject is required"));
        }

        let created_at = draft.created_at.unwrap_or(now);
        let bulk = clean_text(draft.bulk);
        let hash = match clean_text(draft.hash) {
            Some(hash) => hash,
            None => compute_hash(&HashFields {
                message_type: draft.message_type,
                direction: draft.direction,
                bulk: bulk.as_deref(),
                sender: &sender,
                to: &to,
                transport,
                body: body.as_deref(),
                priority: draft.priority,
                created_at,
            }),
        };

        let state = match draft.direction {
            Direction::Inbound => draft.state.unwrap_or(MessageState::Received),
            Direction::Outbound => MessageState::Unknown,
        };

        Ok(Message {
            id: Uuid::new_v4(),
            hash,
            message_type: draft.message_type,
            direction: draft.direction,
            mime: detect_mime(body.as_deref()),
            transport: transport.to_string(),
            mode,
            bulk,
            sender,
            to,
            cc: normalize_recipients(&draft.cc, options),
            bcc: normalize_recipients(&draft.bcc, options),
            reply_to: clean_text(draft.reply_to).map(|r| normalize_recipient(&r, options)),
            subject,
            body,
            priority: draft.priority,
            state,
            result: None,
            campaign: draft.campaign,
            tags: normalize_tags(&draft.tags),
            metadata: draft.metadata,
            created_at,
            updated_at: now,
            queued_at: None,
            sent_at: None,
            failed_at: None,
            delivered_at: None,
            read_at: None,
        })
    }

    /// Enter (or re-enter) the send cycle.
    ///
    /// Push messages become `Queued`; pull messages go back to `Unknown`
    /// where a device can pick them up. A message that already went out is
    /// left alone unless it failed, in which case a new cycle starts with
    /// `sent_at` cleared.
    pub fn queue(&mut self, now: DateTime<Utc>) -> Result<Transition, MessageError> {
        let target = match self.mode {
            SendMode::Push => MessageState::Queued,
            SendMode::Pull => MessageState::Unknown,
        };
        if self.state == MessageState::Received {
            return Err(self.invalid(target));
        }
        if self.sent_at.is_some() && self.state != MessageState::Failed {
            return Ok(Transition::Unchanged);
        }
        if self.state == MessageState::Delivered {
            return Err(self.invalid(target));
        }

        self.state = target;
        self.queued_at = Some(now);
        self.sent_at = None;
        self.updated_at = now;
        Ok(Transition::Applied)
    }

    /// Record the outcome of a transport send.
    ///
    /// Failures keep any earlier `sent_at`; repeated failures only move
    /// `failed_at`. When the transport defers confirmation to a polling
    /// device, a successful hand-off leaves the message waiting for pickup.
    pub fn apply_send_result(
        &mut self,
        result: SendResult,
        defers_confirmation: bool,
        now: DateTime<Utc>,
    ) -> Result<Transition, MessageError> {
        if self.direction == Direction::Inbound {
            return Err(self.invalid(MessageState::Sent));
        }

        if !result.success {
            self.state = MessageState::Failed;
            self.failed_at = Some(now);
        } else if defers_confirmation {
            self.state = result.state.unwrap_or(MessageState::Unknown);
            if self.state == MessageState::Unknown {
                // Waiting for the device again; this pass has not gone out
                self.sent_at = None;
            }
        } else {
            self.sent_at = Some(now);
            self.state = result.state.unwrap_or(MessageState::Delivered);
            match self.state {
                MessageState::Delivered => self.delivered_at = Some(now),
                MessageState::Failed => self.failed_at = Some(now),
                _ => {}
            }
        }

        self.result = Some(result);
        self.updated_at = now;
        Ok(Transition::Applied)
    }

    /// A polling device accepted this message for local sending
    pub fn acknowledge_queued(&mut self, now: DateTime<Utc>) -> Result<Transition, MessageError> {
        match self.state {
            MessageState::Received => Err(self.invalid(MessageState::Queued)),
            MessageState::Unknown | MessageState::Sent => {
                self.state = MessageState::Queued;
                self.queued_at = Some(now);
                self.sent_at.get_or_insert(now);
                self.updated_at = now;
                Ok(Transition::Applied)
            }
            // Already acknowledged, or past it
            _ => Ok(Transition::Unchanged),
        }
    }

    /// Finalize as delivered. Reports for an already terminal message are
    /// accepted and ignored.
    pub fn mark_delivered(
        &mut self,
        result: Option<SendResult>,
        now: DateTime<Utc>,
    ) -> Result<Transition, MessageError> {
        if self.state == MessageState::Received {
            return Err(self.invalid(MessageState::Delivered));
        }
        if self.state.is_terminal() {
            return Ok(Transition::Unchanged);
        }

        self.state = MessageState::Delivered;
        self.sent_at.get_or_insert(now);
        self.delivered_at = Some(now);
        if let Some(result) = result {
            self.result = Some(result);
        }
        self.updated_at = now;
        Ok(Transition::Applied)
    }

    /// Finalize as failed. Terminal messages are left untouched.
    pub fn mark_failed(
        &mut self,
        result: SendResult,
        now: DateTime<Utc>,
    ) -> Result<Transition, MessageError> {
        if self.state == MessageState::Received {
            return Err(self.invalid(MessageState::Failed));
        }
        if self.state.is_terminal() {
            return Ok(Transition::Unchanged);
        }

        self.state = MessageState::Failed;
        self.failed_at = Some(now);
        self.result = Some(result);
        self.updated_at = now;
        Ok(Transition::Applied)
    }

    /// Resend is only allowed for failed messages or ones never sent
    pub fn can_resend(&self) -> bool {
        self.direction == Direction::Outbound
            && (self.state == MessageState::Failed || self.sent_at.is_none())
    }

    fn invalid(&self, to: MessageState) -> MessageError {
        MessageError::InvalidTransition {
            id: self.id,
            from: self.state,
            to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::types::{MessageType, Mime, Priority};

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn push_message() -> Message {
        let draft = Message::builder(MessageType::Email)
            .sender("Postman@Example.com")
            .to("John@Example.com")
            .to("john@example.com")
            .subject("Hello")
            .body("<p>Hello</p>")
            .build();
        Message::create(draft, "echo", SendMode::Push, &NormalizeOptions::default(), now()).unwrap()
    }

    fn pull_message() -> Message {
        let draft = Message::builder(MessageType::Sms)
            .sender("postman")
            .to("0714000000")
            .body("hello")
            .build();
        Message::create(draft, "smssync", SendMode::Pull, &NormalizeOptions::default(), now())
            .unwrap()
    }

    #[test]
    fn test_create_normalizes_and_hashes() {
        let message = push_message();
        assert_eq!(message.sender, "postman@example.com");
        assert_eq!(message.to, vec!["john@example.com"]);
        assert_eq!(message.mime, Mime::Html);
        assert_eq!(message.state, MessageState::Unknown);
        assert_eq!(message.priority, Priority::Normal);
        assert_eq!(message.hash.len(), 64);
    }

    #[test]
    fn test_create_requires_recipients() {
        let draft = Message::builder(MessageType::Sms)
            .sender("postman")
            .to("  ")
            .body("hi")
            .build();
        let result = Message::create(draft, "echo", SendMode::Push, &NormalizeOptions::default(), now());
        assert!(matches!(result, Err(MessageError::Validation(_))));
    }

    #[test]
    fn test_create_requires_sender_and_content() {
        let no_sender = Message::builder(MessageType::Sms).to("0714000000").body("hi").build();
        assert!(Message::create(no_sender, "echo", SendMode::Push, &NormalizeOptions::default(), now()).is_err());

        let no_content = Message::builder(MessageType::Sms).sender("a").to("0714000000").build();
        assert!(Message::create(no_content, "echo", SendMode::Push, &NormalizeOptions::default(), now()).is_err());
    }

    #[test]
    fn test_supplied_hash_wins() {
        let draft = Message::builder(MessageType::Sms)
            .direction(Direction::Inbound)
            .sender("+255700000001")
            .to("9090")
            .body("hi")
            .hash("device-1")
            .build();
        let message =
            Message::create(draft, "smssync", SendMode::Pull, &NormalizeOptions::default(), now()).unwrap();
        assert_eq!(message.hash, "device-1");
        assert_eq!(message.state, MessageState::Received);
        assert_eq!(message.sender, "255700000001");
    }

    #[test]
    fn test_queue_by_mode() {
        let mut push = push_message();
        push.queue(now()).unwrap();
        assert_eq!(push.state, MessageState::Queued);
        assert!(push.queued_at.is_some());

        let mut pull = pull_message();
        pull.queue(now()).unwrap();
        assert_eq!(pull.state, MessageState::Unknown);
        assert!(pull.queued_at.is_some());
    }

    #[test]
    fn test_queue_rejects_inbound() {
        let draft = Message::builder(MessageType::Sms)
            .direction(Direction::Inbound)
            .sender("+255700000001")
            .to("9090")
            .body("hi")
            .build();
        let mut inbound =
            Message::create(draft, "smssync", SendMode::Pull, &NormalizeOptions::default(), now()).unwrap();
        assert!(matches!(
            inbound.queue(now()),
            Err(MessageError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_queue_leaves_sent_messages_alone() {
        let mut delivered = push_message();
        delivered.apply_send_result(SendResult::ok(), false, now()).unwrap();
        let delivered_at = delivered.delivered_at;
        assert_eq!(delivered.queue(now()).unwrap(), Transition::Unchanged);
        assert_eq!(delivered.state, MessageState::Delivered);
        assert_eq!(delivered.delivered_at, delivered_at);

        let mut acknowledged = pull_message();
        acknowledged.acknowledge_queued(now()).unwrap();
        assert_eq!(acknowledged.queue(now()).unwrap(), Transition::Unchanged);
        assert_eq!(acknowledged.state, MessageState::Queued);
    }

    #[test]
    fn test_queue_after_failure_starts_new_cycle() {
        let mut message = pull_message();
        message.acknowledge_queued(now()).unwrap();
        message.mark_failed(SendResult::failure("No service"), now()).unwrap();

        assert_eq!(message.queue(now()).unwrap(), Transition::Applied);
        assert_eq!(message.state, MessageState::Unknown);
        assert!(message.sent_at.is_none());
    }

    #[test]
    fn test_send_success_delivers_push_message() {
        let mut message = push_message();
        message.queue(now()).unwrap();
        message.apply_send_result(SendResult::ok(), false, now()).unwrap();

        assert_eq!(message.state, MessageState::Delivered);
        assert!(message.sent_at.is_some());
        assert!(message.delivered_at.is_some());
        assert!(message.result.as_ref().unwrap().success);
    }

    #[test]
    fn test_send_success_respects_reported_state() {
        let mut message = push_message();
        let result = SendResult::ok().with_state(MessageState::Failed);
        message.apply_send_result(result, false, now()).unwrap();
        assert_eq!(message.state, MessageState::Failed);
        assert!(message.failed_at.is_some());
    }

    #[test]
    fn test_repeated_failures_keep_sent_at() {
        let mut message = push_message();
        message.apply_send_result(SendResult::ok().with_state(MessageState::Sent), false, now()).unwrap();
        let sent_at = message.sent_at;

        let first = now();
        message.apply_send_result(SendResult::failure("boom"), false, first).unwrap();
        let second = first + chrono::Duration::seconds(5);
        message.apply_send_result(SendResult::failure("boom"), false, second).unwrap();

        assert_eq!(message.state, MessageState::Failed);
        assert_eq!(message.sent_at, sent_at);
        assert_eq!(message.failed_at, Some(second));
    }

    #[test]
    fn test_deferred_send_waits_for_device() {
        let mut message = pull_message();
        message.queue(now()).unwrap();
        message.apply_send_result(SendResult::ok(), true, now()).unwrap();
        assert_eq!(message.state, MessageState::Unknown);
        assert!(message.sent_at.is_none());

        // Handing a failed message back to the device forgets the old pass
        message.acknowledge_queued(now()).unwrap();
        message.mark_failed(SendResult::failure("No service"), now()).unwrap();
        message.apply_send_result(SendResult::ok(), true, now()).unwrap();
        assert_eq!(message.state, MessageState::Unknown);
        assert!(message.sent_at.is_none());
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let mut message = pull_message();
        assert_eq!(message.acknowledge_queued(now()).unwrap(), Transition::Applied);
        let queued_at = message.queued_at;
        assert_eq!(message.acknowledge_queued(now()).unwrap(), Transition::Unchanged);
        assert_eq!(message.queued_at, queued_at);
        assert_eq!(message.state, MessageState::Queued);
        assert!(message.sent_at.is_some());
    }

    #[test]
    fn test_delivered_is_monotonic() {
        let mut message = pull_message();
        message.acknowledge_queued(now()).unwrap();
        let delivered = now();
        message.mark_delivered(None, delivered).unwrap();

        let earlier = delivered - chrono::Duration::seconds(60);
        assert_eq!(message.mark_delivered(None, earlier).unwrap(), Transition::Unchanged);
        assert_eq!(
            message.mark_failed(SendResult::failure("late"), now()).unwrap(),
            Transition::Unchanged
        );
        assert_eq!(message.state, MessageState::Delivered);
        assert_eq!(message.delivered_at, Some(delivered));
    }

    #[test]
    fn test_can_resend() {
        let mut message = push_message();
        assert!(message.can_resend());
        message.apply_send_result(SendResult::ok(), false, now()).unwrap();
        assert!(!message.can_resend());

        let mut failed = push_message();
        failed.apply_send_result(SendResult::failure("x"), false, now()).unwrap();
        assert!(failed.can_resend());
    }
}
