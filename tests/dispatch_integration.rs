//! Dispatch path integration tests
//!
//! Message creation, hashing, the scheduler's retry policy and campaign
//! fanout, wired together the way the server wires them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};

use postman::campaign::{Campaign, CampaignFanout, Contact};
use postman::config::SchedulerConfig;
use postman::message::{
    Message, MessageError, MessageService, MessageState, MessageType, NormalizeOptions, SendMode,
    SendResult,
};
use postman::scheduler::{Backoff, JobOptions, Scheduler, SchedulerEvent};
use postman::store::{MemoryMessageStore, MessageFilter, MessageStore};
use postman::transport::{
    EchoTransport, SmsSyncTransport, Transport, TransportError, TransportRegistry,
};

/// Push transport that always fails and counts its calls
struct FailingTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for FailingTransport {
    fn name(&self) -> &str {
        "failing"
    }

    fn mode(&self) -> SendMode {
        SendMode::Push
    }

    fn channels(&self) -> &[MessageType] {
        &MessageType::ALL
    }

    async fn send(&self, _message: &Message) -> Result<SendResult, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::new("provider unreachable").with_code("ECONNREFUSED"))
    }
}

struct TestEnvironment {
    store: Arc<MemoryMessageStore>,
    service: Arc<MessageService>,
    scheduler: Arc<Scheduler>,
    failing: Arc<FailingTransport>,
}

fn create_test_environment() -> TestEnvironment {
    let store = Arc::new(MemoryMessageStore::new());
    let failing = Arc::new(FailingTransport {
        calls: AtomicUsize::new(0),
    });
    let registry = TransportRegistry::new()
        .with(Arc::new(EchoTransport::new()))
        .with(Arc::new(SmsSyncTransport::new()))
        .with(failing.clone());

    let service = Arc::new(
        MessageService::new(store.clone(), Arc::new(registry), NormalizeOptions::default())
            .with_default_transport(MessageType::Email, "echo")
            .with_default_transport(MessageType::Push, "echo")
            .with_default_transport(MessageType::Sms, "smssync"),
    );
    let config = SchedulerConfig {
        concurrency: 4,
        backoff_initial_ms: 5,
        backoff_max_ms: 20,
        ..SchedulerConfig::default()
    };
    let scheduler = Arc::new(Scheduler::new(service.clone(), config));

    TestEnvironment {
        store,
        service,
        scheduler,
        failing,
    }
}

#[tokio::test]
async fn test_equivalent_recipients_hash_identically() {
    let env = create_test_environment();
    let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

    let draft = |to: &str| {
        Message::builder(MessageType::Sms)
            .sender("postman")
            .to(to)
            .body("Your code is 1234")
            .created_at(created_at)
            .build()
    };

    let first = assert_ok!(env.service.create(draft("+255714000000")).await);
    let second = assert_ok!(env.service.create(draft("0714000000")).await);
    let third = assert_ok!(env.service.create(draft(" 0714 000 000 ")).await);

    assert_eq!(first.hash, second.hash);
    assert_eq!(first.id, second.id);
    assert_eq!(first.id, third.id);
    assert_eq!(first.to, vec!["255714000000".to_string()]);
    assert_eq!(env.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_same_hash_different_payload_conflicts() {
    let env = create_test_environment();

    let original = Message::builder(MessageType::Email)
        .sender("postman@example.com")
        .to("a@example.com")
        .body("one")
        .hash("fixed-hash")
        .build();
    let diverging = Message::builder(MessageType::Email)
        .sender("postman@example.com")
        .to("a@example.com")
        .body("two")
        .hash("fixed-hash")
        .build();

    assert_ok!(env.service.create(original).await);
    let err = assert_err!(env.service.create(diverging).await);
    assert!(matches!(err, MessageError::DuplicateConflict { .. }));
}

#[tokio::test]
async fn test_unknown_transport_is_rejected_at_create() {
    let env = create_test_environment();
    let draft = Message::builder(MessageType::Email)
        .transport("carrier-pigeon")
        .sender("postman@example.com")
        .to("a@example.com")
        .body("hello")
        .build();

    let err = assert_err!(env.service.create(draft).await);
    assert!(matches!(err, MessageError::Validation(_)));
}

#[tokio::test]
async fn test_failing_transport_retries_then_fails() {
    let env = create_test_environment();
    let mut events = env.scheduler.subscribe();
    env.scheduler.start();

    let draft = Message::builder(MessageType::Email)
        .transport("failing")
        .sender("postman@example.com")
        .to("a@example.com")
        .body("hello")
        .build();
    let options = JobOptions::default()
        .with_attempts(3)
        .with_backoff(Backoff::Fixed(Duration::from_millis(5)));
    let message = assert_ok!(env.scheduler.submit(draft, Some(options)).await);

    let mut retries = 0;
    let attempts = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("scheduler event")
            .expect("event channel open");
        match event {
            SchedulerEvent::Retrying { message_id, .. } if message_id == message.id => retries += 1,
            SchedulerEvent::Failed {
                message_id,
                attempts,
                ..
            } if message_id == message.id => break attempts,
            SchedulerEvent::Completed { .. } => panic!("failing transport completed a job"),
            _ => {}
        }
    };

    assert_eq!(attempts, 3);
    assert_eq!(retries, 2);
    assert_eq!(env.failing.calls.load(Ordering::SeqCst), 3);

    let stored = env.service.load(message.id).await.unwrap();
    assert_eq!(stored.state, MessageState::Failed);
    assert!(stored.failed_at.is_some());
    assert!(stored.sent_at.is_none());
    let result = stored.result.unwrap();
    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some("ECONNREFUSED"));

    env.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_push_message_delivered_by_worker() {
    let env = create_test_environment();
    let mut events = env.scheduler.subscribe();
    env.scheduler.start();

    let draft = Message::builder(MessageType::Push)
        .sender("postman")
        .to("device-token-1")
        .subject("Update")
        .body("A new version is available")
        .build();
    let message = assert_ok!(env.scheduler.submit(draft, None).await);
    assert_eq!(message.state, MessageState::Queued);

    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("scheduler event")
            .expect("event channel open");
        if matches!(event, SchedulerEvent::Completed { message_id, .. } if message_id == message.id)
        {
            break;
        }
    }

    let stored = env.service.load(message.id).await.unwrap();
    assert_eq!(stored.state, MessageState::Delivered);
    assert!(stored.sent_at.is_some());
    assert!(stored.delivered_at.is_some());

    // A delivered message is not resent
    let err = assert_err!(env.service.resend(message.id).await);
    assert!(matches!(err, MessageError::InvalidTransition { .. }));

    let report = env.scheduler.shutdown().await.expect("first shutdown");
    assert!(report.drained);
}

#[tokio::test]
async fn test_store_outage_propagates_to_caller() {
    let env = create_test_environment();
    env.store.set_available(false);

    let draft = Message::builder(MessageType::Email)
        .sender("postman@example.com")
        .to("a@example.com")
        .body("hello")
        .build();
    let err = assert_err!(env.scheduler.submit(draft, None).await);
    assert!(err.to_string().contains("unavailable"));
}

#[tokio::test]
async fn test_campaign_fanout_completeness() {
    let env = create_test_environment();
    let fanout = CampaignFanout::new(env.scheduler.clone());

    let mut campaign = Campaign::new("Clinic opens at 9")
        .with_channels([MessageType::Email, MessageType::Push])
        .with_sender(Contact {
            name: Some("postman".into()),
            email: Some("alerts@example.com".into()),
            ..Default::default()
        })
        .with_subject("Clinic hours");
    for n in 0..5 {
        campaign = campaign.with_recipient(Contact {
            name: Some(format!("Resident {}", n)),
            email: Some(format!("resident{}@example.com", n)),
            mobile: None,
            push_token: (n < 4).then(|| format!("token-{}", n)),
        });
    }

    let report = assert_ok!(fanout.send(&mut campaign).await);
    assert_eq!(report.recipients, 5);

    let stored = env
        .service
        .find(&MessageFilter::new().campaign(campaign.id))
        .await
        .unwrap();
    let emails = stored
        .iter()
        .filter(|m| m.message_type == MessageType::Email)
        .count();
    let pushes = stored
        .iter()
        .filter(|m| m.message_type == MessageType::Push)
        .count();
    assert_eq!(emails, 5);
    assert_eq!(pushes, 4);

    assert_eq!(campaign.statistics.email.queued, 5);
    assert_eq!(campaign.statistics.push.queued, 4);
    assert_eq!(campaign.statistics.sms.total(), 0);
}
