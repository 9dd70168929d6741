use std::sync::{Arc, Mutex};

use relay_core::time::Clock;
use relay_domain::envelope::Envelope;
use relay_domain::id::EventId;
use relay_domain::status::EventStatus;
use relay_service::domain::repository::{BrokerProducer, EventStore, Transport};
use relay_service::domain::types::{
    ClaimPolicy, DIRECT_PARTITION, HEADER_ID, OutgoingMessage, PublishedEvent,
};
use relay_service::error::RelayError;
use relay_service::infra::lock::LocalLock;
use relay_service::usecase::batcher::BrokerTransport;
use relay_service::usecase::direct::StorageTransport;
use relay_service::usecase::outbox::PublishOutboxJob;
use relay_service::usecase::publish::Publisher;
use relay_service::usecase::scheduler::Job;
use tokio_util::sync::CancellationToken;

use crate::helpers::{
    ManualClock, MemoryEventStore, MemoryProducer, PaymentCaptured, SentLog, lock_settings,
    published,
};

fn outbox_job<T: Transport>(
    store: &MemoryEventStore,
    clock: &ManualClock,
    transport: T,
) -> PublishOutboxJob<MemoryEventStore, LocalLock, T, ManualClock> {
    PublishOutboxJob {
        store: store.clone(),
        locks: LocalLock::new(),
        transport,
        clock: clock.clone(),
        lock_name: "billing-events-publisher".to_owned(),
        lock_settings: lock_settings(),
        policy: ClaimPolicy::default(),
    }
}

fn capture(amount: u64) -> PaymentCaptured {
    PaymentCaptured {
        payment_id: format!("pay-{amount}"),
        amount,
    }
}

// ── Publisher ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_store_publish_request_as_pending_row() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let publisher = Publisher {
        clock: clock.clone(),
    };

    let id = publisher
        .publish(&store, &capture(10), "order-1", [("trace".to_owned(), "t-1".into())])
        .await
        .unwrap();

    let row = store.published_by_id(id).unwrap();
    assert_eq!(row.topic, "payments");
    assert_eq!(row.event_key, "order-1");
    assert_eq!(row.status, EventStatus::None);
    assert_eq!(row.retry_count, 0);
    assert_eq!(row.sent_at, clock.now());
    let envelope = Envelope::parse(&row.content).unwrap();
    assert_eq!(envelope.event_name, "payment.captured");
    assert_eq!(envelope.body["amount"], 10);
    assert_eq!(envelope.headers["trace"], "t-1");
}

#[tokio::test]
async fn should_reject_empty_event_key() {
    let store = MemoryEventStore::new();
    let publisher = Publisher {
        clock: ManualClock::new(),
    };

    let result = publisher.publish(&store, &capture(10), "", []).await;

    assert!(
        matches!(result, Err(RelayError::InvalidEvent(_))),
        "expected InvalidEvent, got {result:?}"
    );
    assert!(store.published.lock().unwrap().is_empty());
}

#[tokio::test]
async fn should_hold_delayed_event_until_due() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let publisher = Publisher {
        clock: clock.clone(),
    };
    let row = publisher
        .prepare_delayed(&capture(10), chrono::Duration::seconds(30), [])
        .unwrap();
    store.insert_published(std::slice::from_ref(&row)).await.unwrap();
    let policy = ClaimPolicy::default();

    clock.advance(chrono::Duration::seconds(29));
    assert!(store.claim_for_publishing(&policy, clock.now()).await.unwrap().is_empty());

    clock.advance(chrono::Duration::seconds(2));
    let claimed = store.claim_for_publishing(&policy, clock.now()).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, row.id);
    assert!(row.event_key.parse::<EventId>().is_ok());
    assert_ne!(row.event_key, row.id.to_string());
}

// ── Outbox job ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_mark_delivered_events_succeeded() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let events = vec![published(&clock, "order-1"), published(&clock, "order-2")];
    store.insert_published(&events).await.unwrap();
    let sent = SentLog::default();
    let job = outbox_job(&store, &clock, BrokerTransport {
        producers: MemoryProducer::pool(1, &sent),
    });

    let delivered = job.run_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(delivered, 2);
    assert_eq!(sent.lock().unwrap().len(), 2);
    for event in &events {
        let row = store.published_by_id(event.id).unwrap();
        assert_eq!(row.status, EventStatus::Succeeded);
        assert_eq!(row.retry_count, 1);
    }
    assert_eq!(job.run_once(&CancellationToken::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn should_return_undelivered_events_for_retry() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let ok = published(&clock, "order-1");
    let rejected = published(&clock, "order-2");
    store.insert_published(&[ok.clone(), rejected.clone()]).await.unwrap();
    let sent = SentLog::default();
    let mut producers = MemoryProducer::pool(1, &sent);
    producers[0].fail_key = Some("order-2".to_owned());
    let job = outbox_job(&store, &clock, BrokerTransport { producers });

    let delivered = job.run_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(delivered, 1);
    assert_eq!(store.published_by_id(ok.id).unwrap().status, EventStatus::Succeeded);
    let row = store.published_by_id(rejected.id).unwrap();
    assert_eq!(row.status, EventStatus::None);
    assert_eq!(row.retry_count, 1);

    clock.advance(chrono::Duration::seconds(1));
    job.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(store.published_by_id(rejected.id).unwrap().retry_count, 2);
}

// ── BrokerTransport ──────────────────────────────────────────────────────────

#[tokio::test]
async fn should_pin_each_key_to_one_producer_in_order() {
    let clock = ManualClock::new();
    let keys = ["a", "b", "c", "a", "b", "a", "d"];
    let events: Vec<PublishedEvent> = keys.iter().map(|k| published(&clock, k)).collect();
    let sent = SentLog::default();
    let transport = BrokerTransport {
        producers: MemoryProducer::pool(2, &sent),
    };

    let report = transport.send(&events).await;

    assert_eq!(report.delivered.len(), events.len());
    assert!(report.failed.is_empty());
    let sent = sent.lock().unwrap();
    for key in ["a", "b", "c", "d"] {
        let lanes: Vec<usize> = sent
            .iter()
            .filter(|(_, m)| m.key == key)
            .map(|(lane, _)| *lane)
            .collect();
        assert!(lanes.windows(2).all(|w| w[0] == w[1]), "key {key} spread over {lanes:?}");

        let sent_ids: Vec<String> = sent
            .iter()
            .filter(|(_, m)| m.key == key)
            .map(|(_, m)| m.headers[HEADER_ID].clone())
            .collect();
        let expected: Vec<String> = events
            .iter()
            .filter(|e| e.event_key == key)
            .map(|e| e.id.to_string())
            .collect();
        assert_eq!(sent_ids, expected);
    }
    // groups in first-appearance order: a, b, c, d -> lanes 0, 1, 0, 1
    assert!(sent.iter().filter(|(_, m)| m.key == "a").all(|(lane, _)| *lane == 0));
    assert!(sent.iter().filter(|(_, m)| m.key == "d").all(|(lane, _)| *lane == 1));
}

#[tokio::test]
async fn should_stop_key_group_after_first_failure() {
    let clock = ManualClock::new();
    let events = vec![
        published(&clock, "a"),
        published(&clock, "a"),
        published(&clock, "b"),
        published(&clock, "a"),
    ];
    let sent = SentLog::default();
    let calls = Arc::new(Mutex::new(0usize));
    let transport = BrokerTransport {
        producers: vec![FailAfter {
            inner: MemoryProducer::pool(1, &sent).remove(0),
            allowed: 1,
            calls: Arc::clone(&calls),
        }],
    };

    let report = transport.send(&events).await;

    assert_eq!(report.delivered, vec![events[0].id]);
    assert_eq!(report.failed, vec![events[1].id, events[3].id, events[2].id]);
    // the third "a" is never attempted
    assert_eq!(*calls.lock().unwrap(), 3);
}

/// Producer that rejects every send after the first `allowed`.
struct FailAfter {
    inner: MemoryProducer,
    allowed: usize,
    calls: Arc<Mutex<usize>>,
}

impl BrokerProducer for FailAfter {
    async fn send(&self, message: OutgoingMessage) -> Result<(), RelayError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if call > self.allowed {
            return Err(RelayError::Transport("connection reset".to_owned()));
        }
        self.inner.send(message).await
    }
}

#[tokio::test]
async fn should_fail_everything_without_producers() {
    let clock = ManualClock::new();
    let events = vec![published(&clock, "a")];
    let transport: BrokerTransport<MemoryProducer> = BrokerTransport {
        producers: Vec::new(),
    };

    let report = transport.send(&events).await;

    assert!(report.delivered.is_empty());
    assert_eq!(report.failed, vec![events[0].id]);
}

// ── StorageTransport ─────────────────────────────────────────────────────────

#[tokio::test]
async fn should_relay_to_storage_with_staggered_timestamps() {
    let clock = ManualClock::new();
    let target = MemoryEventStore::new();
    let events: Vec<_> = (0..5).map(|_| published(&clock, "order-1")).collect();
    let transport = StorageTransport {
        target: target.clone(),
        clock: clock.clone(),
        group: "billing".to_owned(),
    };

    let report = transport.send(&events).await;

    assert_eq!(report.delivered.len(), 5);
    let rows = target.received.lock().unwrap();
    let stamps: Vec<_> = rows.iter().map(|r| r.timestamp).collect();
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(stamps[0], clock.now());
    assert!(rows.iter().all(|r| r.partition == DIRECT_PARTITION && r.group == "billing"));
    assert_eq!(rows[0].id, events[0].id);
}

#[tokio::test]
async fn should_report_all_failed_when_storage_rejects_batch() {
    let clock = ManualClock::new();
    let target = MemoryEventStore::new();
    target.set_fail_inserts(true);
    let events = vec![published(&clock, "a"), published(&clock, "b")];
    let transport = StorageTransport {
        target,
        clock,
        group: "billing".to_owned(),
    };

    let report = transport.send(&events).await;

    assert!(report.delivered.is_empty());
    assert_eq!(report.failed.len(), 2);
}
