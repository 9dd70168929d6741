use std::sync::Arc;
use std::time::Duration;

use relay_core::time::Clock;
use relay_domain::status::EventStatus;
use relay_service::domain::types::ClaimPolicy;
use relay_service::infra::lock::LocalLock;
use relay_service::runtime::RelayRuntime;
use relay_service::usecase::batcher::BrokerTransport;
use relay_service::usecase::direct::StorageTransport;
use relay_service::usecase::ingest::{CommitPolicy, Ingestor};
use relay_service::usecase::outbox::PublishOutboxJob;
use relay_service::usecase::processor::{EventProcessor, ProcessReceivedJob};
use relay_service::usecase::publish::Publisher;
use relay_service::usecase::registry::HandlerRegistry;
use relay_service::usecase::scheduler::Job;
use relay_service::usecase::sweeper::RetentionSweepJob;
use tokio_util::sync::CancellationToken;

use crate::helpers::{
    ManualClock, MemoryConsumer, MemoryEventStore, MemoryProducer, PaymentCaptured,
    PaymentHandler, SentLog, delivered, lock_settings, published,
};

fn processor_job(
    store: &MemoryEventStore,
    clock: &ManualClock,
    handler: PaymentHandler,
) -> ProcessReceivedJob<MemoryEventStore, LocalLock, ManualClock> {
    let registry = HandlerRegistry::builder()
        .register::<PaymentCaptured, _>(handler)
        .unwrap()
        .build();
    ProcessReceivedJob {
        processor: EventProcessor {
            store: store.clone(),
            registry: Arc::new(registry),
        },
        locks: LocalLock::new(),
        clock: clock.clone(),
        lock_name: "billing-events-processor".to_owned(),
        lock_settings: lock_settings(),
        policy: ClaimPolicy::default(),
    }
}

fn sweeper_job(
    store: &MemoryEventStore,
    clock: &ManualClock,
) -> RetentionSweepJob<MemoryEventStore, LocalLock, ManualClock> {
    RetentionSweepJob {
        store: store.clone(),
        locks: LocalLock::new(),
        clock: clock.clone(),
        lock_name: "billing-events-sweeper".to_owned(),
        lock_settings: lock_settings(),
        retention: chrono::Duration::hours(1),
        batch_size: 100,
    }
}

#[tokio::test]
async fn should_relay_events_from_outbox_to_handler_through_broker() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let publisher = Publisher {
        clock: clock.clone(),
    };
    for (key, payment_id, amount) in [
        ("order-1", "pay-a", 10),
        ("order-2", "pay-b", 20),
        ("order-1", "pay-c", 30),
    ] {
        let event = PaymentCaptured {
            payment_id: payment_id.to_owned(),
            amount,
        };
        publisher.publish(&store, &event, key, []).await.unwrap();
    }
    clock.advance(chrono::Duration::seconds(1));

    let sent = SentLog::default();
    let outbox = PublishOutboxJob {
        store: store.clone(),
        locks: LocalLock::new(),
        transport: BrokerTransport {
            producers: MemoryProducer::pool(2, &sent),
        },
        clock: clock.clone(),
        lock_name: "billing-events-publisher".to_owned(),
        lock_settings: lock_settings(),
        policy: ClaimPolicy::default(),
    };
    let cancel = CancellationToken::new();
    assert_eq!(outbox.run_once(&cancel).await.unwrap(), 3);

    let messages = sent
        .lock()
        .unwrap()
        .iter()
        .enumerate()
        .map(|(position, (_, message))| delivered(message, position))
        .collect();
    let mut ingestor = Ingestor::new(
        MemoryConsumer::with_messages(messages),
        store.clone(),
        clock.clone(),
        "billing".to_owned(),
        CommitPolicy::default(),
    );
    ingestor.poll_once().await.unwrap();
    assert_eq!(ingestor.flush().await.unwrap(), 3);

    let handler = PaymentHandler::default();
    let processor = processor_job(&store, &clock, handler.clone());
    assert_eq!(processor.run_once(&cancel).await.unwrap(), 3);

    let handled = handler.handled.lock().unwrap().clone();
    assert_eq!(handled.len(), 3);
    let order_1: Vec<&String> = handled.iter().filter(|p| *p != "pay-b").collect();
    assert_eq!(order_1, vec!["pay-a", "pay-c"]);
    assert!(
        store
            .received
            .lock()
            .unwrap()
            .iter()
            .all(|r| r.status == EventStatus::Succeeded)
    );
    assert!(
        store
            .published
            .lock()
            .unwrap()
            .iter()
            .all(|r| r.status == EventStatus::Succeeded)
    );

    let sweeper = sweeper_job(&store, &clock);
    assert_eq!(sweeper.run_once(&cancel).await.unwrap(), 0);
    clock.advance(chrono::Duration::hours(2));
    assert_eq!(sweeper.run_once(&cancel).await.unwrap(), 6);
    assert!(store.received.lock().unwrap().is_empty());
    assert!(store.published.lock().unwrap().is_empty());
}

#[tokio::test]
async fn should_sweep_only_succeeded_rows() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let events = vec![published(&clock, "a"), published(&clock, "b")];
    {
        let mut rows = store.published.lock().unwrap();
        rows.extend(events.iter().cloned());
        rows[0].status = EventStatus::Succeeded;
        rows[0].update_timestamp = Some(clock.now());
        rows[1].status = EventStatus::Failed;
        rows[1].update_timestamp = Some(clock.now());
    }
    clock.advance(chrono::Duration::hours(2));

    let deleted = sweeper_job(&store, &clock)
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    assert!(store.published_by_id(events[0].id).is_none());
    assert!(store.published_by_id(events[1].id).is_some());
}

#[tokio::test]
async fn should_bound_each_sweep_by_batch_size() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    {
        let mut rows = store.published.lock().unwrap();
        for _ in 0..5 {
            let mut row = published(&clock, "a");
            row.status = EventStatus::Succeeded;
            row.update_timestamp = Some(clock.now());
            rows.push(row);
        }
    }
    clock.advance(chrono::Duration::hours(2));
    let mut sweeper = sweeper_job(&store, &clock);
    sweeper.batch_size = 2;
    let cancel = CancellationToken::new();

    assert_eq!(sweeper.run_once(&cancel).await.unwrap(), 2);
    assert_eq!(sweeper.run_once(&cancel).await.unwrap(), 2);
    assert_eq!(sweeper.run_once(&cancel).await.unwrap(), 1);
    assert_eq!(sweeper.run_once(&cancel).await.unwrap(), 0);
}

#[tokio::test]
async fn should_run_loops_until_shutdown() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let events: Vec<_> = ["order-1", "order-2", "order-1"]
        .iter()
        .map(|k| published(&clock, k))
        .collect();
    store.published.lock().unwrap().extend(events.iter().cloned());

    let outbox = PublishOutboxJob {
        store: store.clone(),
        locks: LocalLock::new(),
        transport: StorageTransport {
            target: store.clone(),
            clock: clock.clone(),
            group: "billing".to_owned(),
        },
        clock: clock.clone(),
        lock_name: "billing-events-publisher".to_owned(),
        lock_settings: lock_settings(),
        policy: ClaimPolicy::default(),
    };
    let handler = PaymentHandler::default();
    let mut runtime = RelayRuntime::default();
    runtime.spawn_job(outbox, 2, Duration::from_millis(10));
    runtime.spawn_job(processor_job(&store, &clock, handler.clone()), 1, Duration::from_millis(10));
    assert_eq!(runtime.len(), 3);

    for _ in 0..200 {
        if handler.handled.lock().unwrap().len() == events.len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    runtime.shutdown();
    runtime.join().await;

    assert_eq!(handler.handled.lock().unwrap().len(), 3);
    for event in &events {
        assert_eq!(store.published_by_id(event.id).unwrap().status, EventStatus::Succeeded);
        assert_eq!(store.received_by_id(event.id).unwrap().status, EventStatus::Succeeded);
    }
}
