use std::collections::BTreeMap;
use std::time::Duration;

use relay_core::time::{Clock, to_rfc3339_ms};
use relay_domain::id::EventId;
use relay_domain::status::EventStatus;
use relay_service::domain::types::{BrokerMessage, HEADER_ID, HEADER_SENT_AT, Offset};
use relay_service::usecase::ingest::{CommitPolicy, Ingestor};

use crate::helpers::{
    ManualClock, MemoryConsumer, MemoryEventStore, bytes_of, headers, payment_content,
};

fn message(id: EventId, key: &str, position: usize) -> BrokerMessage {
    BrokerMessage {
        key: key.to_owned(),
        payload: bytes_of(&payment_content("pay", 10)),
        headers: headers(&[(HEADER_ID, id.to_string())]),
        offset: Offset {
            topic: "payments".to_owned(),
            partition: "0".to_owned(),
            position: position.to_string(),
        },
    }
}

fn ingestor(
    messages: Vec<BrokerMessage>,
    store: &MemoryEventStore,
    clock: &ManualClock,
    batch_size: usize,
) -> Ingestor<MemoryConsumer, MemoryEventStore, ManualClock> {
    Ingestor::new(
        MemoryConsumer::with_messages(messages),
        store.clone(),
        clock.clone(),
        "billing".to_owned(),
        CommitPolicy {
            batch_size,
            interval: Duration::from_secs(60),
        },
    )
}

#[tokio::test]
async fn should_persist_before_acknowledging() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let ids: Vec<EventId> = (0..3).map(|_| EventId::new()).collect();
    let messages = ids
        .iter()
        .enumerate()
        .map(|(i, id)| message(*id, "order-1", i))
        .collect();
    let mut ingestor = ingestor(messages, &store, &clock, 3);
    let committed = ingestor.consumer.committed_handle();

    assert_eq!(ingestor.poll_once().await.unwrap(), 3);
    assert!(committed.lock().unwrap().is_empty());
    assert_eq!(ingestor.flush_if_due().await.unwrap(), 3);

    assert_eq!(committed.lock().unwrap().len(), 3);
    assert!(ingestor.buffer.is_empty());
    for id in &ids {
        let row = store.received_by_id(*id).unwrap();
        assert_eq!(row.status, EventStatus::None);
        assert_eq!(row.group, "billing");
        assert_eq!(row.topic, "payments");
        assert_eq!(row.event_key, "order-1");
    }
}

#[tokio::test]
async fn should_wait_for_threshold_before_flushing() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let mut ingestor = ingestor(vec![message(EventId::new(), "k", 0)], &store, &clock, 10);

    ingestor.poll_once().await.unwrap();
    assert_eq!(ingestor.flush_if_due().await.unwrap(), 0);
    assert_eq!(ingestor.buffer.len(), 1);

    clock.advance(chrono::Duration::seconds(60));
    assert_eq!(ingestor.flush_if_due().await.unwrap(), 1);
    assert!(ingestor.buffer.is_empty());
}

#[tokio::test]
async fn should_keep_buffer_when_insert_fails() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let id = EventId::new();
    let mut ingestor = ingestor(vec![message(id, "k", 0)], &store, &clock, 1);
    let committed = ingestor.consumer.committed_handle();
    store.set_fail_inserts(true);

    ingestor.poll_once().await.unwrap();
    assert!(ingestor.flush().await.is_err());

    assert_eq!(ingestor.buffer.len(), 1);
    assert!(committed.lock().unwrap().is_empty());

    store.set_fail_inserts(false);
    assert_eq!(ingestor.flush().await.unwrap(), 1);
    assert_eq!(committed.lock().unwrap().len(), 1);
    assert!(store.received_by_id(id).is_some());
}

#[tokio::test]
async fn should_absorb_redelivered_message() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let id = EventId::new();
    let mut ingestor = ingestor(
        vec![message(id, "k", 0), message(id, "k", 1)],
        &store,
        &clock,
        1,
    );
    let committed = ingestor.consumer.committed_handle();

    for _ in 0..2 {
        ingestor.poll_once().await.unwrap();
        ingestor.flush_if_due().await.unwrap();
    }

    assert_eq!(store.received.lock().unwrap().len(), 1);
    assert_eq!(committed.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn should_acknowledge_poison_message_without_storing_it() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let good = EventId::new();
    let mut poison = message(EventId::new(), "k", 1);
    poison.headers = BTreeMap::from([(HEADER_ID.to_owned(), "not-a-uuid".to_owned())]);
    let mut ingestor = ingestor(vec![message(good, "k", 0), poison], &store, &clock, 2);
    let committed = ingestor.consumer.committed_handle();

    ingestor.poll_once().await.unwrap();
    assert_eq!(ingestor.flush().await.unwrap(), 1);

    assert_eq!(store.received.lock().unwrap().len(), 1);
    assert!(store.received_by_id(good).is_some());
    let positions: Vec<String> = committed
        .lock()
        .unwrap()
        .iter()
        .map(|o| o.position.clone())
        .collect();
    assert_eq!(positions, vec!["0", "1"]);
}

#[tokio::test]
async fn should_stagger_timestamps_of_one_flush() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let ids: Vec<EventId> = (0..5).map(|_| EventId::new()).collect();
    let messages = ids
        .iter()
        .enumerate()
        .map(|(i, id)| message(*id, "order-1", i))
        .collect();
    let mut ingestor = ingestor(messages, &store, &clock, 5);

    ingestor.poll_once().await.unwrap();
    ingestor.flush().await.unwrap();

    let stamps: Vec<_> = ids
        .iter()
        .map(|id| store.received_by_id(*id).unwrap().timestamp)
        .collect();
    let expected: Vec<_> = (0..5)
        .map(|i| clock.now() + chrono::Duration::milliseconds(i))
        .collect();
    assert_eq!(stamps, expected);
}

#[tokio::test]
async fn should_carry_sent_at_header_into_row() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let id = EventId::new();
    let sent_at = clock.now() - chrono::Duration::milliseconds(1500);
    let mut msg = message(id, "k", 0);
    msg.headers
        .insert(HEADER_SENT_AT.to_owned(), to_rfc3339_ms(&sent_at));
    let mut ingestor = ingestor(vec![msg], &store, &clock, 1);

    ingestor.poll_once().await.unwrap();
    ingestor.flush().await.unwrap();

    assert_eq!(store.received_by_id(id).unwrap().sent_at, sent_at);
}

#[tokio::test]
async fn should_flush_remaining_messages_on_shutdown() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let id = EventId::new();
    let ingestor = ingestor(vec![message(id, "k", 0)], &store, &clock, 10);
    let cancel = tokio_util::sync::CancellationToken::new();

    let task = tokio::spawn(ingestor.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    task.await.unwrap();

    assert!(store.received_by_id(id).is_some());
}

#[tokio::test]
async fn should_keep_blocking_full_interval_while_idle() {
    let store = MemoryEventStore::new();
    let clock = ManualClock::new();
    let mut ingestor = ingestor(Vec::new(), &store, &clock, 10);
    let blocks = std::sync::Arc::clone(&ingestor.consumer.blocks);

    clock.advance(chrono::Duration::minutes(5));
    for _ in 0..3 {
        assert_eq!(ingestor.poll_once().await.unwrap(), 0);
        assert_eq!(ingestor.flush_if_due().await.unwrap(), 0);
        clock.advance(chrono::Duration::minutes(1));
    }

    assert_eq!(*blocks.lock().unwrap(), vec![Duration::from_secs(60); 3]);
}
