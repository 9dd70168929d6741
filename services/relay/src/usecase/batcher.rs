use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use futures::future::join_all;
use relay_core::time::to_rfc3339_ms;
use tracing::warn;

use crate::domain::repository::{BrokerProducer, Transport};
use crate::domain::types::{HEADER_ID, HEADER_SENT_AT, OutgoingMessage, PublishedEvent, SendReport};

/// Sends claimed published events through a fixed pool of broker producers.
///
/// Events are grouped by `event_key` and group `i` always goes through producer
/// `i % producers.len()`, so one key never spreads across connections. Producers
/// run concurrently; inside one producer, groups and their events go out in
/// claim order.
pub struct BrokerTransport<P: BrokerProducer> {
    pub producers: Vec<P>,
}

impl<P: BrokerProducer> Transport for BrokerTransport<P> {
    async fn send(&self, events: &[PublishedEvent]) -> SendReport {
        if self.producers.is_empty() {
            return SendReport {
                delivered: Vec::new(),
                failed: events.iter().map(|e| e.id).collect(),
            };
        }

        let mut lanes: Vec<Vec<Vec<&PublishedEvent>>> = vec![Vec::new(); self.producers.len()];
        for (index, group) in group_by_key(events).into_iter().enumerate() {
            lanes[index % self.producers.len()].push(group);
        }

        let reports = join_all(
            self.producers
                .iter()
                .zip(lanes)
                .map(|(producer, groups)| send_lane(producer, groups)),
        )
        .await;

        reports
            .into_iter()
            .fold(SendReport::default(), |mut acc, report| {
                acc.delivered.extend(report.delivered);
                acc.failed.extend(report.failed);
                acc
            })
    }
}

/// Groups events by key in order of each key's first appearance. Order inside a
/// group is the input order.
pub fn group_by_key(events: &[PublishedEvent]) -> Vec<Vec<&PublishedEvent>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<&PublishedEvent>> = Vec::new();
    for event in events {
        match index.get(event.event_key.as_str()) {
            Some(&i) => groups[i].push(event),
            None => {
                index.insert(event.event_key.as_str(), groups.len());
                groups.push(vec![event]);
            }
        }
    }
    groups
}

pub fn outgoing_message(event: &PublishedEvent) -> OutgoingMessage {
    let mut headers = BTreeMap::new();
    headers.insert(HEADER_ID.to_owned(), event.id.to_string());
    headers.insert(HEADER_SENT_AT.to_owned(), to_rfc3339_ms(&event.sent_at));
    OutgoingMessage {
        topic: event.topic.clone(),
        key: event.event_key.clone(),
        payload: Bytes::from(event.content.clone()),
        headers,
    }
}

// A failure stops the rest of its group so later events of that key are not
// delivered ahead of the one that failed.
async fn send_lane<P: BrokerProducer>(producer: &P, groups: Vec<Vec<&PublishedEvent>>) -> SendReport {
    let mut report = SendReport::default();
    for group in groups {
        let mut pending = group.into_iter();
        while let Some(event) = pending.next() {
            match producer.send(outgoing_message(event)).await {
                Ok(()) => report.delivered.push(event.id),
                Err(e) => {
                    warn!(event_id = %event.id, event_key = %event.event_key, error = %e, "failed to send event");
                    report.failed.push(event.id);
                    report.failed.extend(pending.by_ref().map(|e| e.id));
                    break;
                }
            }
        }
    }
    report
}
