use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use medledger_core::AggregateId;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend};

#[derive(Debug, Default)]
struct Log {
    /// Every committed event in global order.
    events: Vec<StoredEvent>,
    /// Per-stream indexes into `events`.
    streams: HashMap<AggregateId, Vec<usize>>,
}

impl Log {
    fn current_version(&self, aggregate_id: AggregateId) -> u64 {
        self.streams
            .get(&aggregate_id)
            .and_then(|idx| idx.last())
            .map(|&i| self.events[i].sequence_number)
            .unwrap_or(0)
    }

    fn stream_type(&self, aggregate_id: AggregateId) -> Option<&str> {
        self.streams
            .get(&aggregate_id)
            .and_then(|idx| idx.first())
            .map(|&i| self.events[i].aggregate_type.as_str())
    }
}

/// In-memory append-only event store.
///
/// A single `RwLock` guards the whole log, so a multi-stream batch becomes
/// visible to readers all at once.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: RwLock<Log>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of committed events.
    pub fn len(&self) -> Result<usize, EventStoreError> {
        let log = self.log.read().map_err(|_| EventStoreError::Poisoned)?;
        Ok(log.events.len())
    }

    pub fn is_empty(&self) -> Result<bool, EventStoreError> {
        Ok(self.len()? == 0)
    }
}

fn validate_batch(log: &Log, batch: &[StreamAppend]) -> Result<(), EventStoreError> {
    let mut seen = HashSet::new();

    for stream in batch {
        if !seen.insert(stream.aggregate_id) {
            return Err(EventStoreError::InvalidAppend(format!(
                "stream {} appears twice in one batch",
                stream.aggregate_id
            )));
        }

        let Some(first) = stream.events.first() else {
            continue;
        };
        let aggregate_type = first.aggregate_type.as_str();

        for (idx, e) in stream.events.iter().enumerate() {
            if e.aggregate_id != stream.aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "event at index {idx} targets {}, batch targets {}",
                    e.aggregate_id, stream.aggregate_id
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch for {} contains multiple aggregate_types (index {idx})",
                    stream.aggregate_id
                )));
            }
        }

        let current = log.current_version(stream.aggregate_id);
        if !stream.expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "stream {}: expected {:?}, found {current}",
                stream.aggregate_id, stream.expected_version
            )));
        }

        if let Some(existing) = log.stream_type(stream.aggregate_id) {
            if existing != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{existing}', attempted append with '{aggregate_type}'"
                )));
            }
        }
    }

    Ok(())
}

impl EventStore for InMemoryEventStore {
    fn append_all(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut log = self.log.write().map_err(|_| EventStoreError::Poisoned)?;

        // Nothing is written unless every stream passes.
        validate_batch(&log, &batch)?;

        let mut committed = Vec::new();
        for stream in batch {
            let mut next = log.current_version(stream.aggregate_id) + 1;
            for e in stream.events {
                let position = log.events.len();
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    global_position: position as u64 + 1,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                log.events.push(stored.clone());
                log.streams.entry(stream.aggregate_id).or_default().push(position);
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let log = self.log.read().map_err(|_| EventStoreError::Poisoned)?;

        Ok(log
            .streams
            .get(&aggregate_id)
            .map(|idx| idx.iter().map(|&i| log.events[i].clone()).collect())
            .unwrap_or_default())
    }

    fn load_by_type(&self, aggregate_type: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
        let log = self.log.read().map_err(|_| EventStoreError::Poisoned)?;

        Ok(log
            .events
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::UncommittedEvent;
    use chrono::Utc;
    use medledger_core::ExpectedVersion;
    use uuid::Uuid;

    fn test_event(aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({ "n": 1 }),
        }
    }

    fn test_stream(
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected: u64,
        count: usize,
    ) -> StreamAppend {
        StreamAppend {
            aggregate_id,
            expected_version: ExpectedVersion::Exact(expected),
            events: (0..count).map(|_| test_event(aggregate_id, aggregate_type)).collect(),
        }
    }

    #[test]
    fn sequence_numbers_are_stream_scoped() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        store.append_all(vec![test_stream(a, "quotes.quote", 0, 2)]).unwrap();
        let committed = store
            .append_all(vec![test_stream(b, "quotes.quote", 0, 1)])
            .unwrap();

        assert_eq!(committed[0].sequence_number, 1);
        assert_eq!(committed[0].global_position, 3);
        assert_eq!(store.load_stream(a).unwrap().len(), 2);
    }

    #[test]
    fn stale_expectation_rejects_the_whole_batch() {
        let store = InMemoryEventStore::new();
        let quote = AggregateId::new();
        let product = AggregateId::new();
        store
            .append_all(vec![test_stream(product, "inventory.product", 0, 1)])
            .unwrap();

        let result = store.append_all(vec![
            test_stream(quote, "quotes.quote", 0, 1),
            test_stream(product, "inventory.product", 0, 1),
        ]);

        assert!(matches!(result, Err(EventStoreError::Concurrency(_))));
        assert!(store.load_stream(quote).unwrap().is_empty());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn stream_type_is_stable() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store.append_all(vec![test_stream(id, "quotes.quote", 0, 1)]).unwrap();

        let result = store.append_all(vec![test_stream(id, "invoicing.invoice", 1, 1)]);
        assert!(matches!(
            result,
            Err(EventStoreError::AggregateTypeMismatch(_))
        ));
    }

    #[test]
    fn duplicate_stream_in_batch_is_rejected() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let result = store.append_all(vec![
            test_stream(id, "quotes.quote", 0, 1),
            test_stream(id, "quotes.quote", 0, 1),
        ]);
        assert!(matches!(result, Err(EventStoreError::InvalidAppend(_))));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn load_by_type_follows_commit_order() {
        let store = InMemoryEventStore::new();
        let first = AggregateId::new();
        let second = AggregateId::new();
        let other = AggregateId::new();

        store.append_all(vec![test_stream(second, "parties.client", 0, 1)]).unwrap();
        store.append_all(vec![test_stream(other, "quotes.quote", 0, 1)]).unwrap();
        store.append_all(vec![test_stream(first, "parties.client", 0, 1)]).unwrap();

        let loaded: Vec<_> = store
            .load_by_type("parties.client")
            .unwrap()
            .into_iter()
            .map(|e| e.aggregate_id)
            .collect();
        assert_eq!(loaded, vec![second, first]);
    }
}
