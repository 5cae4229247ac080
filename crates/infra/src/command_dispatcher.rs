//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command(s)
//!   ↓
//! 1. Claim every aggregate the operation writes (AggregateLocks)
//!   ↓
//! 2. Load events and rehydrate each aggregate
//!   ↓
//! 3. Handle commands (pure decision logic), staging the resulting events
//!   ↓
//! 4. Append all staged streams in one atomic batch (optimistic check per stream)
//!   ↓
//! 5. Publish committed events to the bus, then release the claims
//! ```
//!
//! A single-aggregate command is just a transaction over one aggregate. Any
//! failure before step 4 leaves the store untouched.
//!
//! This module contains no IO itself; it composes infrastructure traits.

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use medledger_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use medledger_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
use crate::locks::{AggregateLocks, LockPoisoned};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Business rule rejection (deterministic).
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// Optimistic concurrency failure (stale stream version).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    /// Historical payload could not be decoded into the aggregate event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    /// Persisting to or reading from the event store failed.
    #[error("event store failure: {0}")]
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
    /// A unit of work tried to write an aggregate it never claimed.
    #[error("aggregate {0} is not claimed by this transaction")]
    NotClaimed(AggregateId),
    #[error(transparent)]
    Lock(#[from] LockPoisoned),
}

impl DispatchError {
    /// The domain rejection, if this is one.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            DispatchError::Domain(err) => Some(err),
            _ => None,
        }
    }

    /// Whether nothing was committed (publication failures happen after commit).
    pub fn is_rollback(&self) -> bool {
        !matches!(self, DispatchError::Publish(_))
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Every write goes through [`transaction`](CommandDispatcher::transaction):
/// claims are taken up front so that concurrent operations on the same
/// aggregate are serialized, while the per-stream version check on append
/// still catches any writer that bypasses the dispatcher.
///
/// Reads ([`load`](CommandDispatcher::load), [`load_all`](CommandDispatcher::load_all))
/// take no claims; they see the store as of its last committed batch.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    locks: AggregateLocks,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            locks: AggregateLocks::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn locks(&self) -> &AggregateLocks {
        &self.locks
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate one aggregate from its stream (may not exist yet).
    pub fn load<A>(&self, id: A::Id) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(id.into())?;
        rehydrate(id, &history, &[])
    }

    /// Rehydrate every aggregate of type `A`, in creation order.
    pub fn load_all<A>(&self) -> Result<Vec<A>, DispatchError>
    where
        A: Aggregate,
        A::Id: From<AggregateId>,
        A::Event: DeserializeOwned,
    {
        let events = self.store.load_by_type(A::AGGREGATE_TYPE)?;

        let mut order = Vec::new();
        let mut streams: HashMap<AggregateId, Vec<StoredEvent>> = HashMap::new();
        for event in events {
            let stream = streams.entry(event.aggregate_id).or_insert_with(|| {
                order.push(event.aggregate_id);
                Vec::new()
            });
            stream.push(event);
        }

        order
            .into_iter()
            .map(|id| {
                let history = streams.remove(&id).unwrap_or_default();
                rehydrate(<A::Id as From<AggregateId>>::from(id), &history, &[])
            })
            .collect()
    }

    /// Execute one command against one aggregate and return its new state.
    pub fn dispatch<A>(&self, id: A::Id, command: &A::Command) -> Result<A, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: medledger_events::Event + Serialize + DeserializeOwned,
    {
        let stream_id: AggregateId = id.into();
        self.transaction([stream_id], |uow| {
            let mut aggregate = uow.load::<A>(id)?;
            uow.execute(&mut aggregate, command)?;
            Ok(aggregate)
        })
    }

    /// Run `work` with exclusive claims on `ids` and commit everything it
    /// stages as one atomic batch.
    ///
    /// If `work` fails, or the append is rejected, nothing is written and
    /// nothing is published.
    pub fn transaction<T, I, F>(&self, ids: I, work: F) -> Result<T, DispatchError>
    where
        I: IntoIterator<Item = AggregateId>,
        F: FnOnce(&mut UnitOfWork<'_, S>) -> Result<T, DispatchError>,
    {
        let claims = self.locks.acquire(ids)?;

        let mut uow = UnitOfWork {
            store: &self.store,
            claimed: claims.ids(),
            staged: Vec::new(),
        };
        let value = work(&mut uow)?;
        let staged = uow.staged;

        if staged.is_empty() {
            return Ok(value);
        }

        let streams = staged.len();
        let committed = self.store.append_all(staged)?;
        tracing::debug!(streams, events = committed.len(), "transaction committed");

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        drop(claims);
        Ok(value)
    }
}

/// Staging area for one transaction.
///
/// Aggregates loaded through the unit of work see events staged earlier in the
/// same transaction.
#[derive(Debug)]
pub struct UnitOfWork<'a, S> {
    store: &'a S,
    claimed: &'a [AggregateId],
    staged: Vec<StreamAppend>,
}

impl<S> UnitOfWork<'_, S>
where
    S: EventStore,
{
    /// Rehydrate an aggregate including anything already staged for it.
    pub fn load<A>(&self, id: A::Id) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let stream_id: AggregateId = id.into();
        let history = self.store.load_stream(stream_id)?;
        let pending = self
            .staged
            .iter()
            .find(|s| s.aggregate_id == stream_id)
            .map(|s| s.events.as_slice())
            .unwrap_or_default();
        rehydrate(id, &history, pending)
    }

    /// Handle `command`, stage the resulting events and apply them to `aggregate`.
    ///
    /// On rejection neither the aggregate nor the staging area changes.
    pub fn execute<A>(
        &mut self,
        aggregate: &mut A,
        command: &A::Command,
    ) -> Result<Vec<A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: medledger_events::Event + Serialize,
    {
        let stream_id: AggregateId = (*aggregate.id()).into();
        if self.claimed.binary_search(&stream_id).is_err() {
            return Err(DispatchError::NotClaimed(stream_id));
        }

        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            return Ok(decided);
        }

        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(stream_id, A::AGGREGATE_TYPE, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let version = aggregate.version();
        match self.staged.iter_mut().find(|s| s.aggregate_id == stream_id) {
            Some(stream) => {
                let staged_tip = match stream.expected_version {
                    ExpectedVersion::Exact(v) => v + stream.events.len() as u64,
                    ExpectedVersion::Any => version,
                };
                if staged_tip != version {
                    return Err(DispatchError::Concurrency(format!(
                        "stale copy of {stream_id} in transaction (at {version}, staged up to {staged_tip})"
                    )));
                }
                stream.events.extend(uncommitted);
            }
            None => {
                let mut stream = StreamAppend::new(stream_id, ExpectedVersion::Exact(version));
                stream.events = uncommitted;
                self.staged.push(stream);
            }
        }

        for event in &decided {
            aggregate.apply(event);
        }
        Ok(decided)
    }

    /// Number of events staged so far.
    pub fn staged_len(&self) -> usize {
        self.staged.iter().map(|s| s.events.len()).sum()
    }
}

fn rehydrate<A>(
    id: A::Id,
    history: &[StoredEvent],
    pending: &[UncommittedEvent],
) -> Result<A, DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    validate_loaded_stream(id.into(), A::AGGREGATE_TYPE, history)?;

    let mut aggregate = A::empty(id);
    let payloads = history
        .iter()
        .map(|e| &e.payload)
        .chain(pending.iter().map(|e| &e.payload));
    for payload in payloads {
        let ev: A::Event = serde_json::from_value(payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(aggregate)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    aggregate_type: &str,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Guard against a backend returning mixed or out-of-order streams.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.aggregate_type != aggregate_type {
            return Err(DispatchError::Store(EventStoreError::AggregateTypeMismatch(format!(
                "stream {aggregate_id} is '{}', loaded as '{aggregate_type}'",
                e.aggregate_type
            ))));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "sequence gap in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}
