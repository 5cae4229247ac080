//! Append-only event store boundary.
//!
//! Defines the storage abstraction for aggregate event streams and an
//! in-memory implementation. Multi-stream batches commit atomically.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
