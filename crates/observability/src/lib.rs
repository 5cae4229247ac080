//! Tracing/logging setup shared by ledger hosts and tests.

/// Subscriber construction (filters, JSON formatting).
pub mod subscriber;

pub use subscriber::{init, init_with_filter};
