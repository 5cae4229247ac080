//! Document number allocation.
//!
//! One monotonic counter per prefix. A number is handed out exactly once even
//! when the document it was meant for is never committed; gaps are allowed,
//! reuse is not.

use std::collections::HashMap;
use std::sync::Mutex;

use medledger_core::format_document_number;

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("sequence table poisoned")]
    Poisoned,
    #[error("sequence for prefix '{0}' is exhausted")]
    Exhausted(String),
}

/// Per-prefix document number counters (`QT-2025-0001`, `INV-2025-0001`, ...).
#[derive(Debug, Default)]
pub struct SequenceCounter {
    /// Next value to hand out, per prefix.
    next: Mutex<HashMap<String, u64>>,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter whose prefixes start at the given values instead of 1.
    pub fn starting_at<I, P>(initial: I) -> Self
    where
        I: IntoIterator<Item = (P, u64)>,
        P: Into<String>,
    {
        let next = initial
            .into_iter()
            .map(|(prefix, start)| (prefix.into(), start.max(1)))
            .collect();
        Self {
            next: Mutex::new(next),
        }
    }

    /// Allocate the next number for `prefix`, formatted for `year`.
    pub fn next(&self, prefix: &str, year: i32) -> Result<String, SequenceError> {
        let mut next = self.next.lock().map_err(|_| SequenceError::Poisoned)?;
        let slot = next.entry(prefix.to_string()).or_insert(1);
        let sequence = *slot;
        *slot = sequence
            .checked_add(1)
            .ok_or_else(|| SequenceError::Exhausted(prefix.to_string()))?;
        Ok(format_document_number(prefix, year, sequence))
    }

    /// The value the next allocation for `prefix` would use.
    pub fn peek(&self, prefix: &str) -> Result<u64, SequenceError> {
        let next = self.next.lock().map_err(|_| SequenceError::Poisoned)?;
        Ok(next.get(prefix).copied().unwrap_or(1))
    }
}
