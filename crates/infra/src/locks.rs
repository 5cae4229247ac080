//! Per-aggregate exclusive locks.
//!
//! A command (or a multi-aggregate transaction) claims every aggregate it will
//! write before loading them. Claims are all-or-nothing: a caller either holds
//! its whole set or waits without holding any of it, so two transactions
//! touching overlapping sets can never deadlock.
//!
//! Operations on disjoint aggregates proceed in parallel.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Condvar, Mutex, PoisonError};

use medledger_core::AggregateId;

/// Table of currently claimed aggregates.
#[derive(Debug, Default)]
pub struct AggregateLocks {
    held: Mutex<HashSet<AggregateId>>,
    released: Condvar,
}

/// RAII claim over a set of aggregates; released on drop.
#[derive(Debug)]
pub struct LockSet<'a> {
    locks: &'a AggregateLocks,
    ids: Vec<AggregateId>,
}

#[derive(Debug, thiserror::Error)]
#[error("aggregate lock table poisoned")]
pub struct LockPoisoned;

impl AggregateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every id in `ids` is free, then claim them together.
    ///
    /// Duplicate ids are collapsed.
    pub fn acquire<I>(&self, ids: I) -> Result<LockSet<'_>, LockPoisoned>
    where
        I: IntoIterator<Item = AggregateId>,
    {
        let ids: Vec<AggregateId> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();

        let mut held = self.held.lock().map_err(|_| LockPoisoned)?;
        while ids.iter().any(|id| held.contains(id)) {
            held = self.released.wait(held).map_err(|_| LockPoisoned)?;
        }
        held.extend(ids.iter().copied());
        drop(held);

        Ok(LockSet { locks: self, ids })
    }

    /// Number of aggregates currently claimed.
    pub fn held_count(&self) -> usize {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl LockSet<'_> {
    pub fn contains(&self, id: AggregateId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    pub fn ids(&self) -> &[AggregateId] {
        &self.ids
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        // Releasing must happen even after a panic elsewhere poisoned the table.
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for id in &self.ids {
            held.remove(id);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}
