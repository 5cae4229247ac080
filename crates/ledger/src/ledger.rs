//! The ledger facade: one entry point for every mutation and read.
//!
//! Each operation claims the aggregates it writes, runs their commands through
//! a single unit of work and commits atomically. Operations on unrelated
//! aggregates run concurrently.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde_json::Value as JsonValue;

use medledger_core::{Aggregate, DomainError, Money};
use medledger_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use medledger_infra::command_dispatcher::{CommandDispatcher, DispatchError};
use medledger_infra::config::LedgerConfig;
use medledger_infra::event_store::{EventStore, InMemoryEventStore};
use medledger_infra::sequence::SequenceCounter;
use medledger_inventory::{Product, ProductId};
use medledger_quotes::ItemSnapshot;

use crate::clock::{Clock, SystemClock};
use crate::error::{LedgerError, LedgerResult};

/// Which counter a document number is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Quote,
    Invoice,
}

/// A product line as requested by a caller, before pricing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRequest {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Negotiated price; the catalogue price when `None`.
    pub unit_price: Option<Money>,
}

impl LineRequest {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
            unit_price: None,
        }
    }

    pub fn at_price(mut self, unit_price: Money) -> Self {
        self.unit_price = Some(unit_price);
        self
    }
}

pub type InMemoryLedger = Ledger<InMemoryEventStore, InMemoryEventBus<EventEnvelope<JsonValue>>>;

/// Commercial operations ledger over an event store and an event bus.
#[derive(Debug)]
pub struct Ledger<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    sequences: SequenceCounter,
    config: LedgerConfig,
    clock: Arc<dyn Clock>,
    /// Serializes SKU uniqueness checks with product registration.
    catalogue: Mutex<()>,
}

impl InMemoryLedger {
    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::new(InMemoryEventStore::new(), InMemoryEventBus::new(), config)
    }
}

impl<S, B> Ledger<S, B> {
    pub fn new(store: S, bus: B, config: LedgerConfig) -> Self {
        let sequences = SequenceCounter::starting_at([
            (config.numbering.quote_prefix.clone(), config.numbering.next_quote),
            (config.numbering.invoice_prefix.clone(), config.numbering.next_invoice),
        ]);
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            sequences,
            config,
            clock: Arc::new(SystemClock),
            catalogue: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Install the global tracing subscriber with `telemetry.log_filter` as
    /// the fallback directive. Returns `false` if one is already installed.
    pub fn init_telemetry(&self) -> bool {
        medledger_observability::init_with_filter(&self.config.telemetry.log_filter)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub(crate) fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub(crate) fn catalogue_guard(&self) -> LedgerResult<std::sync::MutexGuard<'_, ()>> {
        self.catalogue
            .lock()
            .map_err(|_| LedgerError::from(medledger_infra::locks::LockPoisoned))
    }

    /// Allocate the next document number (`QT-2025-0001`).
    ///
    /// Numbers are never reused; a number allocated for an operation that then
    /// fails is burned.
    pub fn next_number(&self, kind: DocumentKind) -> LedgerResult<String> {
        let prefix = match kind {
            DocumentKind::Quote => &self.config.numbering.quote_prefix,
            DocumentKind::Invoice => &self.config.numbering.invoice_prefix,
        };
        Ok(self.sequences.next(prefix, self.today().year())?)
    }
}

impl<S, B> Ledger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Subscribe to committed events (published after each commit).
    pub fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        self.dispatcher.bus().subscribe()
    }

    /// Load an aggregate that must exist.
    pub(crate) fn existing<A>(&self, id: A::Id, entity: &'static str) -> LedgerResult<A>
    where
        A: Aggregate,
        A::Event: serde::de::DeserializeOwned,
    {
        let aggregate: A = self.dispatcher.load(id)?;
        if !aggregate.exists() {
            return Err(DomainError::not_found(entity, id).into());
        }
        Ok(aggregate)
    }

    /// Freeze the current catalogue data for a line.
    pub(crate) fn price_line(&self, line: &LineRequest) -> LedgerResult<ItemSnapshot> {
        let product: Product = self.existing(line.product_id, "product")?;
        let unit_price = line.unit_price.unwrap_or_else(|| product.unit_price());
        if unit_price.is_negative() {
            return Err(DomainError::validation(format!(
                "unit price for {} cannot be negative",
                product.sku()
            ))
            .into());
        }
        Ok(ItemSnapshot {
            product_id: line.product_id,
            product_name: product.name().to_string(),
            unit: product.unit().to_string(),
            unit_price,
        })
    }
}

/// Log the outcome of a failed operation at a level matching its severity.
pub(crate) fn observe<T>(operation: &'static str, result: LedgerResult<T>) -> LedgerResult<T> {
    if let Err(err) = &result {
        match err.domain() {
            Some(DomainError::IntegrityViolation(detail)) => {
                tracing::error!(operation, %detail, "integrity violation");
            }
            Some(rejection) => tracing::debug!(operation, error = %rejection, "rejected"),
            None => tracing::warn!(operation, error = %err, "operation failed"),
        }
    }
    result
}

/// Map a failure inside a conversion's invoice half to `ConversionAborted`.
pub(crate) fn abort_conversion(context: impl core::fmt::Display) -> impl FnOnce(DispatchError) -> DispatchError {
    move |err| match err {
        DispatchError::Domain(inner) => {
            DispatchError::Domain(DomainError::conversion_aborted(format!("{context}: {inner}")))
        }
        DispatchError::Concurrency(detail) => {
            DispatchError::Domain(DomainError::conversion_aborted(format!("{context}: {detail}")))
        }
        other => other,
    }
}
