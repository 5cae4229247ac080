//! `medledger-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the ledger modules
//! (no storage, no IO).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod numbering;
pub mod totals;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, EntityId};
pub use money::Money;
pub use numbering::{format_document_number, parse_document_number};
pub use totals::{DocumentTotals, line_total};
pub use value_object::ValueObject;
