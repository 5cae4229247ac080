//! Commercial operations ledger for a medical-supplies business.
//!
//! [`Ledger`] is the single entry point: catalogue and stock journal, client
//! directory, quotes, invoices, conversion between them, and payments. Every
//! mutation commits atomically through the event store and is published on the
//! event bus afterwards.

pub mod catalogue;
pub mod clients;
pub mod clock;
pub mod conversion;
pub mod error;
pub mod invoices;
pub mod ledger;
pub mod query;
pub mod quotes;

pub use catalogue::{MovementRequest, NewProduct};
pub use clients::NewClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use conversion::Conversion;
pub use error::{LedgerError, LedgerResult};
pub use invoices::{NewInvoice, NewPayment};
pub use ledger::{DocumentKind, InMemoryLedger, Ledger, LineRequest};
pub use query::{
    ClientFilter, DateRange, InvoiceFilter, LowStockEntry, MovementFilter, MovementRecord,
    PaymentFilter, PaymentRecord, QuoteFilter,
};
pub use quotes::NewQuote;
