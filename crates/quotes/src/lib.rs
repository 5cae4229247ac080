//! Quotes domain module (event-sourced).
//!
//! Priced offers to clients, their line items, and the per-item conversion
//! bookkeeping used when quoted quantities are invoiced.

pub mod item;
pub mod quote;

pub use item::{ItemSnapshot, QuoteItem, QuoteItemId};
pub use quote::{
    AddItem, ApproveQuote, ChangeItemQuantity, ConversionLine, CreateQuote, ItemAdded,
    ItemQuantityChanged, ItemRemoved, NewQuoteItem, PricingChanged, Quote, QuoteApproved,
    QuoteCommand, QuoteConverted, QuoteCreated, QuoteEvent, QuoteId, QuoteRejected, QuoteSent,
    QuoteStatus, RecordConversion, RejectQuote, RemoveItem, SendQuote, SetPricing,
};
