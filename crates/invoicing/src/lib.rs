//! Invoicing domain module (event-sourced).
//!
//! Invoices, their line items, and the payments recorded against them.

pub mod invoice;
pub mod item;
pub mod payment;

pub use invoice::{
    AddItems, CancelInvoice, CreateInvoice, Invoice, InvoiceCancelled, InvoiceCommand,
    InvoiceCreated, InvoiceEvent, InvoiceId, InvoiceSent, InvoiceStatus, ItemRemoved, ItemsAdded,
    PaymentRecorded, PaymentReversed, RecordPayment, RemoveItem, ReversePayment, SendInvoice,
};
pub use item::{InvoiceItem, InvoiceItemId, NewInvoiceItem};
pub use payment::{Payment, PaymentId, PaymentMethod};
