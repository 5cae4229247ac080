//! Parties domain module (event-sourced).
//!
//! Clients that quotes and invoices are issued to.

pub mod client;

pub use client::{
    Client, ClientCommand, ClientEvent, ClientId, ClientReferenced, ClientRegistered, ClientTerms,
    ClientType, ContactInfo, ContactUpdated, MarkReferenced, RegisterClient, ReviseTerms,
    TermsRevised, UpdateContact,
};
