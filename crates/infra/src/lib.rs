//! Infrastructure layer: event store, command dispatch, locking, numbering and
//! configuration.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod locks;
pub mod sequence;
