//! Inventory domain module (event-sourced).
//!
//! Products, their stock counter, and the append-only stock-movement journal
//! that explains every change to it. Pure domain logic (no IO, no storage).

pub mod journal;
pub mod movement;
pub mod product;

pub use journal::{ReconciliationReport, reconcile, replay};
pub use movement::{MovementId, MovementType, StockMovement};
pub use product::{
    ChangePrice, DetailsUpdated, InventoryCommand, InventoryEvent, PriceChanged, Product,
    ProductDetails, ProductId, ProductRegistered, RecordMovement, RegisterProduct,
    StockMovementRecorded, UpdateDetails,
};
