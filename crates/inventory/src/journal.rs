//! Stock-movement journal replay and reconciliation.
//!
//! The stock counter on [`Product`] is a materialized view of the journal:
//! replaying every movement in creation order must reproduce it exactly.

use serde::{Deserialize, Serialize};

use medledger_core::{AggregateRoot, DomainError, DomainResult};

use crate::movement::StockMovement;
use crate::product::{Product, ProductId};

/// Outcome of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub product_id: ProductId,
    pub movement_count: usize,
    pub replayed_stock: i64,
    pub recorded_stock: i64,
}

/// Replay movements in order and return the resulting stock.
///
/// Result is `previous_stock` of the first movement plus the sum of all deltas.
/// Every entry must chain onto its predecessor.
pub fn replay(movements: &[StockMovement]) -> DomainResult<i64> {
    let Some(first) = movements.first() else {
        return Ok(0);
    };

    let mut running = first.previous_stock;
    for (position, movement) in movements.iter().enumerate() {
        if movement.previous_stock != running {
            return Err(DomainError::integrity(format!(
                "movement #{position} ({}) starts at {}, journal is at {running}",
                movement.id, movement.previous_stock
            )));
        }
        if !movement.is_balanced() {
            return Err(DomainError::integrity(format!(
                "movement #{position} ({}): {} {:+} != {}",
                movement.id, movement.previous_stock, movement.quantity, movement.new_stock
            )));
        }
        running = movement.new_stock;
    }

    Ok(running)
}

/// Compare the journal against the product's stock counter.
///
/// Any divergence is an `IntegrityViolation`; nothing is corrected.
pub fn reconcile(product: &Product) -> DomainResult<ReconciliationReport> {
    let replayed_stock = replay(product.movements())?;
    let recorded_stock = product.stock_quantity();

    if let Some(fault) = product.integrity_fault() {
        return Err(DomainError::integrity(fault.to_string()));
    }
    if replayed_stock != recorded_stock {
        return Err(DomainError::integrity(format!(
            "product {}: journal replays to {replayed_stock}, counter holds {recorded_stock}",
            product.id()
        )));
    }

    Ok(ReconciliationReport {
        product_id: *product.id(),
        movement_count: product.movements().len(),
        replayed_stock,
        recorded_stock,
    })
}
