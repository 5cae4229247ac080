use serde::{Deserialize, Serialize};

use medledger_core::{DomainResult, Entity, EntityId, Money, line_total, typed_id};
use medledger_inventory::ProductId;

typed_id!(
    /// Quote line item identifier.
    QuoteItemId(EntityId)
);

/// Product data frozen onto a document line when it is priced.
///
/// Later catalogue changes never reach an existing line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub product_id: ProductId,
    pub product_name: String,
    pub unit: String,
    pub unit_price: Money,
}

/// Quote line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteItem {
    pub id: QuoteItemId,
    pub snapshot: ItemSnapshot,
    pub quantity: i64,
    pub line_total: Money,
    /// Invariant: `0 <= quantity_converted <= quantity`.
    pub quantity_converted: i64,
    pub sort_order: u32,
}

impl QuoteItem {
    pub fn new(
        id: QuoteItemId,
        snapshot: ItemSnapshot,
        quantity: i64,
        sort_order: u32,
    ) -> DomainResult<Self> {
        let line_total = line_total(quantity, snapshot.unit_price)?;
        Ok(Self {
            id,
            snapshot,
            quantity,
            line_total,
            quantity_converted: 0,
            sort_order,
        })
    }

    /// Quantity still available for conversion.
    pub fn remaining(&self) -> i64 {
        self.quantity - self.quantity_converted
    }

    pub fn is_fully_converted(&self) -> bool {
        self.remaining() == 0
    }
}

impl Entity for QuoteItem {
    type Id = QuoteItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
