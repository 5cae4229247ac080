use serde::{Deserialize, Serialize};

use medledger_core::{DomainResult, Entity, EntityId, Money, line_total, typed_id};
use medledger_quotes::{ItemSnapshot, QuoteItemId};

typed_id!(
    /// Invoice line item identifier.
    InvoiceItemId(EntityId)
);

/// Invoice line item. Same snapshot shape as a quote line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: InvoiceItemId,
    pub snapshot: ItemSnapshot,
    pub quantity: i64,
    pub line_total: Money,
    /// Quote line this item was converted from.
    pub quote_item_id: Option<QuoteItemId>,
    pub sort_order: u32,
}

impl InvoiceItem {
    pub fn from_new(new: &NewInvoiceItem, sort_order: u32) -> DomainResult<Self> {
        Ok(Self {
            id: new.item_id,
            snapshot: new.snapshot.clone(),
            quantity: new.quantity,
            line_total: line_total(new.quantity, new.snapshot.unit_price)?,
            quote_item_id: new.quote_item_id,
            sort_order,
        })
    }
}

impl Entity for InvoiceItem {
    type Id = InvoiceItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Line to price onto an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoiceItem {
    pub item_id: InvoiceItemId,
    pub snapshot: ItemSnapshot,
    pub quantity: i64,
    pub quote_item_id: Option<QuoteItemId>,
}
