//! Read-side filters and row types.
//!
//! Filters are conjunctive; `None` fields match everything. Status filters
//! compare against the effective status as of the ledger's current date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use medledger_core::AggregateId;
use medledger_inventory::{MovementType, ProductId, StockMovement};
use medledger_invoicing::{InvoiceId, InvoiceStatus, Payment, PaymentMethod};
use medledger_parties::{ClientId, ClientType};
use medledger_quotes::{QuoteId, QuoteStatus};

/// Inclusive date range; open on either side when `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientFilter {
    pub client_type: Option<ClientType>,
    /// Case-insensitive substring of the client name.
    pub name_contains: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuoteFilter {
    pub status: Option<QuoteStatus>,
    pub client_id: Option<ClientId>,
    pub issued: DateRange,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub client_id: Option<ClientId>,
    pub quote_id: Option<QuoteId>,
    pub issued: DateRange,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentFilter {
    pub invoice_id: Option<InvoiceId>,
    pub client_id: Option<ClientId>,
    pub method: Option<PaymentMethod>,
    pub paid: DateRange,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub movement_type: Option<MovementType>,
    pub invoice_id: Option<InvoiceId>,
    pub created: DateRange,
}

impl MovementFilter {
    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Self::default()
        }
    }

    pub fn for_invoice(invoice_id: InvoiceId) -> Self {
        Self {
            invoice_id: Some(invoice_id),
            ..Self::default()
        }
    }

    pub(crate) fn matches(&self, product_id: ProductId, movement: &StockMovement) -> bool {
        let invoice: Option<AggregateId> = self.invoice_id.map(Into::into);
        self.product_id.is_none_or(|p| p == product_id)
            && self.movement_type.is_none_or(|t| t == movement.movement_type)
            && invoice.is_none_or(|i| movement.invoice_id == Some(i))
            && self.created.contains(movement.created_at.date_naive())
    }
}

/// One journal entry with the product it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub product_id: ProductId,
    /// Commit position across the whole journal.
    pub position: u64,
    pub movement: StockMovement,
}

/// One payment with its invoice context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub client_id: ClientId,
    pub payment: Payment,
}

/// Product at or below its minimum stock level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockEntry {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub stock_quantity: i64,
    pub min_stock_level: i64,
    pub reorder_quantity: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use medledger_inventory::MovementId;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_movement(movement_type: MovementType, invoice_id: Option<AggregateId>) -> StockMovement {
        StockMovement {
            id: MovementId::generate(),
            movement_type,
            quantity: -3,
            previous_stock: 10,
            new_stock: 7,
            invoice_id,
            note: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn date_range_is_inclusive_and_open_ended() {
        let january = DateRange::between(date(2025, 1, 1), date(2025, 1, 31));
        assert!(january.contains(date(2025, 1, 1)));
        assert!(january.contains(date(2025, 1, 31)));
        assert!(!january.contains(date(2025, 2, 1)));
        assert!(DateRange::default().contains(date(1999, 12, 31)));
    }

    #[test]
    fn movement_filter_matches_invoice_reference() {
        let invoice = InvoiceId::generate();
        let product = ProductId::generate();
        let linked = test_movement(MovementType::Invoice, Some(invoice.into()));
        let manual = test_movement(MovementType::Adjustment, None);

        let filter = MovementFilter::for_invoice(invoice);
        assert!(filter.matches(product, &linked));
        assert!(!filter.matches(product, &manual));
        assert!(!MovementFilter::for_product(ProductId::generate()).matches(product, &linked));
    }
}
