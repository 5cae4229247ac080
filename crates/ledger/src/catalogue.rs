//! Products, the stock-movement journal, and catalogue reports.

use serde_json::Value as JsonValue;

use medledger_core::{Aggregate, AggregateRoot, DomainError, Money};
use medledger_events::{EventBus, EventEnvelope};
use medledger_infra::command_dispatcher::DispatchError;
use medledger_infra::event_store::EventStore;
use medledger_inventory::{
    ChangePrice, InventoryCommand, InventoryEvent, MovementId, MovementType, Product,
    ProductDetails, ProductId, ReconciliationReport, RecordMovement, RegisterProduct,
    UpdateDetails, reconcile,
};
use medledger_invoicing::InvoiceId;

use crate::error::LedgerResult;
use crate::ledger::{Ledger, observe};
use crate::query::{LowStockEntry, MovementFilter, MovementRecord};

/// Catalogue entry to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub sku: String,
    pub details: ProductDetails,
    pub unit_price: Money,
    /// Journaled as an INITIAL movement when non-zero.
    pub opening_stock: i64,
}

/// A stock movement as requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRequest {
    pub product_id: ProductId,
    pub movement_type: MovementType,
    /// Signed delta.
    pub quantity: i64,
    pub invoice_id: Option<InvoiceId>,
    pub note: String,
    /// Stock the caller believes the product holds; mismatch is a conflict.
    pub expected_previous: Option<i64>,
    /// Overrides the configured negative-stock policy.
    pub allow_negative: Option<bool>,
}

impl MovementRequest {
    pub fn new(
        product_id: ProductId,
        movement_type: MovementType,
        quantity: i64,
        note: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            movement_type,
            quantity,
            invoice_id: None,
            note: note.into(),
            expected_previous: None,
            allow_negative: None,
        }
    }
}

impl<S, B> Ledger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Register a product. SKUs are unique (case-insensitive).
    pub fn register_product(&self, new: NewProduct) -> LedgerResult<Product> {
        observe("register_product", self.register_product_inner(new))
    }

    fn register_product_inner(&self, new: NewProduct) -> LedgerResult<Product> {
        let _catalogue = self.catalogue_guard()?;

        let sku = new.sku.trim().to_string();
        let taken = self
            .dispatcher()
            .load_all::<Product>()?
            .iter()
            .any(|p| p.sku().eq_ignore_ascii_case(&sku));
        if taken {
            return Err(DomainError::conflict(format!("sku {sku} is already registered")).into());
        }

        let product_id = ProductId::generate();
        let product: Product = self.dispatcher().dispatch(
            product_id,
            &InventoryCommand::RegisterProduct(RegisterProduct {
                product_id,
                sku,
                details: new.details,
                unit_price: new.unit_price,
                opening_stock: new.opening_stock,
                opening_movement_id: MovementId::generate(),
                occurred_at: self.now(),
            }),
        )?;

        tracing::info!(
            product_id = %product_id,
            sku = product.sku(),
            stock = product.stock_quantity(),
            "product registered"
        );
        Ok(product)
    }

    /// Append one movement to a product's journal and update its counter.
    pub fn record_movement(&self, request: MovementRequest) -> LedgerResult<Product> {
        observe("record_movement", self.record_movement_inner(request))
    }

    fn record_movement_inner(&self, request: MovementRequest) -> LedgerResult<Product> {
        let allow_negative = request
            .allow_negative
            .unwrap_or(self.config().inventory.allow_negative_stock);
        let product: Product = self.dispatcher().dispatch(
            request.product_id,
            &InventoryCommand::RecordMovement(RecordMovement {
                product_id: request.product_id,
                movement_id: MovementId::generate(),
                movement_type: request.movement_type,
                quantity: request.quantity,
                expected_previous: request.expected_previous,
                invoice_id: request.invoice_id.map(Into::into),
                note: request.note,
                allow_negative,
                occurred_at: self.now(),
            }),
        )?;

        tracing::info!(
            product_id = %request.product_id,
            movement_type = %request.movement_type,
            quantity = request.quantity,
            stock = product.stock_quantity(),
            "stock movement recorded"
        );
        Ok(product)
    }

    /// Change the catalogue price. Existing documents keep their snapshots.
    pub fn change_price(&self, product_id: ProductId, unit_price: Money) -> LedgerResult<Product> {
        let result = self
            .dispatcher()
            .dispatch::<Product>(
                product_id,
                &InventoryCommand::ChangePrice(ChangePrice {
                    product_id,
                    unit_price,
                    occurred_at: self.now(),
                }),
            )
            .map_err(Into::into);
        observe("change_price", result)
    }

    pub fn update_product_details(
        &self,
        product_id: ProductId,
        details: ProductDetails,
    ) -> LedgerResult<Product> {
        let result = self
            .dispatcher()
            .dispatch::<Product>(
                product_id,
                &InventoryCommand::UpdateDetails(UpdateDetails {
                    product_id,
                    details,
                    occurred_at: self.now(),
                }),
            )
            .map_err(Into::into);
        observe("update_product_details", result)
    }

    pub fn product(&self, product_id: ProductId) -> LedgerResult<Product> {
        self.existing(product_id, "product")
    }

    /// All products in registration order.
    pub fn products(&self) -> LedgerResult<Vec<Product>> {
        Ok(self.dispatcher().load_all()?)
    }

    /// Stock counter, verified against the journal.
    pub fn current_stock(&self, product_id: ProductId) -> LedgerResult<i64> {
        let product = self.product(product_id)?;
        observe("current_stock", product.ensure_integrity().map_err(Into::into))?;
        Ok(product.stock_quantity())
    }

    /// Replay the product's journal and compare it with the counter.
    pub fn reconcile_product(&self, product_id: ProductId) -> LedgerResult<ReconciliationReport> {
        let product = self.product(product_id)?;
        observe("reconcile_product", reconcile(&product).map_err(Into::into))
    }

    /// Reconcile every product; the first divergence is reported.
    pub fn reconcile_all(&self) -> LedgerResult<Vec<ReconciliationReport>> {
        self.products()?
            .iter()
            .map(|p| observe("reconcile_all", reconcile(p).map_err(Into::into)))
            .collect()
    }

    /// Products whose name or an alias equals `text`, ignoring case.
    pub fn find_products_by_alias(&self, text: &str) -> LedgerResult<Vec<Product>> {
        Ok(self
            .products()?
            .into_iter()
            .filter(|p| p.matches_alias(text))
            .collect())
    }

    pub fn low_stock_products(&self) -> LedgerResult<Vec<LowStockEntry>> {
        Ok(self
            .products()?
            .into_iter()
            .filter(Product::is_low_stock)
            .map(|p| LowStockEntry {
                product_id: *p.id(),
                sku: p.sku().to_string(),
                name: p.name().to_string(),
                stock_quantity: p.stock_quantity(),
                min_stock_level: p.details().min_stock_level,
                reorder_quantity: p.details().reorder_quantity,
            })
            .collect())
    }

    /// Journal entries matching `filter`, in commit order across all products.
    pub fn stock_movements(&self, filter: &MovementFilter) -> LedgerResult<Vec<MovementRecord>> {
        let events = self
            .dispatcher()
            .store()
            .load_by_type(Product::AGGREGATE_TYPE)
            .map_err(DispatchError::from)?;

        let mut records = Vec::new();
        for stored in events {
            if stored.event_type != "inventory.product.stock_movement_recorded" {
                continue;
            }
            let event: InventoryEvent = serde_json::from_value(stored.payload)
                .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
            if let InventoryEvent::StockMovementRecorded(recorded) = event {
                if filter.matches(recorded.product_id, &recorded.movement) {
                    records.push(MovementRecord {
                        product_id: recorded.product_id,
                        position: stored.global_position,
                        movement: recorded.movement,
                    });
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use medledger_infra::config::LedgerConfig;

    fn test_ledger() -> InMemoryLedger {
        InMemoryLedger::in_memory(LedgerConfig::default())
    }

    fn test_new_product(sku: &str, opening_stock: i64) -> NewProduct {
        NewProduct {
            sku: sku.into(),
            details: ProductDetails {
                name: "Nitrile Examination Gloves".into(),
                aliases: vec!["Nitrile Gloves".into(), "Exam Gloves".into()],
                unit: "box".into(),
                min_stock_level: 50,
                reorder_quantity: 200,
                ..ProductDetails::default()
            },
            unit_price: Money::from_minor(9500),
            opening_stock,
        }
    }

    #[test]
    fn duplicate_sku_is_a_conflict() {
        let ledger = test_ledger();
        ledger.register_product(test_new_product("MED-GLV-002", 10)).unwrap();

        let err = ledger
            .register_product(test_new_product("med-glv-002", 0))
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Conflict(_))));
        assert_eq!(ledger.products().unwrap().len(), 1);
    }

    #[test]
    fn insufficient_stock_leaves_counter_untouched() {
        let ledger = test_ledger();
        let product = ledger.register_product(test_new_product("MED-GLV-002", 10)).unwrap();
        let id = *product.id();

        let err = ledger
            .record_movement(MovementRequest::new(id, MovementType::Invoice, -12, "order"))
            .unwrap_err();

        assert!(matches!(
            err.domain(),
            Some(DomainError::InsufficientStock { available: 10, requested: -12 })
        ));
        assert_eq!(ledger.current_stock(id).unwrap(), 10);
    }

    #[test]
    fn configured_policy_allows_negative_stock() {
        let mut config = LedgerConfig::default();
        config.inventory.allow_negative_stock = true;
        let ledger = InMemoryLedger::in_memory(config);
        let id = *ledger
            .register_product(test_new_product("MED-GLV-002", 2))
            .unwrap()
            .id();

        let product = ledger
            .record_movement(MovementRequest::new(id, MovementType::Invoice, -5, "backorder"))
            .unwrap();
        assert_eq!(product.stock_quantity(), -3);
        assert_eq!(ledger.reconcile_product(id).unwrap().replayed_stock, -3);
    }

    #[test]
    fn alias_lookup_and_low_stock_report() {
        let ledger = test_ledger();
        let id = *ledger
            .register_product(test_new_product("MED-GLV-002", 40))
            .unwrap()
            .id();

        assert_eq!(ledger.find_products_by_alias("exam gloves").unwrap().len(), 1);
        assert!(ledger.find_products_by_alias("gloves").unwrap().is_empty());

        let report = ledger.low_stock_products().unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].product_id, id);
        assert_eq!(report[0].reorder_quantity, 200);
    }

    #[test]
    fn journal_inspection_spans_products_in_commit_order() {
        let ledger = test_ledger();
        let gloves = *ledger.register_product(test_new_product("MED-GLV-002", 10)).unwrap().id();
        let masks = *ledger.register_product(test_new_product("MED-MSK-004", 5)).unwrap().id();
        ledger
            .record_movement(MovementRequest::new(gloves, MovementType::Adjustment, -2, "damaged"))
            .unwrap();

        let all = ledger.stock_movements(&MovementFilter::default()).unwrap();
        let order: Vec<_> = all.iter().map(|r| r.product_id).collect();
        assert_eq!(order, vec![gloves, masks, gloves]);
        assert!(all.windows(2).all(|w| w[0].position < w[1].position));

        let adjustments = ledger
            .stock_movements(&MovementFilter {
                movement_type: Some(MovementType::Adjustment),
                ..MovementFilter::default()
            })
            .unwrap();
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].movement.new_stock, 8);
    }
}
