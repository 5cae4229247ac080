use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medledger_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, Money, typed_id,
};
use medledger_events::Event;

use crate::movement::{MovementId, MovementType, StockMovement};

typed_id!(
    /// Product identifier.
    ProductId(AggregateId)
);

/// Descriptive product fields that can change without touching stock or price.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductDetails {
    pub name: String,
    /// Alternative names used by clients (brand names, abbreviations).
    pub aliases: Vec<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Unit of measure, e.g. "box", "pack", "piece".
    pub unit: String,
    pub min_stock_level: i64,
    pub reorder_quantity: i64,
}

impl ProductDetails {
    fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if self.unit.trim().is_empty() {
            return Err(DomainError::validation("unit of measure cannot be empty"));
        }
        if self.aliases.iter().any(|a| a.trim().is_empty()) {
            return Err(DomainError::validation("aliases cannot be empty"));
        }
        if self.min_stock_level < 0 {
            return Err(DomainError::validation("minimum stock level cannot be negative"));
        }
        if self.reorder_quantity < 0 {
            return Err(DomainError::validation("reorder quantity cannot be negative"));
        }
        Ok(())
    }
}

/// Aggregate root: Product.
///
/// Owns the stock-movement journal. `stock_quantity` is the denormalized
/// counter; it only changes through [`StockMovementRecorded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    sku: String,
    details: ProductDetails,
    unit_price: Money,
    stock_quantity: i64,
    movements: Vec<StockMovement>,
    /// Set when an applied movement does not chain onto the counter.
    integrity_fault: Option<String>,
    version: u64,
    created: bool,
}

impl Product {
    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.details.name
    }

    pub fn details(&self) -> &ProductDetails {
        &self.details
    }

    pub fn unit(&self) -> &str {
        &self.details.unit
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn stock_quantity(&self) -> i64 {
        self.stock_quantity
    }

    /// Journal entries in creation order.
    pub fn movements(&self) -> &[StockMovement] {
        &self.movements
    }

    pub fn integrity_fault(&self) -> Option<&str> {
        self.integrity_fault.as_deref()
    }

    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.details.min_stock_level
    }

    /// Case-insensitive exact match against the name or any alias.
    pub fn matches_alias(&self, text: &str) -> bool {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        core::iter::once(&self.details.name)
            .chain(self.details.aliases.iter())
            .any(|candidate| candidate.trim().to_lowercase() == needle)
    }

    /// Fails with `IntegrityViolation` if the counter no longer agrees with the
    /// journal. Never repaired here.
    pub fn ensure_integrity(&self) -> DomainResult<()> {
        if let Some(fault) = &self.integrity_fault {
            return Err(DomainError::integrity(fault.clone()));
        }
        let journal = crate::journal::replay(&self.movements)?;
        if journal != self.stock_quantity {
            return Err(DomainError::integrity(format!(
                "product {}: journal replays to {journal}, counter holds {}",
                self.id, self.stock_quantity
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterProduct.
///
/// A non-zero `opening_stock` is journaled as an INITIAL movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProduct {
    pub product_id: ProductId,
    pub sku: String,
    pub details: ProductDetails,
    pub unit_price: Money,
    pub opening_stock: i64,
    pub opening_movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub product_id: ProductId,
    pub movement_id: MovementId,
    pub movement_type: MovementType,
    pub quantity: i64,
    /// Stock the caller based its decision on; `None` skips the check.
    pub expected_previous: Option<i64>,
    pub invoice_id: Option<AggregateId>,
    pub note: String,
    pub allow_negative: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangePrice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePrice {
    pub product_id: ProductId,
    pub unit_price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateDetails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDetails {
    pub product_id: ProductId,
    pub details: ProductDetails,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    RegisterProduct(RegisterProduct),
    RecordMovement(RecordMovement),
    ChangePrice(ChangePrice),
    UpdateDetails(UpdateDetails),
}

/// Event: ProductRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRegistered {
    pub product_id: ProductId,
    pub sku: String,
    pub details: ProductDetails,
    pub unit_price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockMovementRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovementRecorded {
    pub product_id: ProductId,
    pub movement: StockMovement,
}

/// Event: PriceChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChanged {
    pub product_id: ProductId,
    pub previous_price: Money,
    pub unit_price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DetailsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsUpdated {
    pub product_id: ProductId,
    pub details: ProductDetails,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    ProductRegistered(ProductRegistered),
    StockMovementRecorded(StockMovementRecorded),
    PriceChanged(PriceChanged),
    DetailsUpdated(DetailsUpdated),
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ProductRegistered(_) => "inventory.product.registered",
            InventoryEvent::StockMovementRecorded(_) => "inventory.product.stock_movement_recorded",
            InventoryEvent::PriceChanged(_) => "inventory.product.price_changed",
            InventoryEvent::DetailsUpdated(_) => "inventory.product.details_updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::ProductRegistered(e) => e.occurred_at,
            InventoryEvent::StockMovementRecorded(e) => e.movement.created_at,
            InventoryEvent::PriceChanged(e) => e.occurred_at,
            InventoryEvent::DetailsUpdated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    const AGGREGATE_TYPE: &'static str = "inventory.product";

    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn empty(id: ProductId) -> Self {
        Self {
            id,
            sku: String::new(),
            details: ProductDetails::default(),
            unit_price: Money::ZERO,
            stock_quantity: 0,
            movements: Vec::new(),
            integrity_fault: None,
            version: 0,
            created: false,
        }
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::ProductRegistered(e) => {
                self.id = e.product_id;
                self.sku = e.sku.clone();
                self.details = e.details.clone();
                self.unit_price = e.unit_price;
                self.stock_quantity = 0;
                self.created = true;
            }
            InventoryEvent::StockMovementRecorded(e) => {
                let m = &e.movement;
                if self.integrity_fault.is_none()
                    && (m.previous_stock != self.stock_quantity || !m.is_balanced())
                {
                    self.integrity_fault = Some(format!(
                        "movement {} ({} {:+}) recorded previous stock {} -> {}, counter was {}",
                        m.id,
                        m.movement_type,
                        m.quantity,
                        m.previous_stock,
                        m.new_stock,
                        self.stock_quantity
                    ));
                }
                self.stock_quantity = m.new_stock;
                self.movements.push(m.clone());
            }
            InventoryEvent::PriceChanged(e) => {
                self.unit_price = e.unit_price;
            }
            InventoryEvent::DetailsUpdated(e) => {
                self.details = e.details.clone();
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::RegisterProduct(cmd) => self.handle_register(cmd),
            InventoryCommand::RecordMovement(cmd) => self.handle_record(cmd),
            InventoryCommand::ChangePrice(cmd) => self.handle_change_price(cmd),
            InventoryCommand::UpdateDetails(cmd) => self.handle_update_details(cmd),
        }
    }
}

impl Product {
    fn ensure_exists(&self, product_id: ProductId) -> DomainResult<()> {
        if !self.created || self.id != product_id {
            return Err(DomainError::not_found("product", product_id));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterProduct) -> DomainResult<Vec<InventoryEvent>> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "product {} already exists",
                cmd.product_id
            )));
        }
        if cmd.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        cmd.details.validate()?;
        if cmd.unit_price.is_negative() {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        MovementType::Initial.validate_quantity(cmd.opening_stock)?;

        let mut events = vec![InventoryEvent::ProductRegistered(ProductRegistered {
            product_id: cmd.product_id,
            sku: cmd.sku.trim().to_string(),
            details: cmd.details.clone(),
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })];

        if cmd.opening_stock > 0 {
            events.push(InventoryEvent::StockMovementRecorded(StockMovementRecorded {
                product_id: cmd.product_id,
                movement: StockMovement {
                    id: cmd.opening_movement_id,
                    movement_type: MovementType::Initial,
                    quantity: cmd.opening_stock,
                    previous_stock: 0,
                    new_stock: cmd.opening_stock,
                    invoice_id: None,
                    note: "opening stock".to_string(),
                    created_at: cmd.occurred_at,
                },
            }));
        }

        Ok(events)
    }

    fn handle_record(&self, cmd: &RecordMovement) -> DomainResult<Vec<InventoryEvent>> {
        self.ensure_exists(cmd.product_id)?;
        self.ensure_integrity()?;
        cmd.movement_type.validate_quantity(cmd.quantity)?;

        if cmd.movement_type == MovementType::Initial && !self.movements.is_empty() {
            return Err(DomainError::validation(
                "INITIAL movement is only allowed as the first journal entry",
            ));
        }

        let previous_stock = self.stock_quantity;
        if let Some(expected) = cmd.expected_previous {
            if expected != previous_stock {
                return Err(DomainError::conflict(format!(
                    "product {}: expected previous stock {expected}, found {previous_stock}",
                    self.id
                )));
            }
        }

        let new_stock = previous_stock
            .checked_add(cmd.quantity)
            .ok_or_else(|| DomainError::validation("stock quantity overflow"))?;

        if cmd.quantity < 0 && new_stock < 0 && !cmd.allow_negative {
            return Err(DomainError::InsufficientStock {
                available: previous_stock,
                requested: cmd.quantity,
            });
        }

        Ok(vec![InventoryEvent::StockMovementRecorded(
            StockMovementRecorded {
                product_id: cmd.product_id,
                movement: StockMovement {
                    id: cmd.movement_id,
                    movement_type: cmd.movement_type,
                    quantity: cmd.quantity,
                    previous_stock,
                    new_stock,
                    invoice_id: cmd.invoice_id,
                    note: cmd.note.clone(),
                    created_at: cmd.occurred_at,
                },
            },
        )])
    }

    fn handle_change_price(&self, cmd: &ChangePrice) -> DomainResult<Vec<InventoryEvent>> {
        self.ensure_exists(cmd.product_id)?;
        if cmd.unit_price.is_negative() {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        Ok(vec![InventoryEvent::PriceChanged(PriceChanged {
            product_id: cmd.product_id,
            previous_price: self.unit_price,
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_details(&self, cmd: &UpdateDetails) -> DomainResult<Vec<InventoryEvent>> {
        self.ensure_exists(cmd.product_id)?;
        cmd.details.validate()?;
        Ok(vec![InventoryEvent::DetailsUpdated(DetailsUpdated {
            product_id: cmd.product_id,
            details: cmd.details.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
