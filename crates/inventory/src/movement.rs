use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medledger_core::{AggregateId, DomainError, DomainResult, Entity, EntityId, typed_id};

typed_id!(
    /// Stock movement identifier.
    MovementId(EntityId)
);

/// Cause of a stock change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Opening balance; only valid as the first movement of a product.
    Initial,
    /// Outbound delivery against an invoice.
    Invoice,
    /// Manual correction in either direction.
    Adjustment,
    /// Goods coming back (e.g. a cancelled invoice).
    Return,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Initial => "INITIAL",
            MovementType::Invoice => "INVOICE",
            MovementType::Adjustment => "ADJUSTMENT",
            MovementType::Return => "RETURN",
        }
    }

    /// Check the sign of a quantity delta against the movement type.
    pub fn validate_quantity(&self, quantity: i64) -> DomainResult<()> {
        let ok = match self {
            MovementType::Initial => quantity >= 0,
            MovementType::Invoice => quantity < 0,
            MovementType::Adjustment => quantity != 0,
            MovementType::Return => quantity > 0,
        };
        if ok {
            Ok(())
        } else {
            Err(DomainError::validation(format!(
                "quantity {quantity} is not valid for a {} movement",
                self.as_str()
            )))
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable journal entry.
///
/// `new_stock == previous_stock + quantity`, and `previous_stock` equals the
/// product's stock immediately before the movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub movement_type: MovementType,
    /// Signed quantity delta.
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    /// Invoice that caused the movement, if any.
    pub invoice_id: Option<AggregateId>,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn is_outbound(&self) -> bool {
        self.quantity < 0
    }

    /// Whether `new_stock` follows from `previous_stock` and the delta.
    pub fn is_balanced(&self) -> bool {
        self.previous_stock.checked_add(self.quantity) == Some(self.new_stock)
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_sign_follows_movement_type() {
        assert!(MovementType::Initial.validate_quantity(0).is_ok());
        assert!(MovementType::Initial.validate_quantity(-1).is_err());
        assert!(MovementType::Invoice.validate_quantity(-5).is_ok());
        assert!(MovementType::Invoice.validate_quantity(5).is_err());
        assert!(MovementType::Adjustment.validate_quantity(-2).is_ok());
        assert!(MovementType::Adjustment.validate_quantity(0).is_err());
        assert!(MovementType::Return.validate_quantity(3).is_ok());
        assert!(MovementType::Return.validate_quantity(-3).is_err());
    }

    #[test]
    fn balanced_movement_chains_previous_and_new() {
        let movement = StockMovement {
            id: MovementId::generate(),
            movement_type: MovementType::Adjustment,
            quantity: -2,
            previous_stock: 10,
            new_stock: 8,
            invoice_id: None,
            note: "damaged in transit".into(),
            created_at: Utc::now(),
        };
        assert!(movement.is_balanced());
        assert!(movement.is_outbound());
        assert_eq!(movement.movement_type.to_string(), "ADJUSTMENT");
    }
}
