//! Document totals arithmetic shared by quotes and invoices.
//!
//! Totals are derived state: `recompute` is the only way to obtain them, and
//! every item mutation calls it before emitting its event.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::money::Money;
use crate::value_object::ValueObject;

/// Derived totals of a priced document.
///
/// `total = subtotal + subtotal × tax_rate − discount`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub subtotal: Money,
    /// Fraction, e.g. `0.15` for 15 %.
    pub tax_rate: Decimal,
    pub tax_amount: Money,
    pub discount: Money,
    pub total: Money,
}

impl ValueObject for DocumentTotals {}

impl DocumentTotals {
    /// Recompute totals from line totals, a tax rate and a discount.
    ///
    /// Pure and idempotent. Rejects negative tax rates, negative discounts and a
    /// discount larger than the taxed subtotal.
    pub fn recompute<I>(line_totals: I, tax_rate: Decimal, discount: Money) -> DomainResult<Self>
    where
        I: IntoIterator<Item = Money>,
    {
        validate_tax_rate(tax_rate)?;
        if discount.is_negative() {
            return Err(DomainError::validation("discount cannot be negative"));
        }

        let mut subtotal = Money::ZERO;
        for line in line_totals {
            subtotal = subtotal
                .checked_add(line)
                .ok_or_else(|| DomainError::validation("subtotal overflow"))?;
        }

        let tax_amount = subtotal
            .checked_scale(tax_rate)
            .ok_or_else(|| DomainError::validation("tax amount overflow"))?;
        let total = subtotal
            .checked_add(tax_amount)
            .and_then(|gross| gross.checked_sub(discount))
            .ok_or_else(|| DomainError::validation("total overflow"))?;

        if total.is_negative() {
            return Err(DomainError::validation(format!(
                "discount {discount} exceeds taxed subtotal {}",
                subtotal + tax_amount
            )));
        }

        Ok(Self {
            subtotal,
            tax_rate,
            tax_amount,
            discount,
            total,
        })
    }
}

/// Line total: `quantity × unit_price`. Quantity must be positive.
pub fn line_total(quantity: i64, unit_price: Money) -> DomainResult<Money> {
    if quantity <= 0 {
        return Err(DomainError::validation("line quantity must be positive"));
    }
    if unit_price.is_negative() {
        return Err(DomainError::validation("unit price cannot be negative"));
    }
    unit_price
        .checked_times(quantity)
        .ok_or_else(|| DomainError::validation("line total overflow"))
}

/// Tax rates are fractions in `[0, 1]`.
pub fn validate_tax_rate(tax_rate: Decimal) -> DomainResult<()> {
    if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE {
        return Err(DomainError::validation(format!(
            "tax rate must be between 0 and 1, got {tax_rate}"
        )));
    }
    Ok(())
}
