//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Business-rule failures (`InsufficientStock`, `OverConversion`, `InvalidAmount`,
/// `InvalidTransition`) leave the aggregate untouched and may be retried with
/// corrected input. `IntegrityViolation` means the movement journal and the
/// denormalized state disagree; it is never corrected automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An outbound stock movement would drive stock below zero.
    #[error("insufficient stock: {available} available, movement of {requested}")]
    InsufficientStock { available: i64, requested: i64 },

    /// A conversion asked for more than the item's unconverted remainder.
    #[error("over-conversion of quote item {item}: {remaining} remaining, {requested} requested")]
    OverConversion {
        item: String,
        remaining: i64,
        requested: i64,
    },

    /// A monetary amount was rejected (non-positive payment, cancelled invoice).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// An illegal status change was requested.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// A multi-item conversion was rolled back as a whole.
    #[error("conversion aborted: {0}")]
    ConversionAborted(String),

    /// Stored state diverges from the movement journal.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// A uniqueness or concurrency conflict.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl core::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn invalid_transition(from: impl core::fmt::Display, to: impl core::fmt::Display) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn conversion_aborted(msg: impl Into<String>) -> Self {
        Self::ConversionAborted(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::IntegrityViolation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Whether the caller may retry with corrected input.
    ///
    /// Integrity faults must propagate to an operator instead.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::IntegrityViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_integrity_violations_are_fatal() {
        assert!(!DomainError::integrity("journal diverged").is_recoverable());
        assert!(DomainError::InsufficientStock { available: 10, requested: -12 }.is_recoverable());
        assert!(DomainError::invalid_transition("PAID", "CANCELLED").is_recoverable());
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = DomainError::not_found("product", "abc");
        assert_eq!(err.to_string(), "product not found: abc");
    }
}
