//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values
/// (`Money`, document totals, product snapshots). To "modify" one, build a new
/// one.
///
/// ```ignore
/// let a = Money::new(dec!(45.00));
/// let b = Money::new(dec!(45));
/// assert_eq!(a, b); // equal by value
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
