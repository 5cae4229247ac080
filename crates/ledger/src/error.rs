//! Boundary error returned by every ledger operation.

use thiserror::Error;

use medledger_core::DomainError;
use medledger_infra::command_dispatcher::DispatchError;
use medledger_infra::locks::LockPoisoned;
use medledger_infra::sequence::SequenceError;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

impl LedgerError {
    /// The business-rule rejection behind this error, if any.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            LedgerError::Dispatch(err) => err.domain(),
            LedgerError::Sequence(_) => None,
        }
    }

    /// Whether the caller may retry (possibly with corrected input).
    ///
    /// Integrity violations and infrastructure faults are not retryable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            LedgerError::Dispatch(DispatchError::Domain(err)) => err.is_recoverable(),
            LedgerError::Dispatch(DispatchError::Concurrency(_)) => true,
            _ => false,
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        LedgerError::Dispatch(DispatchError::Domain(value))
    }
}

impl From<LockPoisoned> for LedgerError {
    fn from(value: LockPoisoned) -> Self {
        LedgerError::Dispatch(DispatchError::Lock(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_violation_is_not_recoverable() {
        let err = LedgerError::from(DomainError::integrity("journal replays to 7, counter holds 8"));
        assert!(!err.is_recoverable());
        assert!(matches!(err.domain(), Some(DomainError::IntegrityViolation(_))));
    }

    #[test]
    fn business_rejections_are_recoverable() {
        let err = LedgerError::from(DomainError::InsufficientStock {
            available: 10,
            requested: -12,
        });
        assert!(err.is_recoverable());
        assert!(LedgerError::from(DispatchError::Concurrency("stale".into())).is_recoverable());
        assert!(!LedgerError::from(SequenceError::Poisoned).is_recoverable());
    }
}
