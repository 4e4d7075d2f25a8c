//! Engine error model.

use thiserror::Error;

/// Result type used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine-level error taxonomy.
///
/// Every failure inside an atomic scope aborts the whole scope; nothing is
/// partially committed. `TransactionAborted` is the only variant eligible for
/// automatic retry: it signals transient datastore contention, not a business
/// violation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A referenced subject or document is missing or belongs to another tenant.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input (non-positive quantity, same-account transfer,
    /// zero-delta adjustment, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An order line asked for more units than the product has on hand.
    #[error("insufficient stock for product {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    /// An account movement would push the balance below its credit limit.
    #[error("insufficient balance on account {account}: available {available}, requested {requested}")]
    InsufficientBalance {
        account: String,
        available: String,
        requested: String,
    },

    /// The document is not in a state that permits the requested operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A status transition outside the order lifecycle table.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Duplicate ledger append for the same (document, subject, kind) tuple.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Datastore-level serialization failure. Safe to retry.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// Unexpected infrastructure failure. Details are logged, not exposed.
    #[error("internal error")]
    Internal,
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::TransactionAborted(msg.into())
    }

    /// Whether the operation may be re-run as-is.
    ///
    /// Business-rule violations are deterministic and must surface to the
    /// caller; only transient contention conflicts qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionAborted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_aborted_transactions_are_retryable() {
        assert!(EngineError::aborted("serialization failure").is_retryable());
        assert!(!EngineError::not_found("subject").is_retryable());
        assert!(!EngineError::conflict("duplicate entry").is_retryable());
        assert!(!EngineError::Internal.is_retryable());
    }
}
