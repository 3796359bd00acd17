//! Costing error model.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::id::MovementLineId;

/// Result type used across the costing engine.
pub type CostingResult<T> = Result<T, CostingError>;

/// Engine-level error.
///
/// Keep this focused on deterministic, recoverable failures (validation,
/// idempotency, concurrency). A layer shortfall is deliberately **not** an
/// error: the movement ledger decides whether negative stock is permitted,
/// so shortfall travels as data on the consumption result instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CostingError {
    /// Caller supplied a non-positive quantity to a mutating entry point.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(Decimal),

    /// Caller supplied a negative unit cost.
    #[error("invalid cost: {0}")]
    InvalidCost(Decimal),

    /// Movement line already contributed to cost state (idempotency guard).
    #[error("movement line already processed: {0}")]
    AlreadyProcessed(MovementLineId),

    /// Revaluation requested against a product/location with zero on-hand
    /// quantity.
    #[error("nothing to revalue: no on-hand quantity")]
    NothingToRevalue,

    /// Revaluation request without an author. The engine fails closed here;
    /// audit records must never be attributed to a defaulted system user.
    #[error("missing author on revaluation request")]
    MissingAuthor,

    /// Two writers raced on the same (product, location) cost state. The
    /// loser must retry; nothing was partially applied.
    #[error("concurrent mutation conflict: {0}")]
    Conflict(String),

    /// A value failed validation (e.g. malformed input, wrong movement state).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CostingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
