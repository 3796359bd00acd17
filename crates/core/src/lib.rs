//! `stockcost-core` — costing domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, the engine's error taxonomy, money rounding,
//! and the optimistic-concurrency version check.

pub mod error;
pub mod id;
pub mod money;
pub mod version;

pub use error::{CostingError, CostingResult};
pub use id::{AdjustmentId, LayerId, LocationId, MovementLineId, ProductId, TenantId, UserId};
pub use money::{DEFAULT_MONEY_PRECISION, round_money};
pub use version::ExpectedVersion;
