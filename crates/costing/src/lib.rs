//! `stockcost-costing` — inventory costing and valuation engine.
//!
//! Assigns a monetary cost to every unit of stock as it moves through
//! receipts, issues, internal transfers, and manual adjustments, under a
//! selectable valuation policy (FIFO, LIFO, Weighted Average, Moving Average,
//! Standard Cost).
//!
//! The engine is a pure library: it reacts to completed stock movements and
//! produces valuation numbers plus layer/adjustment records. It has no
//! network or storage surface of its own; the host application persists the
//! records through the [`ValuationRecordStore`] and [`AdjustmentStore`]
//! traits.

pub mod average;
pub mod config;
pub mod engine;
pub mod layer;
pub mod movement;
pub mod policy;
pub mod revaluation;
pub mod snapshot;

pub use average::RunningAverageCost;
pub use config::CostingConfig;
pub use engine::CostingEngine;
pub use layer::{ConsumeOrder, CostLayer, LayerConsumption, LayerStore, StockKey};
pub use movement::{MovementKind, MovementLine, MovementOutcome, MovementState};
pub use policy::{ConsumeOutcome, Valuation, ValuationPolicy};
pub use revaluation::{
    AdjustmentStore, AdjustmentType, CostAdjustment, CostAdjustmentLine,
    InMemoryAdjustmentStore, RevaluationRequest,
};
pub use snapshot::{
    InMemoryValuationRecordStore, ValuationRecord, ValuationRecordStore, ValuationSummary,
};
