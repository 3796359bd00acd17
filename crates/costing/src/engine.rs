//! The costing engine facade.
//!
//! Owns the cost state (layer store + running averages), the configuration,
//! and the outbound record stores, and exposes the engine's entry points:
//! movement processing here, snapshot/comparison in `snapshot`, revaluation
//! in `revaluation`. Every entry point takes explicit tenant/product/location
//! identifiers; the engine holds no ambient context.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use stockcost_core::{
    CostingError, CostingResult, ExpectedVersion, LocationId, ProductId, TenantId,
};

use crate::average::AverageStore;
use crate::config::CostingConfig;
use crate::layer::{LayerStore, StockKey};
use crate::movement::{MovementKind, MovementLine, MovementOutcome, MovementState, ProcessedLines};
use crate::policy::{CostContext, Valuation, ValuationPolicy};
use crate::revaluation::{AdjustmentStore, InMemoryAdjustmentStore};
use crate::snapshot::{InMemoryValuationRecordStore, ValuationRecord, ValuationRecordStore};

/// Inventory costing and valuation engine.
///
/// The layer store and the running averages are the only mutable shared
/// state; both are mutated exclusively through their contracts, so the layer
/// invariants are enforced at a single choke point. Mutations against the
/// same (product, location) are serialized; different keys run in parallel.
pub struct CostingEngine {
    config: CostingConfig,
    layers: LayerStore,
    averages: AverageStore,
    records: Arc<dyn ValuationRecordStore>,
    adjustments: Arc<dyn AdjustmentStore>,
    processed: ProcessedLines,
}

impl CostingEngine {
    /// Engine with in-memory outbound stores (tests, single-process hosts).
    pub fn new(config: CostingConfig) -> Self {
        Self::with_stores(
            config,
            Arc::new(InMemoryValuationRecordStore::new()),
            Arc::new(InMemoryAdjustmentStore::new()),
        )
    }

    /// Engine writing valuation records and adjustments to host-supplied
    /// stores.
    pub fn with_stores(
        config: CostingConfig,
        records: Arc<dyn ValuationRecordStore>,
        adjustments: Arc<dyn AdjustmentStore>,
    ) -> Self {
        Self {
            config,
            layers: LayerStore::new(),
            averages: AverageStore::new(),
            records,
            adjustments,
            processed: ProcessedLines::new(),
        }
    }

    pub fn config(&self) -> &CostingConfig {
        &self.config
    }

    pub fn layers(&self) -> &LayerStore {
        &self.layers
    }

    pub fn averages(&self) -> &AverageStore {
        &self.averages
    }

    pub fn records(&self) -> &dyn ValuationRecordStore {
        self.records.as_ref()
    }

    pub fn adjustments(&self) -> &dyn AdjustmentStore {
        self.adjustments.as_ref()
    }

    pub(crate) fn cost_context(&self) -> CostContext<'_> {
        CostContext {
            layers: &self.layers,
            averages: &self.averages,
            records: self.records.as_ref(),
            config: &self.config,
        }
    }

    /// Current mutation version of a (product, location) cost state; feeds
    /// the `ExpectedVersion` check on `process_movement`.
    ///
    /// The version is that of the store the product's active policy mutates:
    /// the layer bucket for FIFO/LIFO, the running-average bucket otherwise.
    pub fn state_version(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        location_id: LocationId,
    ) -> u64 {
        let key = StockKey::new(tenant_id, product_id, location_id);
        if self.config.policy_for(product_id).is_layer_based() {
            self.layers.version(key)
        } else {
            self.averages.version(key)
        }
    }

    /// On-hand valuation under the product's active policy. Read-only.
    pub fn value_on_hand(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Valuation {
        let key = StockKey::new(tenant_id, product_id, location_id);
        self.config
            .policy_for(product_id)
            .value_on_hand(&self.cost_context(), key)
    }

    /// All (product, location) keys of a tenant with cost state.
    pub(crate) fn stock_keys(&self, tenant_id: TenantId) -> Vec<StockKey> {
        let mut keys = self.layers.keys(tenant_id);
        for key in self.averages.keys(tenant_id) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// React to one completed stock-movement line.
    ///
    /// Rejects lines that are not `Done`, lines already processed
    /// (`AlreadyProcessed`), and version mismatches (`Conflict`; the caller
    /// rereads and retries). The mutation is a single atomic unit: a rejected
    /// line leaves no cost state behind. `expected` guards the bucket the
    /// line mutates (the source bucket for internal transfers) and is
    /// verified inside that store's write lock, together with the mutation.
    pub fn process_movement(
        &self,
        line: &MovementLine,
        expected: ExpectedVersion,
    ) -> CostingResult<MovementOutcome> {
        if line.state != MovementState::Done {
            return Err(CostingError::validation(format!(
                "only done movement lines are costed (line {} is {:?})",
                line.line_id, line.state
            )));
        }
        if line.quantity <= Decimal::ZERO {
            return Err(CostingError::InvalidQuantity(line.quantity));
        }

        let policy = self.config.policy_for(line.product_id);
        self.processed.claim(line.tenant_id, line.line_id)?;
        match self.apply_done_line(line, policy, expected) {
            Ok(outcome) => {
                if outcome.shortfall > Decimal::ZERO {
                    warn!(
                        line = %line.line_id,
                        product = %line.product_id,
                        shortfall = %outcome.shortfall,
                        "movement consumed more than open cost state covers"
                    );
                }
                debug!(
                    line = %line.line_id,
                    policy = %policy,
                    realized_unit_cost = %outcome.realized_unit_cost,
                    "movement line costed"
                );
                Ok(outcome)
            }
            Err(e) => {
                // Nothing was mutated; free the line id for a corrected retry.
                self.processed.release(line.tenant_id, line.line_id);
                Err(e)
            }
        }
    }

    fn apply_done_line(
        &self,
        line: &MovementLine,
        policy: ValuationPolicy,
        expected: ExpectedVersion,
    ) -> CostingResult<MovementOutcome> {
        match line.kind {
            MovementKind::Incoming { location } => {
                let unit_cost = line.unit_cost.ok_or_else(|| {
                    CostingError::validation("incoming movement requires a unit cost")
                })?;
                if unit_cost < Decimal::ZERO {
                    return Err(CostingError::InvalidCost(unit_cost));
                }
                let key = StockKey::new(line.tenant_id, line.product_id, location);
                let realized = self.receive(key, policy, line, unit_cost, expected)?;
                self.append_movement_record(line, policy, key);
                Ok(MovementOutcome {
                    line_id: line.line_id,
                    policy,
                    realized_unit_cost: realized,
                    consumed_value: Decimal::ZERO,
                    shortfall: Decimal::ZERO,
                })
            }
            MovementKind::Outgoing { location } => {
                let key = StockKey::new(line.tenant_id, line.product_id, location);
                let outcome =
                    policy.consume(&self.cost_context(), key, line.quantity, expected)?;
                self.append_movement_record(line, policy, key);
                Ok(MovementOutcome {
                    line_id: line.line_id,
                    policy,
                    realized_unit_cost: outcome.realized_unit_cost(),
                    consumed_value: outcome.total_value(),
                    shortfall: outcome.shortfall,
                })
            }
            MovementKind::Internal {
                source,
                destination,
            } => {
                // Outgoing leg against the source, then an incoming leg at the
                // destination booked at the realized cost. The destination
                // never invents a cost of its own. The caller's expectation
                // guards the source bucket only.
                let source_key = StockKey::new(line.tenant_id, line.product_id, source);
                let outcome =
                    policy.consume(&self.cost_context(), source_key, line.quantity, expected)?;
                let realized = outcome.realized_unit_cost();

                let dest_key = StockKey::new(line.tenant_id, line.product_id, destination);
                self.receive(dest_key, policy, line, realized, ExpectedVersion::Any)?;

                self.append_movement_record(line, policy, source_key);
                self.append_movement_record(line, policy, dest_key);
                Ok(MovementOutcome {
                    line_id: line.line_id,
                    policy,
                    realized_unit_cost: realized,
                    consumed_value: outcome.total_value(),
                    shortfall: outcome.shortfall,
                })
            }
        }
    }

    /// Book a receipt into cost state; returns the realized unit cost.
    fn receive(
        &self,
        key: StockKey,
        policy: ValuationPolicy,
        line: &MovementLine,
        unit_cost: Decimal,
        expected: ExpectedVersion,
    ) -> CostingResult<Decimal> {
        match policy {
            ValuationPolicy::Fifo | ValuationPolicy::Lifo => {
                self.layers.add_layer(
                    key,
                    line.lot_key.clone(),
                    unit_cost,
                    line.quantity,
                    line.effective_date,
                    expected,
                )?;
                Ok(unit_cost)
            }
            ValuationPolicy::WeightedAverage | ValuationPolicy::MovingAverage => {
                self.averages.receive(key, line.quantity, unit_cost, expected)?;
                Ok(unit_cost)
            }
            ValuationPolicy::StandardCost => {
                // Cost is fixed externally; only the quantity mirror moves.
                self.averages.add_quantity(key, line.quantity, expected)?;
                Ok(self.config.shortfall_unit_cost(key.product_id))
            }
        }
    }

    /// Append a movement-linked valuation record for the affected key.
    ///
    /// These ad-hoc records are what Moving Average re-reads as "the most
    /// recently persisted cost".
    fn append_movement_record(&self, line: &MovementLine, policy: ValuationPolicy, key: StockKey) {
        // Receipts recompute the running average; the record persists that
        // recomputation. Reading it back through the Moving Average policy
        // here would freeze the previous record's cost instead.
        let basis = if policy == ValuationPolicy::MovingAverage {
            ValuationPolicy::WeightedAverage
        } else {
            policy
        };
        let valuation = basis.value_on_hand(&self.cost_context(), key);
        self.records.upsert(ValuationRecord {
            tenant_id: key.tenant_id,
            product_id: key.product_id,
            location_id: key.location_id,
            policy,
            as_of: line.effective_date.date_naive(),
            quantity: valuation.quantity,
            unit_cost: valuation.unit_cost,
            total_value: valuation.total_value,
            movement_line_id: Some(line.line_id),
            recorded_at: Utc::now(),
        });
        info!(
            line = %line.line_id,
            product = %key.product_id,
            location = %key.location_id,
            policy = %policy,
            quantity = %valuation.quantity,
            total_value = %valuation.total_value,
            "valuation record appended"
        );
    }
}
