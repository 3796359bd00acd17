//! Manual cost revaluation with an immutable audit trail.
//!
//! A revaluation bypasses the movement path: it overrides the unit cost of a
//! (product, location) and, in the same operation, posts an adjustment
//! document recording the monetary delta. Posted adjustments are never
//! updated or deleted; corrections are made by posting a new adjustment.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use stockcost_core::{
    AdjustmentId, CostingError, CostingResult, ExpectedVersion, LocationId, ProductId, TenantId,
    UserId, round_money,
};

use crate::engine::CostingEngine;
use crate::layer::StockKey;
use crate::policy::ValuationPolicy;
use crate::snapshot::ValuationRecord;

/// Kind of manual correction being posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    Revaluation,
    Correction,
    WriteOff,
    WriteUp,
}

/// One corrected (product, location) within an adjustment document.
///
/// `adjustment_amount` is always derived from the other fields at
/// construction; it can never be supplied independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostAdjustmentLine {
    pub product_id: ProductId,
    pub location_id: LocationId,
    /// On-hand quantity at the time of the adjustment.
    pub quantity: Decimal,
    pub old_unit_cost: Decimal,
    pub new_unit_cost: Decimal,
    adjustment_amount: Decimal,
}

impl CostAdjustmentLine {
    pub fn new(
        product_id: ProductId,
        location_id: LocationId,
        quantity: Decimal,
        old_unit_cost: Decimal,
        new_unit_cost: Decimal,
        money_precision: u32,
    ) -> Self {
        Self {
            product_id,
            location_id,
            quantity,
            old_unit_cost,
            new_unit_cost,
            adjustment_amount: round_money((new_unit_cost - old_unit_cost) * quantity, money_precision),
        }
    }

    /// `(new_unit_cost - old_unit_cost) * quantity`, rounded.
    pub fn adjustment_amount(&self) -> Decimal {
        self.adjustment_amount
    }
}

/// Auditable manual correction document (header + lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostAdjustment {
    pub id: AdjustmentId,
    pub tenant_id: TenantId,
    pub reference: String,
    pub adjustment_type: AdjustmentType,
    pub date: DateTime<Utc>,
    pub description: Option<String>,
    pub reason: String,
    pub author: UserId,
    pub posted: bool,
    pub posted_at: Option<DateTime<Utc>>,
    pub lines: Vec<CostAdjustmentLine>,
}

/// Outbound store contract for adjustment documents. Append-only.
pub trait AdjustmentStore: Send + Sync {
    fn append(&self, adjustment: CostAdjustment);
    fn get(&self, tenant_id: TenantId, id: AdjustmentId) -> Option<CostAdjustment>;
    fn list(&self, tenant_id: TenantId) -> Vec<CostAdjustment>;
}

impl<S> AdjustmentStore for Arc<S>
where
    S: AdjustmentStore + ?Sized,
{
    fn append(&self, adjustment: CostAdjustment) {
        (**self).append(adjustment)
    }

    fn get(&self, tenant_id: TenantId, id: AdjustmentId) -> Option<CostAdjustment> {
        (**self).get(tenant_id, id)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<CostAdjustment> {
        (**self).list(tenant_id)
    }
}

/// In-memory adjustment store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAdjustmentStore {
    inner: RwLock<HashMap<(TenantId, AdjustmentId), CostAdjustment>>,
}

impl InMemoryAdjustmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AdjustmentStore for InMemoryAdjustmentStore {
    fn append(&self, adjustment: CostAdjustment) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((adjustment.tenant_id, adjustment.id), adjustment);
        }
    }

    fn get(&self, tenant_id: TenantId, id: AdjustmentId) -> Option<CostAdjustment> {
        self.inner.read().ok()?.get(&(tenant_id, id)).cloned()
    }

    fn list(&self, tenant_id: TenantId) -> Vec<CostAdjustment> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        map.values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

/// Manual override of a (product, location)'s unit cost.
///
/// `author` is optional only because hosts may fail to supply it; the engine
/// then fails closed with `MissingAuthor` instead of attributing the audit
/// record to a defaulted system user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevaluationRequest {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub new_unit_cost: Decimal,
    pub reason: String,
    pub author: Option<UserId>,
    pub adjustment_type: AdjustmentType,
    pub description: Option<String>,
}

impl RevaluationRequest {
    pub fn new(
        tenant_id: TenantId,
        product_id: ProductId,
        location_id: LocationId,
        new_unit_cost: Decimal,
        reason: impl Into<String>,
        author: Option<UserId>,
    ) -> Self {
        Self {
            tenant_id,
            product_id,
            location_id,
            new_unit_cost,
            reason: reason.into(),
            author,
            adjustment_type: AdjustmentType::Revaluation,
            description: None,
        }
    }
}

impl CostingEngine {
    /// Revalue a (product, location) to `new_unit_cost`.
    ///
    /// Reads the current valuation under the active policy, posts an
    /// adjustment with the derived delta, and rewrites the live cost state
    /// (all open layers, or the running average) in one operation. Under
    /// Moving Average the override is also persisted as a valuation record,
    /// which is where that policy reads its current cost from. Quantity is
    /// never touched. Returns `None` when the new cost equals the current
    /// one: nothing is posted and no state changes. A movement racing the
    /// revaluation surfaces as `Conflict`; the caller retries.
    pub fn revalue(&self, request: RevaluationRequest) -> CostingResult<Option<AdjustmentId>> {
        let author = request.author.ok_or(CostingError::MissingAuthor)?;
        if request.new_unit_cost < Decimal::ZERO {
            return Err(CostingError::InvalidCost(request.new_unit_cost));
        }
        if request.reason.trim().is_empty() {
            return Err(CostingError::validation("revaluation reason cannot be empty"));
        }

        let key = StockKey::new(request.tenant_id, request.product_id, request.location_id);
        let policy = self.config().policy_for(request.product_id);
        if policy == ValuationPolicy::StandardCost {
            return Err(CostingError::validation(
                "standard costs are maintained in master data, not by revaluation",
            ));
        }

        // A movement landing between this read and the rewrite below is a
        // conflict: the rewrite carries the version the valuation was read at.
        let seen = if policy.is_layer_based() {
            self.layers().version(key)
        } else {
            self.averages().version(key)
        };
        let valuation = policy.value_on_hand(&self.cost_context(), key);
        if valuation.quantity.is_zero() {
            return Err(CostingError::NothingToRevalue);
        }
        if request.new_unit_cost == valuation.unit_cost {
            return Ok(None);
        }

        let now = Utc::now();
        if policy.is_layer_based() {
            self.layers()
                .rewrite_unit_cost(key, request.new_unit_cost, ExpectedVersion::Exact(seen))?;
        } else {
            self.averages()
                .set_unit_cost(key, request.new_unit_cost, ExpectedVersion::Exact(seen))?;
            if policy == ValuationPolicy::MovingAverage {
                // Moving Average reads its cost from the latest persisted
                // record, so the override has to land there as well.
                self.records().upsert(ValuationRecord {
                    tenant_id: key.tenant_id,
                    product_id: key.product_id,
                    location_id: key.location_id,
                    policy,
                    as_of: now.date_naive(),
                    quantity: valuation.quantity,
                    unit_cost: request.new_unit_cost,
                    total_value: round_money(
                        valuation.quantity * request.new_unit_cost,
                        self.config().money_precision,
                    ),
                    movement_line_id: None,
                    recorded_at: now,
                });
            }
        }

        let id = AdjustmentId::new();
        let line = CostAdjustmentLine::new(
            request.product_id,
            request.location_id,
            valuation.quantity,
            valuation.unit_cost,
            request.new_unit_cost,
            self.config().money_precision,
        );
        let amount = line.adjustment_amount();
        self.adjustments().append(CostAdjustment {
            id,
            tenant_id: request.tenant_id,
            reference: format!("ADJ-{id}"),
            adjustment_type: request.adjustment_type,
            date: now,
            description: request.description,
            reason: request.reason,
            author,
            posted: true,
            posted_at: Some(now),
            lines: vec![line],
        });

        info!(
            tenant = %request.tenant_id,
            product = %request.product_id,
            location = %request.location_id,
            policy = %policy,
            %amount,
            "cost revaluation posted"
        );
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn line_amount_is_derived() {
        let line = CostAdjustmentLine::new(
            ProductId::new(),
            LocationId::new(),
            dec!(12),
            dec!(5.00),
            dec!(6.50),
            2,
        );
        assert_eq!(line.adjustment_amount(), dec!(18.00));
    }

    #[test]
    fn store_is_append_only_and_tenant_scoped() {
        let store = InMemoryAdjustmentStore::new();
        let tenant = TenantId::new();
        let id = AdjustmentId::new();
        store.append(CostAdjustment {
            id,
            tenant_id: tenant,
            reference: format!("ADJ-{id}"),
            adjustment_type: AdjustmentType::Revaluation,
            date: Utc::now(),
            description: None,
            reason: "test".to_string(),
            author: UserId::new(),
            posted: true,
            posted_at: Some(Utc::now()),
            lines: vec![],
        });

        assert!(store.get(tenant, id).is_some());
        assert!(store.get(TenantId::new(), id).is_none());
        assert_eq!(store.list(tenant).len(), 1);
    }
}
