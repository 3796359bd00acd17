//! Valuation records and the snapshot service.
//!
//! A valuation record is an immutable, dated, policy-tagged snapshot of
//! `(quantity, unit_cost, total_value)` for one (product, location). Snapshot
//! runs persist one record per pair with on-hand quantity; ad-hoc
//! movement-linked records are appended by the movement processor. The engine
//! defines the shape and the store contract; the host decides the storage
//! technology.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use stockcost_core::{CostingResult, LocationId, MovementLineId, ProductId, TenantId};

use crate::engine::CostingEngine;
use crate::layer::StockKey;
use crate::policy::{Valuation, ValuationPolicy};

/// Immutable, dated valuation snapshot for one (product, location, policy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationRecord {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub policy: ValuationPolicy,
    /// Natural-key date: one record per (product, location, date, policy).
    pub as_of: NaiveDate,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    /// Set when the record was triggered by a specific movement line.
    pub movement_line_id: Option<MovementLineId>,
    pub recorded_at: DateTime<Utc>,
}

impl ValuationRecord {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.tenant_id, self.product_id, self.location_id)
    }
}

/// Outbound store contract for valuation records.
///
/// `upsert` is keyed by (tenant, product, location, date, policy): rerunning a
/// snapshot for the same key overwrites rather than duplicates.
pub trait ValuationRecordStore: Send + Sync {
    fn upsert(&self, record: ValuationRecord);
    /// Most recent record for a (tenant, product, location), any policy.
    fn latest(&self, key: StockKey) -> Option<ValuationRecord>;
    /// Most recent record for a (tenant, product, location) under one policy.
    fn latest_for_policy(&self, key: StockKey, policy: ValuationPolicy) -> Option<ValuationRecord>;
    fn list(&self, tenant_id: TenantId) -> Vec<ValuationRecord>;
}

impl<S> ValuationRecordStore for Arc<S>
where
    S: ValuationRecordStore + ?Sized,
{
    fn upsert(&self, record: ValuationRecord) {
        (**self).upsert(record)
    }

    fn latest(&self, key: StockKey) -> Option<ValuationRecord> {
        (**self).latest(key)
    }

    fn latest_for_policy(&self, key: StockKey, policy: ValuationPolicy) -> Option<ValuationRecord> {
        (**self).latest_for_policy(key, policy)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<ValuationRecord> {
        (**self).list(tenant_id)
    }
}

type RecordKey = (TenantId, ProductId, LocationId, NaiveDate, ValuationPolicy);

/// In-memory valuation record store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryValuationRecordStore {
    inner: RwLock<HashMap<RecordKey, ValuationRecord>>,
}

impl InMemoryValuationRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ValuationRecordStore for InMemoryValuationRecordStore {
    fn upsert(&self, record: ValuationRecord) {
        if let Ok(mut map) = self.inner.write() {
            let key = (
                record.tenant_id,
                record.product_id,
                record.location_id,
                record.as_of,
                record.policy,
            );
            map.insert(key, record);
        }
    }

    fn latest(&self, key: StockKey) -> Option<ValuationRecord> {
        let map = self.inner.read().ok()?;
        map.values()
            .filter(|r| r.key() == key)
            .max_by_key(|r| (r.as_of, r.recorded_at))
            .cloned()
    }

    fn latest_for_policy(&self, key: StockKey, policy: ValuationPolicy) -> Option<ValuationRecord> {
        let map = self.inner.read().ok()?;
        map.values()
            .filter(|r| r.key() == key && r.policy == policy)
            .max_by_key(|r| (r.as_of, r.recorded_at))
            .cloned()
    }

    fn list(&self, tenant_id: TenantId) -> Vec<ValuationRecord> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        map.values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

/// Aggregate view over a set of valuation records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuationSummary {
    pub positions: usize,
    pub total_quantity: Decimal,
    pub total_value: Decimal,
}

impl ValuationSummary {
    pub fn from_records(records: &[ValuationRecord]) -> Self {
        Self {
            positions: records.len(),
            total_quantity: records.iter().map(|r| r.quantity).sum(),
            total_value: records.iter().map(|r| r.total_value).sum(),
        }
    }
}

impl CostingEngine {
    /// Persist one dated valuation record per (product, location) with
    /// on-hand quantity, under the given policy.
    ///
    /// Idempotent per (product, location, date, policy): rerunning overwrites.
    /// Returns the records written, ordered by (product, location).
    pub fn run_snapshot(
        &self,
        tenant_id: TenantId,
        as_of: DateTime<Utc>,
        policy: ValuationPolicy,
    ) -> CostingResult<Vec<ValuationRecord>> {
        let mut keys = self.stock_keys(tenant_id);
        keys.sort_by_key(|k| (*k.product_id.as_uuid().as_bytes(), *k.location_id.as_uuid().as_bytes()));

        let mut records = Vec::new();
        for key in keys {
            let valuation = policy.value_on_hand(&self.cost_context(), key);
            if valuation.quantity.is_zero() {
                continue;
            }
            let record = ValuationRecord {
                tenant_id,
                product_id: key.product_id,
                location_id: key.location_id,
                policy,
                as_of: as_of.date_naive(),
                quantity: valuation.quantity,
                unit_cost: valuation.unit_cost,
                total_value: valuation.total_value,
                movement_line_id: None,
                recorded_at: Utc::now(),
            };
            self.records().upsert(record.clone());
            records.push(record);
        }

        info!(
            tenant = %tenant_id,
            policy = %policy,
            positions = records.len(),
            "valuation snapshot run"
        );
        Ok(records)
    }

    /// What each policy would report for one (product, location), side by
    /// side. Read-only fan-out: no cost state is mutated.
    pub fn compare_policies(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Vec<(ValuationPolicy, Valuation)> {
        let key = StockKey::new(tenant_id, product_id, location_id);
        ValuationPolicy::ALL
            .iter()
            .map(|&policy| (policy, policy.value_on_hand(&self.cost_context(), key)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(key: StockKey, policy: ValuationPolicy, as_of: NaiveDate, cost: Decimal) -> ValuationRecord {
        ValuationRecord {
            tenant_id: key.tenant_id,
            product_id: key.product_id,
            location_id: key.location_id,
            policy,
            as_of,
            quantity: dec!(10),
            unit_cost: cost,
            total_value: cost * dec!(10),
            movement_line_id: None,
            recorded_at: Utc::now(),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, d).unwrap()
    }

    #[test]
    fn upsert_overwrites_same_natural_key() {
        let store = InMemoryValuationRecordStore::new();
        let key = StockKey::new(TenantId::new(), ProductId::new(), LocationId::new());

        store.upsert(record(key, ValuationPolicy::Fifo, day(1), dec!(5.00)));
        store.upsert(record(key, ValuationPolicy::Fifo, day(1), dec!(6.00)));

        let records = store.list(key.tenant_id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].unit_cost, dec!(6.00));
    }

    #[test]
    fn latest_prefers_newest_date_and_policy_filter() {
        let store = InMemoryValuationRecordStore::new();
        let key = StockKey::new(TenantId::new(), ProductId::new(), LocationId::new());

        store.upsert(record(key, ValuationPolicy::MovingAverage, day(1), dec!(4.00)));
        store.upsert(record(key, ValuationPolicy::Fifo, day(2), dec!(9.00)));

        assert_eq!(store.latest(key).unwrap().unit_cost, dec!(9.00));
        assert_eq!(
            store
                .latest_for_policy(key, ValuationPolicy::MovingAverage)
                .unwrap()
                .unit_cost,
            dec!(4.00)
        );
        assert!(store.latest_for_policy(key, ValuationPolicy::Lifo).is_none());
    }

    #[test]
    fn summary_totals_records() {
        let key = StockKey::new(TenantId::new(), ProductId::new(), LocationId::new());
        let records = vec![
            record(key, ValuationPolicy::Fifo, day(1), dec!(2.00)),
            record(key, ValuationPolicy::Fifo, day(2), dec!(3.00)),
        ];
        let summary = ValuationSummary::from_records(&records);
        assert_eq!(summary.positions, 2);
        assert_eq!(summary.total_quantity, dec!(20));
        assert_eq!(summary.total_value, dec!(50.00));
    }
}
