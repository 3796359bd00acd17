//! Cost layers and the layer store.
//!
//! A cost layer is one batch of stock received at a known unit cost, retained
//! until fully consumed. The store owns all open layers, bucketed per
//! (tenant, product, location); every mutation goes through the contract here,
//! never through direct field writes, so the layer invariants are enforced at
//! a single choke point.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcost_core::{
    CostingError, CostingResult, ExpectedVersion, LayerId, LocationId, ProductId, TenantId,
};

/// Key of one cost-state bucket.
///
/// Tenancy is explicit on every operation; the engine carries no ambient
/// tenant context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub location_id: LocationId,
}

impl StockKey {
    pub fn new(tenant_id: TenantId, product_id: ProductId, location_id: LocationId) -> Self {
        Self {
            tenant_id,
            product_id,
            location_id,
        }
    }
}

/// One batch of stock received at a known unit cost, not yet fully consumed.
///
/// Invariant: `0 <= remaining_quantity <= original_quantity`. A layer that
/// reaches zero is removed from its bucket immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLayer {
    pub id: LayerId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub lot_key: Option<String>,
    pub layer_date: DateTime<Utc>,
    pub unit_cost: Decimal,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    /// Insertion sequence within the bucket; tie-break for layers sharing a
    /// `layer_date` so FIFO/LIFO stay deterministic for same-instant receipts.
    seq: u64,
}

impl CostLayer {
    pub fn remaining_value(&self) -> Decimal {
        self.remaining_quantity * self.unit_cost
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_quantity.is_zero()
    }
}

/// Consumption order over open layers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumeOrder {
    /// Oldest `layer_date` first (FIFO).
    Oldest,
    /// Newest `layer_date` first (LIFO).
    Newest,
}

/// Result of consuming from a bucket's open layers.
///
/// `shortfall` is the portion of the requested quantity that no open layer
/// could cover. It is data, not an error: the movement ledger decides whether
/// negative stock is permitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConsumption {
    /// Quantity actually drawn from layers.
    pub consumed_quantity: Decimal,
    /// Monetary value of the consumed quantity (unrounded).
    pub consumed_value: Decimal,
    /// Requested quantity left unsatisfied after all layers were exhausted.
    pub shortfall: Decimal,
}

#[derive(Debug, Default)]
struct LayerBucket {
    layers: Vec<CostLayer>,
    next_seq: u64,
    /// Bumped by one on every mutation; optimistic-concurrency anchor.
    version: u64,
}

/// Owner of all open cost layers, bucketed per (tenant, product, location).
///
/// Mutating calls hold the write lock for their whole duration, so mutations
/// against the same bucket are serialized and each is a single atomic unit.
/// Each mutating call verifies its `ExpectedVersion` against the bucket
/// version inside that critical section, so the check and the mutation are
/// one step: a writer whose read went stale gets a conflict, never a silent
/// second apply.
#[derive(Debug, Default)]
pub struct LayerStore {
    inner: RwLock<HashMap<StockKey, LayerBucket>>,
}

impl LayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an open layer for a received batch.
    ///
    /// Fails with `InvalidQuantity` if `quantity <= 0`, `InvalidCost` if
    /// `unit_cost < 0`, and `Conflict` if the bucket version no longer matches
    /// `expected`; nothing is mutated on failure.
    pub fn add_layer(
        &self,
        key: StockKey,
        lot_key: Option<String>,
        unit_cost: Decimal,
        quantity: Decimal,
        layer_date: DateTime<Utc>,
        expected: ExpectedVersion,
    ) -> CostingResult<LayerId> {
        if quantity <= Decimal::ZERO {
            return Err(CostingError::InvalidQuantity(quantity));
        }
        if unit_cost < Decimal::ZERO {
            return Err(CostingError::InvalidCost(unit_cost));
        }

        let mut map = self.write()?;
        expected.check(map.get(&key).map_or(0, |b| b.version))?;
        let bucket = map.entry(key).or_default();
        let id = LayerId::new();
        bucket.layers.push(CostLayer {
            id,
            product_id: key.product_id,
            location_id: key.location_id,
            lot_key,
            layer_date,
            unit_cost,
            original_quantity: quantity,
            remaining_quantity: quantity,
            seq: bucket.next_seq,
        });
        bucket.next_seq += 1;
        bucket.version += 1;
        Ok(id)
    }

    /// Consume `quantity` from the bucket's open layers in the given order.
    ///
    /// Walks layers oldest-first (FIFO) or newest-first (LIFO), decrementing
    /// each layer's remaining quantity until the request is satisfied or the
    /// layers run out. Exhausted layers are removed before returning. The
    /// returned value covers only the consumed quantity; shortfall carries no
    /// value here.
    pub fn consume(
        &self,
        key: StockKey,
        quantity: Decimal,
        order: ConsumeOrder,
        expected: ExpectedVersion,
    ) -> CostingResult<LayerConsumption> {
        if quantity <= Decimal::ZERO {
            return Err(CostingError::InvalidQuantity(quantity));
        }

        let mut map = self.write()?;
        expected.check(map.get(&key).map_or(0, |b| b.version))?;
        let Some(bucket) = map.get_mut(&key) else {
            return Ok(LayerConsumption {
                consumed_quantity: Decimal::ZERO,
                consumed_value: Decimal::ZERO,
                shortfall: quantity,
            });
        };

        let mut indices: Vec<usize> = (0..bucket.layers.len()).collect();
        indices.sort_by_key(|&i| (bucket.layers[i].layer_date, bucket.layers[i].seq));
        if order == ConsumeOrder::Newest {
            indices.reverse();
        }

        let mut remaining = quantity;
        let mut consumed_quantity = Decimal::ZERO;
        let mut consumed_value = Decimal::ZERO;
        for i in indices {
            if remaining.is_zero() {
                break;
            }
            let layer = &mut bucket.layers[i];
            let take = remaining.min(layer.remaining_quantity);
            layer.remaining_quantity -= take;
            remaining -= take;
            consumed_quantity += take;
            consumed_value += take * layer.unit_cost;
        }

        bucket.layers.retain(|l| !l.is_exhausted());
        bucket.version += 1;

        Ok(LayerConsumption {
            consumed_quantity,
            consumed_value,
            shortfall: remaining,
        })
    }

    /// Bulk-rewrite the unit cost of all open layers in a bucket.
    ///
    /// Used only by the revaluation service. Returns the number of layers
    /// touched.
    pub fn rewrite_unit_cost(
        &self,
        key: StockKey,
        new_unit_cost: Decimal,
        expected: ExpectedVersion,
    ) -> CostingResult<usize> {
        if new_unit_cost < Decimal::ZERO {
            return Err(CostingError::InvalidCost(new_unit_cost));
        }

        let mut map = self.write()?;
        expected.check(map.get(&key).map_or(0, |b| b.version))?;
        let Some(bucket) = map.get_mut(&key) else {
            return Ok(0);
        };
        for layer in &mut bucket.layers {
            layer.unit_cost = new_unit_cost;
        }
        bucket.version += 1;
        Ok(bucket.layers.len())
    }

    /// Sum of remaining quantity and remaining value across open layers.
    ///
    /// Returns `(0, 0)` if the bucket does not exist.
    pub fn snapshot(&self, key: StockKey) -> (Decimal, Decimal) {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return (Decimal::ZERO, Decimal::ZERO),
        };
        match map.get(&key) {
            Some(bucket) => bucket.layers.iter().fold(
                (Decimal::ZERO, Decimal::ZERO),
                |(qty, value), layer| (qty + layer.remaining_quantity, value + layer.remaining_value()),
            ),
            None => (Decimal::ZERO, Decimal::ZERO),
        }
    }

    /// Open layers of a bucket, in consumption order for `ConsumeOrder::Oldest`.
    pub fn open_layers(&self, key: StockKey) -> Vec<CostLayer> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        let mut layers = map.get(&key).map(|b| b.layers.clone()).unwrap_or_default();
        layers.sort_by_key(|l| (l.layer_date, l.seq));
        layers
    }

    /// Current mutation version of a bucket (0 if it does not exist).
    pub fn version(&self, key: StockKey) -> u64 {
        self.inner
            .read()
            .ok()
            .and_then(|map| map.get(&key).map(|b| b.version))
            .unwrap_or(0)
    }

    /// All bucket keys of a tenant that still hold open layers.
    pub fn keys(&self, tenant_id: TenantId) -> Vec<StockKey> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        map.iter()
            .filter(|(k, b)| k.tenant_id == tenant_id && !b.layers.is_empty())
            .map(|(k, _)| *k)
            .collect()
    }

    fn write(
        &self,
    ) -> CostingResult<std::sync::RwLockWriteGuard<'_, HashMap<StockKey, LayerBucket>>> {
        self.inner
            .write()
            .map_err(|_| CostingError::conflict("cost layer store lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_key() -> StockKey {
        StockKey::new(TenantId::new(), ProductId::new(), LocationId::new())
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn rejects_non_positive_quantity_and_negative_cost() {
        let store = LayerStore::new();
        let key = test_key();

        let err = store
            .add_layer(key, None, dec!(5.00), dec!(0), at(1), ExpectedVersion::Any)
            .unwrap_err();
        assert!(matches!(err, CostingError::InvalidQuantity(_)));

        let err = store
            .add_layer(key, None, dec!(-0.01), dec!(10), at(1), ExpectedVersion::Any)
            .unwrap_err();
        assert!(matches!(err, CostingError::InvalidCost(_)));

        assert_eq!(store.snapshot(key), (dec!(0), dec!(0)));
    }

    #[test]
    fn fifo_consumes_oldest_layers_first() {
        let store = LayerStore::new();
        let key = test_key();
        store.add_layer(key, None, dec!(5.00), dec!(10), at(1), ExpectedVersion::Any).unwrap();
        store.add_layer(key, None, dec!(7.00), dec!(10), at(2), ExpectedVersion::Any).unwrap();

        let result = store.consume(key, dec!(15), ConsumeOrder::Oldest, ExpectedVersion::Any).unwrap();
        assert_eq!(result.consumed_value, dec!(85.00));
        assert_eq!(result.shortfall, dec!(0));

        let layers = store.open_layers(key);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].remaining_quantity, dec!(5));
        assert_eq!(layers[0].unit_cost, dec!(7.00));
    }

    #[test]
    fn lifo_consumes_newest_layers_first() {
        let store = LayerStore::new();
        let key = test_key();
        store.add_layer(key, None, dec!(5.00), dec!(10), at(1), ExpectedVersion::Any).unwrap();
        store.add_layer(key, None, dec!(7.00), dec!(10), at(2), ExpectedVersion::Any).unwrap();

        let result = store.consume(key, dec!(15), ConsumeOrder::Newest, ExpectedVersion::Any).unwrap();
        assert_eq!(result.consumed_value, dec!(95.00));

        let layers = store.open_layers(key);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].remaining_quantity, dec!(5));
        assert_eq!(layers[0].unit_cost, dec!(5.00));
    }

    #[test]
    fn same_instant_layers_break_ties_by_insertion_order() {
        let store = LayerStore::new();
        let key = test_key();
        store.add_layer(key, None, dec!(1.00), dec!(1), at(1), ExpectedVersion::Any).unwrap();
        store.add_layer(key, None, dec!(2.00), dec!(1), at(1), ExpectedVersion::Any).unwrap();

        let result = store.consume(key, dec!(1), ConsumeOrder::Oldest, ExpectedVersion::Any).unwrap();
        assert_eq!(result.consumed_value, dec!(1.00));

        let result = store.consume(key, dec!(1), ConsumeOrder::Oldest, ExpectedVersion::Any).unwrap();
        assert_eq!(result.consumed_value, dec!(2.00));
    }

    #[test]
    fn shortfall_never_drives_layers_negative() {
        let store = LayerStore::new();
        let key = test_key();
        store.add_layer(key, None, dec!(3.00), dec!(15), at(1), ExpectedVersion::Any).unwrap();

        let result = store.consume(key, dec!(20), ConsumeOrder::Oldest, ExpectedVersion::Any).unwrap();
        assert_eq!(result.consumed_quantity, dec!(15));
        assert_eq!(result.consumed_value, dec!(45.00));
        assert_eq!(result.shortfall, dec!(5));
        assert!(store.open_layers(key).is_empty());
    }

    #[test]
    fn consume_on_unknown_bucket_is_pure_shortfall() {
        let store = LayerStore::new();
        let result = store
            .consume(test_key(), dec!(4), ConsumeOrder::Oldest, ExpectedVersion::Any)
            .unwrap();
        assert_eq!(result.consumed_quantity, dec!(0));
        assert_eq!(result.shortfall, dec!(4));
    }

    #[test]
    fn rewrite_unit_cost_touches_all_open_layers() {
        let store = LayerStore::new();
        let key = test_key();
        store.add_layer(key, None, dec!(5.00), dec!(10), at(1), ExpectedVersion::Any).unwrap();
        store.add_layer(key, None, dec!(7.00), dec!(10), at(2), ExpectedVersion::Any).unwrap();

        let touched = store.rewrite_unit_cost(key, dec!(6.00), ExpectedVersion::Any).unwrap();
        assert_eq!(touched, 2);
        assert_eq!(store.snapshot(key), (dec!(20), dec!(120.00)));
    }

    #[test]
    fn version_bumps_on_every_mutation() {
        let store = LayerStore::new();
        let key = test_key();
        assert_eq!(store.version(key), 0);
        store.add_layer(key, None, dec!(1.00), dec!(1), at(1), ExpectedVersion::Any).unwrap();
        assert_eq!(store.version(key), 1);
        store.consume(key, dec!(1), ConsumeOrder::Oldest, ExpectedVersion::Any).unwrap();
        assert_eq!(store.version(key), 2);
    }

    #[test]
    fn stale_expectation_is_rejected_without_mutating() {
        let store = LayerStore::new();
        let key = test_key();
        store
            .add_layer(key, None, dec!(5.00), dec!(10), at(1), ExpectedVersion::Exact(0))
            .unwrap();

        // A writer that read version 0 before the add lands must not apply.
        let err = store
            .consume(key, dec!(10), ConsumeOrder::Oldest, ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, CostingError::Conflict(_)));
        assert_eq!(store.snapshot(key), (dec!(10), dec!(50.00)));

        let err = store
            .rewrite_unit_cost(key, dec!(9.00), ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, CostingError::Conflict(_)));

        store
            .consume(key, dec!(10), ConsumeOrder::Oldest, ExpectedVersion::Exact(1))
            .unwrap();
        assert_eq!(store.snapshot(key), (dec!(0), dec!(0)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: for any interleaving of adds and consumes, every open
        /// layer satisfies 0 <= remaining <= original, and the snapshot value
        /// equals the sum of remaining layer values.
        #[test]
        fn layer_invariants_hold_under_random_operations(
            ops in prop::collection::vec(
                prop_oneof![
                    (1u32..1_000, 1u32..10_000).prop_map(|(q, c)| (true, q, c)),
                    (1u32..1_500, 0u32..1).prop_map(|(q, _)| (false, q, 0)),
                ],
                1..40,
            )
        ) {
            let store = LayerStore::new();
            let key = test_key();

            for (is_add, qty, cost) in ops {
                let qty = Decimal::from(qty);
                if is_add {
                    store
                        .add_layer(key, None, Decimal::from(cost), qty, Utc::now(), ExpectedVersion::Any)
                        .unwrap();
                } else {
                    let result = store.consume(key, qty, ConsumeOrder::Oldest, ExpectedVersion::Any).unwrap();
                    prop_assert!(result.shortfall >= Decimal::ZERO);
                    prop_assert_eq!(
                        result.consumed_quantity + result.shortfall,
                        qty
                    );
                }

                let mut total_qty = Decimal::ZERO;
                let mut total_value = Decimal::ZERO;
                for layer in store.open_layers(key) {
                    prop_assert!(layer.remaining_quantity > Decimal::ZERO);
                    prop_assert!(layer.remaining_quantity <= layer.original_quantity);
                    total_qty += layer.remaining_quantity;
                    total_value += layer.remaining_value();
                }
                prop_assert_eq!(store.snapshot(key), (total_qty, total_value));
            }
        }
    }
}
