//! Running weighted-average cost state.
//!
//! Average-based policies keep a single blended unit cost per
//! (tenant, product, location) instead of discrete layers. The store also
//! mirrors on-hand quantity for the non-layer policies so valuation and
//! revaluation have a quantity to work with.

use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcost_core::{CostingError, CostingResult, ExpectedVersion, TenantId};

use crate::layer::StockKey;

/// Current weighted-average cost state for one (product, location).
///
/// Invariant: `unit_cost >= 0`. Created implicitly on first receipt and never
/// deleted; quantity may fall to zero and later rise again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningAverageCost {
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

impl RunningAverageCost {
    fn zero() -> Self {
        Self {
            quantity: Decimal::ZERO,
            unit_cost: Decimal::ZERO,
        }
    }
}

/// Result of issuing quantity against the average state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AverageIssue {
    /// Quantity actually covered by on-hand stock.
    pub covered_quantity: Decimal,
    /// Requested quantity beyond on-hand stock.
    pub shortfall: Decimal,
    /// Average unit cost at the time of the issue (unchanged by it).
    pub unit_cost: Decimal,
}

#[derive(Debug, Default)]
struct AverageEntry {
    state: RunningAverageCost,
    version: u64,
}

impl Default for RunningAverageCost {
    fn default() -> Self {
        Self::zero()
    }
}

/// Store of running averages, bucketed like the layer store.
///
/// Mutating calls verify their `ExpectedVersion` against the bucket version
/// inside the write-lock critical section; check and mutation are one atomic
/// step.
#[derive(Debug, Default)]
pub struct AverageStore {
    inner: RwLock<HashMap<StockKey, AverageEntry>>,
}

impl AverageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blend a receipt into the running average.
    ///
    /// `new_cost = (old_qty * old_cost + in_qty * in_cost) / (old_qty + in_qty)`,
    /// guarding the degenerate case where the prior quantity is not positive
    /// (bookkeeping went negative, or first receipt): the incoming cost wins.
    pub fn receive(
        &self,
        key: StockKey,
        quantity: Decimal,
        unit_cost: Decimal,
        expected: ExpectedVersion,
    ) -> CostingResult<RunningAverageCost> {
        if quantity <= Decimal::ZERO {
            return Err(CostingError::InvalidQuantity(quantity));
        }
        if unit_cost < Decimal::ZERO {
            return Err(CostingError::InvalidCost(unit_cost));
        }

        let mut map = self.write()?;
        expected.check(map.get(&key).map_or(0, |e| e.version))?;
        let entry = map.entry(key).or_default();
        let old = entry.state;

        let new_quantity = old.quantity + quantity;
        let new_cost = if old.quantity > Decimal::ZERO {
            (old.quantity * old.unit_cost + quantity * unit_cost) / new_quantity
        } else {
            unit_cost
        };

        entry.state = RunningAverageCost {
            quantity: new_quantity,
            unit_cost: new_cost,
        };
        entry.version += 1;
        Ok(entry.state)
    }

    /// Mirror a receipt's quantity without touching the unit cost.
    ///
    /// Used under Standard Cost, where movement history never influences the
    /// cost but on-hand quantity still has to be tracked.
    pub fn add_quantity(
        &self,
        key: StockKey,
        quantity: Decimal,
        expected: ExpectedVersion,
    ) -> CostingResult<()> {
        if quantity <= Decimal::ZERO {
            return Err(CostingError::InvalidQuantity(quantity));
        }
        let mut map = self.write()?;
        expected.check(map.get(&key).map_or(0, |e| e.version))?;
        let entry = map.entry(key).or_default();
        entry.state.quantity += quantity;
        entry.version += 1;
        Ok(())
    }

    /// Issue quantity: decrement on-hand, leave the unit cost untouched.
    ///
    /// The covered portion never exceeds on-hand quantity; the remainder is
    /// reported as shortfall, mirroring layer consumption. A bucket that never
    /// held stock stays absent: the issue is pure shortfall at zero cost.
    pub fn issue(
        &self,
        key: StockKey,
        quantity: Decimal,
        expected: ExpectedVersion,
    ) -> CostingResult<AverageIssue> {
        if quantity <= Decimal::ZERO {
            return Err(CostingError::InvalidQuantity(quantity));
        }

        let mut map = self.write()?;
        let Some(entry) = map.get_mut(&key) else {
            expected.check(0)?;
            return Ok(AverageIssue {
                covered_quantity: Decimal::ZERO,
                shortfall: quantity,
                unit_cost: Decimal::ZERO,
            });
        };
        expected.check(entry.version)?;
        let on_hand = entry.state.quantity.max(Decimal::ZERO);
        let covered = quantity.min(on_hand);
        entry.state.quantity -= covered;
        entry.version += 1;

        Ok(AverageIssue {
            covered_quantity: covered,
            shortfall: quantity - covered,
            unit_cost: entry.state.unit_cost,
        })
    }

    /// Overwrite the unit cost; used only by the revaluation service.
    ///
    /// A no-op on a bucket that never held stock (there is nothing to
    /// revalue, and probing must not create state).
    pub fn set_unit_cost(
        &self,
        key: StockKey,
        new_unit_cost: Decimal,
        expected: ExpectedVersion,
    ) -> CostingResult<()> {
        if new_unit_cost < Decimal::ZERO {
            return Err(CostingError::InvalidCost(new_unit_cost));
        }
        let mut map = self.write()?;
        let Some(entry) = map.get_mut(&key) else {
            expected.check(0)?;
            return Ok(());
        };
        expected.check(entry.version)?;
        entry.state.unit_cost = new_unit_cost;
        entry.version += 1;
        Ok(())
    }

    pub fn get(&self, key: StockKey) -> Option<RunningAverageCost> {
        self.inner.read().ok()?.get(&key).map(|e| e.state)
    }

    /// Current mutation version of a bucket (0 if it does not exist).
    pub fn version(&self, key: StockKey) -> u64 {
        self.inner
            .read()
            .ok()
            .and_then(|map| map.get(&key).map(|e| e.version))
            .unwrap_or(0)
    }

    /// All bucket keys of a tenant with nonzero on-hand quantity.
    pub fn keys(&self, tenant_id: TenantId) -> Vec<StockKey> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        map.iter()
            .filter(|(k, e)| k.tenant_id == tenant_id && !e.state.quantity.is_zero())
            .map(|(k, _)| *k)
            .collect()
    }

    fn write(
        &self,
    ) -> CostingResult<std::sync::RwLockWriteGuard<'_, HashMap<StockKey, AverageEntry>>> {
        self.inner
            .write()
            .map_err(|_| CostingError::conflict("average cost store lock poisoned"))
    }
}
