//! Stock-movement boundary types.
//!
//! The movement ledger (out of scope) records what physically moved and when;
//! the costing engine only reacts to lines that reached the `Done` state.
//! Processing is idempotent: a line that already contributed to cost state is
//! refused on replay.

use std::collections::HashSet;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcost_core::{
    CostingError, CostingResult, LocationId, MovementLineId, ProductId, TenantId,
};

use crate::policy::ValuationPolicy;

/// Movement line lifecycle, mirroring the external ledger's states.
///
/// The engine acts only on `Done`; everything else is rejected so a caller
/// wiring mistake surfaces instead of silently dropping cost effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementState {
    Draft,
    Confirmed,
    Done,
    Cancelled,
}

/// Direction of a completed movement, with the locations it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "direction")]
pub enum MovementKind {
    /// Destination gains stock.
    Incoming { location: LocationId },
    /// Source loses stock.
    Outgoing { location: LocationId },
    /// Outgoing against the source immediately followed by incoming at the
    /// destination, at the unit cost realized from the outgoing leg.
    Internal {
        source: LocationId,
        destination: LocationId,
    },
}

/// One completed stock-movement line, as handed to the engine.
///
/// `unit_cost` is required for incoming movements and ignored (computed) for
/// outgoing and internal ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementLine {
    pub line_id: MovementLineId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub lot_key: Option<String>,
    pub effective_date: DateTime<Utc>,
    pub state: MovementState,
}

/// What the engine realized for one processed movement line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementOutcome {
    pub line_id: MovementLineId,
    pub policy: ValuationPolicy,
    /// Unit cost realized by this line (supplied cost for receipts, blended
    /// consumption cost for issues); downstream cost-of-goods-sold input.
    pub realized_unit_cost: Decimal,
    /// Monetary value realized for the issue: covered layers/average plus
    /// any shortfall valued at the fallback cost. Zero for receipts.
    pub consumed_value: Decimal,
    /// Quantity that no open cost state could cover. Nonzero only when stock
    /// bookkeeping went negative; surfaced as a warning signal, not an error.
    pub shortfall: Decimal,
}

/// Ledger of movement lines that already contributed to cost state.
#[derive(Debug, Default)]
pub struct ProcessedLines {
    inner: RwLock<HashSet<(TenantId, MovementLineId)>>,
}

impl ProcessedLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a line id, failing with `AlreadyProcessed` if it was seen before.
    pub fn claim(&self, tenant_id: TenantId, line_id: MovementLineId) -> CostingResult<()> {
        let mut set = self
            .inner
            .write()
            .map_err(|_| CostingError::conflict("processed-line ledger lock poisoned"))?;
        if set.insert((tenant_id, line_id)) {
            Ok(())
        } else {
            Err(CostingError::AlreadyProcessed(line_id))
        }
    }

    /// Release a claim after a failed mutation so a corrected line can retry.
    pub fn release(&self, tenant_id: TenantId, line_id: MovementLineId) {
        if let Ok(mut set) = self.inner.write() {
            set.remove(&(tenant_id, line_id));
        }
    }

    pub fn contains(&self, tenant_id: TenantId, line_id: MovementLineId) -> bool {
        self.inner
            .read()
            .map(|set| set.contains(&(tenant_id, line_id)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exactly_once_per_tenant_line() {
        let processed = ProcessedLines::new();
        let tenant = TenantId::new();
        let line = MovementLineId::new();

        processed.claim(tenant, line).unwrap();
        let err = processed.claim(tenant, line).unwrap_err();
        assert_eq!(err, CostingError::AlreadyProcessed(line));

        // Same line id under a different tenant is a different claim.
        processed.claim(TenantId::new(), line).unwrap();
    }

    #[test]
    fn released_claim_can_be_retried() {
        let processed = ProcessedLines::new();
        let tenant = TenantId::new();
        let line = MovementLineId::new();

        processed.claim(tenant, line).unwrap();
        processed.release(tenant, line);
        assert!(!processed.contains(tenant, line));
        processed.claim(tenant, line).unwrap();
    }
}
