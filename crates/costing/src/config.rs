//! Engine configuration.
//!
//! Everything the source system kept in process-wide globals or per-request
//! ambient state is passed in here explicitly: the active policy (with
//! per-product overrides), externally maintained standard costs, the fallback
//! cost used to value shortfall, and money precision.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcost_core::{DEFAULT_MONEY_PRECISION, ProductId};

use crate::policy::ValuationPolicy;

/// Per-company costing configuration.
///
/// Switching the policy for a product with existing history changes how
/// future movements and snapshots are valued; past valuation records are
/// never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostingConfig {
    /// Policy applied to products without an override.
    pub default_policy: ValuationPolicy,
    /// Per-product policy overrides.
    pub policy_overrides: HashMap<ProductId, ValuationPolicy>,
    /// Externally supplied standard costs (master data).
    pub standard_costs: HashMap<ProductId, Decimal>,
    /// Unit cost applied to shortfall when no standard cost is configured.
    pub fallback_unit_cost: Option<Decimal>,
    /// Decimal places for reported monetary values.
    pub money_precision: u32,
}

impl CostingConfig {
    pub fn new(default_policy: ValuationPolicy) -> Self {
        Self {
            default_policy,
            policy_overrides: HashMap::new(),
            standard_costs: HashMap::new(),
            fallback_unit_cost: None,
            money_precision: DEFAULT_MONEY_PRECISION,
        }
    }

    pub fn with_policy_override(mut self, product_id: ProductId, policy: ValuationPolicy) -> Self {
        self.policy_overrides.insert(product_id, policy);
        self
    }

    pub fn with_standard_cost(mut self, product_id: ProductId, unit_cost: Decimal) -> Self {
        self.standard_costs.insert(product_id, unit_cost);
        self
    }

    pub fn with_fallback_unit_cost(mut self, unit_cost: Decimal) -> Self {
        self.fallback_unit_cost = Some(unit_cost);
        self
    }

    /// Active policy for a product.
    pub fn policy_for(&self, product_id: ProductId) -> ValuationPolicy {
        self.policy_overrides
            .get(&product_id)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Externally maintained standard cost, if any.
    pub fn standard_cost(&self, product_id: ProductId) -> Option<Decimal> {
        self.standard_costs.get(&product_id).copied()
    }

    /// Unit cost used to value shortfall: standard cost if configured,
    /// otherwise the engine-wide fallback, otherwise zero.
    pub fn shortfall_unit_cost(&self, product_id: ProductId) -> Decimal {
        self.standard_cost(product_id)
            .or(self.fallback_unit_cost)
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn override_wins_over_default_policy() {
        let product = ProductId::new();
        let config = CostingConfig::new(ValuationPolicy::Fifo)
            .with_policy_override(product, ValuationPolicy::StandardCost);

        assert_eq!(config.policy_for(product), ValuationPolicy::StandardCost);
        assert_eq!(config.policy_for(ProductId::new()), ValuationPolicy::Fifo);
    }

    #[test]
    fn shortfall_cost_prefers_standard_then_fallback() {
        let with_standard = ProductId::new();
        let config = CostingConfig::new(ValuationPolicy::Fifo)
            .with_standard_cost(with_standard, dec!(4.50))
            .with_fallback_unit_cost(dec!(1.25));

        assert_eq!(config.shortfall_unit_cost(with_standard), dec!(4.50));
        assert_eq!(config.shortfall_unit_cost(ProductId::new()), dec!(1.25));

        let bare = CostingConfig::new(ValuationPolicy::Fifo);
        assert_eq!(bare.shortfall_unit_cost(ProductId::new()), dec!(0));
    }
}
