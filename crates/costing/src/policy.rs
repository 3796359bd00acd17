//! Valuation policies.
//!
//! A closed set of tagged variants instead of the string-keyed branching the
//! source system used: adding a policy is a compile-time exhaustiveness
//! exercise. All five policies report through the same two operations,
//! `value_on_hand` and `consume`, which keeps the movement processor and the
//! snapshot service policy-agnostic.

use core::fmt;
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcost_core::{CostingResult, ExpectedVersion, round_money};

use crate::average::AverageStore;
use crate::config::CostingConfig;
use crate::layer::{ConsumeOrder, LayerStore, StockKey};
use crate::snapshot::ValuationRecordStore;

/// Valuation policy, selected per company or per product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValuationPolicy {
    /// Oldest cost layers are consumed first.
    Fifo,
    /// Newest cost layers are consumed first.
    Lifo,
    /// Single running average, blended on every receipt.
    WeightedAverage,
    /// Like Weighted Average, but the current cost is always re-read from the
    /// most recently persisted valuation record.
    MovingAverage,
    /// Fixed, externally supplied unit cost; movement history is ignored.
    StandardCost,
}

impl ValuationPolicy {
    pub const ALL: [ValuationPolicy; 5] = [
        ValuationPolicy::Fifo,
        ValuationPolicy::Lifo,
        ValuationPolicy::WeightedAverage,
        ValuationPolicy::MovingAverage,
        ValuationPolicy::StandardCost,
    ];

    /// Whether cost state lives in discrete layers (vs. a running average).
    pub fn is_layer_based(self) -> bool {
        matches!(self, ValuationPolicy::Fifo | ValuationPolicy::Lifo)
    }
}

impl FromStr for ValuationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "FIFO" => Ok(Self::Fifo),
            "LIFO" => Ok(Self::Lifo),
            "WEIGHTED_AVERAGE" => Ok(Self::WeightedAverage),
            "MOVING_AVERAGE" => Ok(Self::MovingAverage),
            "STANDARD_COST" => Ok(Self::StandardCost),
            _ => Err(format!("unknown valuation policy: {s}")),
        }
    }
}

impl fmt::Display for ValuationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo => write!(f, "FIFO"),
            Self::Lifo => write!(f, "LIFO"),
            Self::WeightedAverage => write!(f, "WEIGHTED_AVERAGE"),
            Self::MovingAverage => write!(f, "MOVING_AVERAGE"),
            Self::StandardCost => write!(f, "STANDARD_COST"),
        }
    }
}

/// Point-in-time valuation of one (product, location).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    /// `round(quantity * unit_cost, money_precision)`.
    pub total_value: Decimal,
}

impl Valuation {
    fn new(quantity: Decimal, unit_cost: Decimal, precision: u32) -> Self {
        Self {
            quantity,
            unit_cost,
            total_value: round_money(quantity * unit_cost, precision),
        }
    }

    fn empty() -> Self {
        Self {
            quantity: Decimal::ZERO,
            unit_cost: Decimal::ZERO,
            total_value: Decimal::ZERO,
        }
    }
}

/// Policy-level consumption result.
///
/// The covered portion is valued by the policy; the shortfall portion is
/// valued at the product's standard/fallback cost. The movement ledger owns
/// the decision whether negative stock is permitted at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeOutcome {
    /// Requested quantity.
    pub quantity: Decimal,
    /// Quantity covered by on-hand cost state.
    pub covered_quantity: Decimal,
    /// Value of the covered portion, rounded.
    pub covered_value: Decimal,
    /// Unsatisfied remainder.
    pub shortfall: Decimal,
    /// Value assigned to the shortfall at the fallback cost, rounded.
    pub shortfall_value: Decimal,
}

impl ConsumeOutcome {
    pub fn total_value(&self) -> Decimal {
        self.covered_value + self.shortfall_value
    }

    /// Blended unit cost realized by this consumption (zero for zero quantity).
    pub fn realized_unit_cost(&self) -> Decimal {
        if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.total_value() / self.quantity
        }
    }
}

/// Read/write view over the engine's cost state, handed to policy dispatch.
pub struct CostContext<'a> {
    pub layers: &'a LayerStore,
    pub averages: &'a AverageStore,
    pub records: &'a dyn ValuationRecordStore,
    pub config: &'a CostingConfig,
}

impl ValuationPolicy {
    /// Current on-hand valuation. Read-only under every policy.
    pub fn value_on_hand(self, ctx: &CostContext<'_>, key: StockKey) -> Valuation {
        let precision = ctx.config.money_precision;
        match self {
            ValuationPolicy::Fifo | ValuationPolicy::Lifo => {
                let (quantity, value) = ctx.layers.snapshot(key);
                if quantity.is_zero() {
                    Valuation::empty()
                } else {
                    Valuation {
                        quantity,
                        unit_cost: value / quantity,
                        total_value: round_money(value, precision),
                    }
                }
            }
            ValuationPolicy::WeightedAverage => match ctx.averages.get(key) {
                Some(avg) => Valuation::new(avg.quantity, avg.unit_cost, precision),
                None => Valuation::empty(),
            },
            ValuationPolicy::MovingAverage => {
                let quantity = ctx
                    .averages
                    .get(key)
                    .map(|avg| avg.quantity)
                    .unwrap_or(Decimal::ZERO);
                match self.moving_average_cost(ctx, key) {
                    Some(unit_cost) => Valuation::new(quantity, unit_cost, precision),
                    None => ValuationPolicy::WeightedAverage.value_on_hand(ctx, key),
                }
            }
            ValuationPolicy::StandardCost => {
                let quantity = ctx
                    .averages
                    .get(key)
                    .map(|avg| avg.quantity)
                    .unwrap_or(Decimal::ZERO);
                Valuation::new(quantity, ctx.config.shortfall_unit_cost(key.product_id), precision)
            }
        }
    }

    /// Consume `quantity` from cost state, valuing it under this policy.
    ///
    /// `expected` is verified against the mutated bucket's version inside the
    /// store's write lock; a stale expectation surfaces as `Conflict` with
    /// nothing consumed.
    pub fn consume(
        self,
        ctx: &CostContext<'_>,
        key: StockKey,
        quantity: Decimal,
        expected: ExpectedVersion,
    ) -> CostingResult<ConsumeOutcome> {
        let precision = ctx.config.money_precision;
        let fallback = ctx.config.shortfall_unit_cost(key.product_id);

        match self {
            ValuationPolicy::Fifo | ValuationPolicy::Lifo => {
                let order = if self == ValuationPolicy::Fifo {
                    ConsumeOrder::Oldest
                } else {
                    ConsumeOrder::Newest
                };
                let result = ctx.layers.consume(key, quantity, order, expected)?;
                Ok(ConsumeOutcome {
                    quantity,
                    covered_quantity: result.consumed_quantity,
                    covered_value: round_money(result.consumed_value, precision),
                    shortfall: result.shortfall,
                    shortfall_value: round_money(result.shortfall * fallback, precision),
                })
            }
            ValuationPolicy::WeightedAverage => {
                let issue = ctx.averages.issue(key, quantity, expected)?;
                Ok(ConsumeOutcome {
                    quantity,
                    covered_quantity: issue.covered_quantity,
                    covered_value: round_money(issue.covered_quantity * issue.unit_cost, precision),
                    shortfall: issue.shortfall,
                    shortfall_value: round_money(issue.shortfall * fallback, precision),
                })
            }
            ValuationPolicy::MovingAverage => {
                // Cost comes from the latest persisted record; the issue call
                // still mirrors the quantity decrement.
                let unit_cost = self.moving_average_cost(ctx, key);
                let issue = ctx.averages.issue(key, quantity, expected)?;
                let unit_cost = unit_cost.unwrap_or(issue.unit_cost);
                Ok(ConsumeOutcome {
                    quantity,
                    covered_quantity: issue.covered_quantity,
                    covered_value: round_money(issue.covered_quantity * unit_cost, precision),
                    shortfall: issue.shortfall,
                    shortfall_value: round_money(issue.shortfall * fallback, precision),
                })
            }
            ValuationPolicy::StandardCost => {
                let unit_cost = ctx.config.shortfall_unit_cost(key.product_id);
                let issue = ctx.averages.issue(key, quantity, expected)?;
                Ok(ConsumeOutcome {
                    quantity,
                    covered_quantity: issue.covered_quantity,
                    covered_value: round_money(issue.covered_quantity * unit_cost, precision),
                    shortfall: issue.shortfall,
                    shortfall_value: round_money(issue.shortfall * unit_cost, precision),
                })
            }
        }
    }

    /// Most recently persisted unit cost for a (product, location), preferring
    /// records tagged with this policy. `None` means bootstrap: fall back to
    /// the running average.
    fn moving_average_cost(self, ctx: &CostContext<'_>, key: StockKey) -> Option<Decimal> {
        ctx.records
            .latest_for_policy(key, ValuationPolicy::MovingAverage)
            .or_else(|| ctx.records.latest(key))
            .map(|record| record.unit_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_configuration_strings() {
        assert_eq!("FIFO".parse::<ValuationPolicy>().unwrap(), ValuationPolicy::Fifo);
        assert_eq!(
            "weighted_average".parse::<ValuationPolicy>().unwrap(),
            ValuationPolicy::WeightedAverage
        );
        assert!("RETAIL".parse::<ValuationPolicy>().is_err());
    }

    #[test]
    fn display_round_trips_every_policy() {
        for policy in ValuationPolicy::ALL {
            let parsed: ValuationPolicy = policy.to_string().parse().unwrap();
            assert_eq!(parsed, policy);
        }
    }

    #[test]
    fn layer_based_split_is_exact() {
        assert!(ValuationPolicy::Fifo.is_layer_based());
        assert!(ValuationPolicy::Lifo.is_layer_based());
        assert!(!ValuationPolicy::WeightedAverage.is_layer_based());
        assert!(!ValuationPolicy::MovingAverage.is_layer_based());
        assert!(!ValuationPolicy::StandardCost.is_layer_based());
    }
}
