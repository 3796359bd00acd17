//! Black-box flow test: receive → issue → transfer → snapshot → revalue,
//! exercising the engine the way a host application would.

use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;

use stockcost_core::{ExpectedVersion, LocationId, MovementLineId, ProductId, TenantId, UserId};
use stockcost_costing::{
    CostingConfig, CostingEngine, MovementKind, MovementLine, MovementState, RevaluationRequest,
    ValuationPolicy, ValuationSummary,
};

fn line(
    tenant: TenantId,
    product: ProductId,
    kind: MovementKind,
    quantity: rust_decimal::Decimal,
    unit_cost: Option<rust_decimal::Decimal>,
    hour: u32,
) -> MovementLine {
    MovementLine {
        line_id: MovementLineId::new(),
        tenant_id: tenant,
        product_id: product,
        kind,
        quantity,
        unit_cost,
        lot_key: None,
        effective_date: Utc.with_ymd_and_hms(2026, 6, 1, hour, 0, 0).unwrap(),
        state: MovementState::Done,
    }
}

#[test]
fn full_costing_flow_under_fifo() {
    stockcost_observability::init();

    let tenant = TenantId::new();
    let product = ProductId::new();
    let main = LocationId::new();
    let shop = LocationId::new();
    let controller = UserId::new();

    let config = CostingConfig::new(ValuationPolicy::Fifo).with_fallback_unit_cost(dec!(4.00));
    let engine = CostingEngine::new(config);

    // Two receipts at different costs.
    engine
        .process_movement(
            &line(tenant, product, MovementKind::Incoming { location: main }, dec!(10), Some(dec!(5.00)), 8),
            ExpectedVersion::Any,
        )
        .unwrap();
    engine
        .process_movement(
            &line(tenant, product, MovementKind::Incoming { location: main }, dec!(10), Some(dec!(7.00)), 9),
            ExpectedVersion::Any,
        )
        .unwrap();

    // Issue consumes the oldest layer first.
    let issue = engine
        .process_movement(
            &line(tenant, product, MovementKind::Outgoing { location: main }, dec!(8), None, 10),
            ExpectedVersion::Any,
        )
        .unwrap();
    assert_eq!(issue.consumed_value, dec!(40.00));
    assert_eq!(issue.realized_unit_cost, dec!(5.00));

    // Transfer moves stock to the shop at the realized cost.
    let transfer = engine
        .process_movement(
            &line(
                tenant,
                product,
                MovementKind::Internal {
                    source: main,
                    destination: shop,
                },
                dec!(6),
                None,
                11,
            ),
            ExpectedVersion::Any,
        )
        .unwrap();
    // 2 left at 5.00 plus 4 at 7.00.
    assert_eq!(transfer.consumed_value, dec!(38.00));

    let shop_valuation = engine.value_on_hand(tenant, product, shop);
    assert_eq!(shop_valuation.quantity, dec!(6));
    assert_eq!(shop_valuation.total_value, dec!(38.00));

    // Snapshot covers both locations.
    let records = engine
        .run_snapshot(tenant, Utc.with_ymd_and_hms(2026, 6, 1, 23, 0, 0).unwrap(), ValuationPolicy::Fifo)
        .unwrap();
    assert_eq!(records.len(), 2);
    let summary = ValuationSummary::from_records(&records);
    assert_eq!(summary.total_quantity, dec!(12));
    assert_eq!(summary.total_value, dec!(80.00));

    // Side-by-side comparison is read-only.
    let before = engine.value_on_hand(tenant, product, main);
    let comparison = engine.compare_policies(tenant, product, main);
    assert_eq!(comparison.len(), 5);
    assert_eq!(engine.value_on_hand(tenant, product, main), before);

    // Controller revalues the shop stock; the delta is audited.
    let adjustment_id = engine
        .revalue(RevaluationRequest::new(
            tenant,
            product,
            shop,
            dec!(7.00),
            "aligning transfer cost with current supplier price",
            Some(controller),
        ))
        .unwrap()
        .expect("revaluation posted");

    let adjustment = engine.adjustments().get(tenant, adjustment_id).unwrap();
    assert!(adjustment.posted);
    assert_eq!(adjustment.lines.len(), 1);
    let delta = adjustment.lines[0].adjustment_amount();
    assert_eq!(shop_valuation.total_value + delta, engine.value_on_hand(tenant, product, shop).total_value);
}
