use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use chrono::Utc;
use rust_decimal::Decimal;

use stockcost_core::{ExpectedVersion, LocationId, ProductId, TenantId};
use stockcost_costing::{ConsumeOrder, LayerStore, StockKey};

/// Layer consumption is the hot path of every outgoing movement; this
/// measures FIFO walks over buckets of varying depth.
fn bench_fifo_consume(c: &mut Criterion) {
    let mut group = c.benchmark_group("layer_consume");

    for layer_count in [10u32, 100, 1_000] {
        group.throughput(Throughput::Elements(u64::from(layer_count)));
        group.bench_function(format!("fifo_{layer_count}_layers"), |b| {
            b.iter_batched(
                || {
                    let store = LayerStore::new();
                    let key =
                        StockKey::new(TenantId::new(), ProductId::new(), LocationId::new());
                    for i in 0..layer_count {
                        store
                            .add_layer(
                                key,
                                None,
                                Decimal::from(i % 17 + 1),
                                Decimal::from(10),
                                Utc::now(),
                                ExpectedVersion::Any,
                            )
                            .unwrap();
                    }
                    (store, key)
                },
                |(store, key)| {
                    // Drain the whole bucket in one walk.
                    let total = Decimal::from(layer_count * 10);
                    black_box(
                        store
                            .consume(key, total, ConsumeOrder::Oldest, ExpectedVersion::Any)
                            .unwrap(),
                    );
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fifo_consume);
criterion_main!(benches);
