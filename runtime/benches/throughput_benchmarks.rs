//! Throughput of the per-message hot path.
//!
//! - correlation store claim and take
//! - envelope encode and decode
//!
//! Run with: `cargo bench -p fulfillment-runtime`

#![allow(missing_docs)]
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use fulfillment_core::event::{Event, EventName};
use fulfillment_core::store::CorrelationStore;
use fulfillment_testing::helpers;

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("correlation_store");
    group.throughput(Throughput::Elements(1));

    let store = CorrelationStore::new();
    group.bench_function("claim_then_release", |b| {
        b.iter(|| {
            let claimed = store.put_if_absent("A1", ());
            store.delete("A1");
            black_box(claimed)
        });
    });

    let seen = CorrelationStore::new();
    seen.put("A1", ());
    group.bench_function("put_if_absent_duplicate", |b| {
        b.iter(|| black_box(seen.put_if_absent("A1", ())));
    });

    let pairs = CorrelationStore::new();
    group.bench_function("put_then_take", |b| {
        b.iter(|| {
            pairs.put("B2", helpers::t0());
            black_box(pairs.take("B2"))
        });
    });

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_codec");

    for items in [1_usize, 10, 100] {
        let mut order = helpers::order("A1");
        order.items = std::iter::repeat_n(order.items[0].clone(), items).collect();
        let event = order.to_event(EventName::OrderReceived).expect("event");
        let bytes = event.encode().expect("encode");

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", items), &event, |b, event| {
            b.iter(|| black_box(event.encode().unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decode", items), &bytes, |b, bytes| {
            b.iter(|| black_box(Event::decode(bytes).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_store, bench_codec);
criterion_main!(benches);
