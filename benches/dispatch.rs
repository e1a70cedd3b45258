use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use igstream::{Dispatcher, ListenerRegistry, RawUpdate, TradeField};

fn confirms_update(deal_reference: u64) -> RawUpdate {
    RawUpdate::default()
        .with_value(
            TradeField::Confirms,
            Some(format!(r#"{{"dealReference": {deal_reference}, "status": "OPEN"}}"#).as_str()),
        )
        .with_value(TradeField::Opu, None)
        .with_value(TradeField::Wou, None)
}

fn bench_dispatch_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/fanout");

    for listeners in [1usize, 16, 128] {
        group.throughput(Throughput::Elements(listeners as u64));
        group.bench_function(format!("{listeners}_listeners"), |b| {
            b.iter_batched(
                || {
                    let registry = Arc::new(ListenerRegistry::new());
                    let held: Vec<_> = (0..listeners)
                        .map(|_| registry.add_listener(None).unwrap())
                        .collect();
                    (Dispatcher::new(Arc::clone(&registry)), held)
                },
                |(dispatcher, held)| {
                    dispatcher.dispatch(&confirms_update(1));
                    held
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_wait_key_equals(c: &mut Criterion) {
    c.bench_function("listener/wait_key_equals_256_queued", |b| {
        b.iter_batched(
            || {
                let registry = Arc::new(ListenerRegistry::new());
                let dispatcher = Dispatcher::new(Arc::clone(&registry));
                let listener = registry.add_listener(None).unwrap();
                for i in 0..256 {
                    dispatcher.dispatch(&confirms_update(i));
                }
                listener
            },
            |listener| listener.wait_key_equals("dealReference", 255),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_dispatch_fanout, bench_wait_key_equals);
criterion_main!(benches);
