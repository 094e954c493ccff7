//! Dispatch path benchmarks
//!
//! Measures the publish pipeline: build, freeze, table lookup, and fan-out
//! enqueue, at several subscriber counts.
//!
//! Run with: cargo bench --bench dispatch_bench

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use fanout_core::{Core, CoreConfig, MessageBuffer, SubscriptionKey};

const TYPE: u64 = 0x93c2_0128_30d6_8d3c;

fn bench_message_build(c: &mut Criterion) {
    c.bench_function("message_build_one_segment", |b| {
        b.iter(|| {
            let mut buffer = MessageBuffer::new(TYPE);
            buffer.allocate_segment(16).unwrap()[0] = 1;
            black_box(buffer.freeze())
        });
    });
}

fn bench_frozen_clone(c: &mut Criterion) {
    let mut buffer = MessageBuffer::new(TYPE);
    buffer.allocate_segment(16).unwrap()[0] = 1;
    let frozen = buffer.freeze();

    c.bench_function("frozen_message_clone", |b| {
        b.iter(|| black_box(frozen.clone()));
    });
}

fn bench_publish_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_fan_out");

    for subscribers in [1usize, 4, 16] {
        let core = Core::new(CoreConfig::default()).unwrap();
        let key = SubscriptionKey::new("bench", TYPE);

        let subs: Vec<_> = (0..subscribers)
            .map(|_| core.subscribe(key.clone(), |_, _| 0).unwrap())
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    core.publish_with(&key, |msg| {
                        msg.allocate_segment(16)?[0] = 1;
                        Ok(())
                    })
                    .unwrap();
                });
                core.wait_idle();
            },
        );

        drop(subs);
        core.shutdown();
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_message_build,
    bench_frozen_clone,
    bench_publish_fan_out,
);
criterion_main!(benches);
