use criterion::{black_box, criterion_group, criterion_main, Criterion};

use folio_moderation::RetryPolicy;

fn backoff_benchmarks(c: &mut Criterion) {
    let policy = RetryPolicy::default();

    c.bench_function("delay_for_retry", |b| {
        b.iter(|| {
            for retry in 1..=10u32 {
                black_box(policy.delay_for_retry(black_box(retry)));
            }
        })
    });

    c.bench_function("next_delay_with_jitter", |b| {
        b.iter(|| {
            for retry in 1..=10u32 {
                black_box(policy.next_delay(black_box(retry)));
            }
        })
    });
}

criterion_group!(benches, backoff_benchmarks);
criterion_main!(benches);
