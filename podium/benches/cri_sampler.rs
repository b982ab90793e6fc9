use criterion::{criterion_group, criterion_main, Criterion};
use podium::probs::SliceExt;
use podium::sampler::rank_once;
use tinyrand::{Seeded, StdRand};

fn criterion_benchmark(c: &mut Criterion) {
    let mut scores = [
        1.0 / 11.0,
        1.0 / 41.0,
        1.0 / 18.0,
        1.0 / 12.0,
        1.0 / 91.0,
        1.0 / 101.0,
        1.0 / 4.8,
        1.0 / 14.0,
        1.0 / 2.9,
        1.0 / 91.0,
        1.0 / 9.0,
        1.0 / 91.0,
        1.0 / 5.0,
        1.0 / 21.0,
    ];
    scores.normalise(1.0);
    let mut order = [usize::MAX; 14];
    let mut bitmap = [true; 14];
    let mut rand = StdRand::seed(42);

    // sanity check
    assert!(!rank_once(&scores, &mut order, &mut bitmap, &mut rand));
    assert!(order.iter().all(|&entrant| entrant < 14));

    c.bench_function("cri_sampler_rank_14", |b| {
        b.iter(|| rank_once(&scores, &mut order, &mut bitmap, &mut rand));
    });

    let mut floored = [0.0; 14];
    c.bench_function("cri_sampler_rank_14_degenerate", |b| {
        b.iter(|| rank_once(&floored, &mut order, &mut bitmap, &mut rand));
    });
    floored[0] = 1.0;
    c.bench_function("cri_sampler_rank_14_single_contender", |b| {
        b.iter(|| rank_once(&floored, &mut order, &mut bitmap, &mut rand));
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
