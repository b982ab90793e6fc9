use std::borrow::Cow;

use criterion::{criterion_group, criterion_main, Criterion};
use podium::entrant::Entrant;
use podium::mc::MonteCarloEngine;
use podium::noise::NoiseCoefficients;

fn field() -> Vec<Entrant> {
    [95.0, 92.0, 90.0, 88.0, 85.0, 84.0, 80.0, 78.0, 75.0, 74.0, 70.0, 65.0, 60.0, 55.0]
        .into_iter()
        .enumerate()
        .map(|(index, score)| {
            Entrant::new(format!("{}", index + 1), score).with_noise(NoiseCoefficients {
                form: 4.0,
                consistency: 2.0,
                weather: 1.0,
                track: 1.5,
                reliability: 1.0,
                failure_rate: 0.02,
            })
        })
        .collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    let entrants = field();
    let engine = MonteCarloEngine::default()
        .with_entrants(Cow::Borrowed(&entrants))
        .with_trials(10_000)
        .with_seed(42);

    {
        // sanity check
        let simulation = engine.simulate().unwrap();
        assert_eq!(10_000, simulation.diagnostics.effective_trials);
    }

    let sequential = MonteCarloEngine::default()
        .with_entrants(Cow::Borrowed(&entrants))
        .with_trials(10_000)
        .with_concurrency(1)
        .with_seed(42);
    c.bench_function("cri_mc_engine_14_10k_sequential", |b| {
        b.iter(|| sequential.simulate().unwrap());
    });
    c.bench_function("cri_mc_engine_14_10k_parallel", |b| {
        b.iter(|| engine.simulate().unwrap());
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
