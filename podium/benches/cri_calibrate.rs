use criterion::{criterion_group, criterion_main, Criterion};
use podium::calibrate::search::{CalibrationOptimiser, OptimiserConfig, SearchSpace, SearchSpaceOptions};
use podium::calibrate::{loss, CalibrationDataset, CalibrationEvent, CalibrationSample};

fn dataset(events: usize, entrants: usize) -> CalibrationDataset {
    let events = (0..events)
        .map(|event| {
            let samples: Vec<_> = (0..entrants)
                .map(|entrant| {
                    CalibrationSample::new(format!("{entrant}"), 1.0 / (entrant + 2) as f64)
                        .with_group(format!("g{}", entrant % 5))
                })
                .collect();
            CalibrationEvent {
                event_id: format!("e{event}"),
                track_type: Some(["street", "road", "oval"][event % 3].to_string()),
                winner: samples[(event * 7) % entrants].entrant.clone(),
                entrants: samples,
            }
        })
        .collect();
    CalibrationDataset { events }
}

fn criterion_benchmark(c: &mut Criterion) {
    let dataset = dataset(200, 20);
    let space = SearchSpace::for_dataset(&dataset, &SearchSpaceOptions::default());
    let values: Vec<_> = space.identity().iter().map(|value| value * 1.1).collect();
    let model = space.to_model(&values);

    // sanity check
    assert!(loss(&model, &dataset, 1.0).combined.is_finite());

    c.bench_function("cri_calibrate_loss_200x20", |b| {
        b.iter(|| loss(&model, &dataset, 1.0));
    });

    let optimiser = CalibrationOptimiser::new(
        &dataset,
        space,
        OptimiserConfig {
            trials: 50,
            concurrency: 1,
            ..OptimiserConfig::default()
        },
    )
    .unwrap();
    c.bench_function("cri_calibrate_search_50_trials", |b| {
        b.iter(|| optimiser.run());
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
