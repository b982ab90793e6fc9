use std::borrow::Cow;
use std::thread;

use assert_float_eq::*;
use podium_testing::assert_probs_sum;

use super::*;
use crate::entrant::Entrant;
use crate::mc::MonteCarloEngine;

fn ids(names: &[&str]) -> Vec<EntrantId> {
    names.iter().map(|&name| EntrantId::from(name)).collect()
}

fn simulate(scores: &[(&str, f64)]) -> Vec<EntrantAggregateStats> {
    let entrants: Vec<_> = scores
        .iter()
        .map(|&(id, score)| Entrant::new(id, score))
        .collect();
    MonteCarloEngine::default()
        .with_entrants(Cow::Owned(entrants))
        .with_trials(20_000)
        .with_concurrency(2)
        .with_seed(17)
        .simulate()
        .unwrap()
        .stats
}

fn layer(store: &PriorStore) -> BayesianLayer<'_> {
    BayesianLayer::new(store, BayesConfig::default(), FusionConfig::default()).unwrap()
}

#[test]
fn beta_update_through_outcomes() {
    let store = PriorStore::default();
    let layer = layer(&store);
    layer.initialise_priors(
        &[
            (EntrantId::from("a"), Tier::Elite),
            (EntrantId::from("b"), Tier::Strong),
        ],
        &FxHashMap::default(),
    );
    let prior = store.read(&EntrantId::from("a")).unwrap().win;

    let winners = ["a", "b", "a", "a", "b"];
    for (event, &winner) in winners.iter().enumerate() {
        let order = if winner == "a" { ids(&["a", "b"]) } else { ids(&["b", "a"]) };
        let summary = layer
            .update(&EventOutcome::new(format!("r{event}"), order))
            .unwrap();
        assert_eq!(2, summary.updated);
        assert_eq!(0, summary.default_priors);
    }

    let posterior = store.read(&EntrantId::from("a")).unwrap();
    assert_eq!(prior.alpha + 3.0, posterior.win.alpha);
    assert_eq!(prior.beta + 2.0, posterior.win.beta);
    assert_eq!(5, posterior.events_observed);
}

#[test]
fn fusion_is_idempotent_without_outcomes() {
    let store = PriorStore::default();
    let layer = layer(&store);
    layer.initialise_priors(&[(EntrantId::from("x"), Tier::Strong)], &FxHashMap::default());
    let stats = simulate(&[("x", 3.0), ("y", 2.0), ("z", 1.0)]);
    let before = store.snapshot();

    let first = layer.fuse(&stats, &[]).unwrap();
    let second = layer.fuse(&stats, &[]).unwrap();
    assert_eq!(first, second);
    assert_eq!(before, store.snapshot());
    assert!(store.read(&EntrantId::from("y")).is_none());
    assert_eq!(2, first.diagnostics.default_priors);
    assert_eq!(3, first.diagnostics.prior_only);
    assert!(first.get(&EntrantId::from("y")).unwrap().default_prior);
    assert!(!first.get(&EntrantId::from("x")).unwrap().default_prior);
}

#[test]
fn fused_probabilities_are_renormalised() {
    let store = PriorStore::default();
    let layer = layer(&store);
    let stats = simulate(&[("a", 10.0), ("b", 5.0), ("c", 3.0), ("d", 1.0)]);
    let factors = [
        FusionFactors { track: 1.2, weather: 0.9 },
        FusionFactors { track: 0.8, weather: 1.1 },
        FusionFactors::default(),
        FusionFactors { track: 1.3, weather: 1.3 },
    ];
    let fusion = layer.fuse(&stats, &factors).unwrap();
    assert_probs_sum(1.0, &fusion.win_probs(), 1e-9);
    assert!(!fusion.diagnostics.uniform_fallback);
    for estimate in &fusion.estimates {
        assert!(estimate.win_interval_95.contains(estimate.win_probability));
        assert!(estimate.win_interval_99.width() >= estimate.win_interval_95.width());
        assert!(estimate.position_interval_95.contains(estimate.expected_position));
        assert!((1.0..=4.0).contains(&estimate.expected_position));
    }
}

#[test]
fn blend_of_monte_carlo_and_prior() {
    let store = PriorStore::default();
    let layer = layer(&store);
    let stats = simulate(&[("a", 3.0), ("b", 1.0)]);
    let fusion = layer.fuse(&stats, &[]).unwrap();
    // both default to the midfield prior, so the Bayesian component does not separate them
    let bayes_win = Tier::Midfield.defaults().win_rate;
    let raw: Vec<_> = stats
        .iter()
        .map(|stats| 0.6 * stats.win_probability + 0.4 * bayes_win)
        .collect();
    let total: f64 = raw.iter().sum();
    for (estimate, raw) in fusion.estimates.iter().zip(raw) {
        assert_float_absolute_eq!(raw / total, estimate.win_probability, 1e-12);
        assert_float_absolute_eq!(bayes_win, estimate.bayesian_win_probability, 1e-12);
    }
}

#[test]
fn adjustment_factors_are_clamped() {
    let store = PriorStore::default();
    let layer = layer(&store);
    let stats = simulate(&[("a", 2.0), ("b", 2.0), ("c", 1.0)]);
    let extreme = [
        FusionFactors { track: 25.0, weather: 0.01 },
        FusionFactors::default(),
        FusionFactors::default(),
    ];
    let bounded = [
        FusionFactors { track: 1.3, weather: 0.8 },
        FusionFactors::default(),
        FusionFactors::default(),
    ];
    assert_eq!(
        layer.fuse(&stats, &bounded).unwrap(),
        layer.fuse(&stats, &extreme).unwrap()
    );
}

#[test]
fn single_entrant_is_certain() {
    let store = PriorStore::default();
    let layer = layer(&store);
    let stats = simulate(&[("solo", 4.0)]);
    let fusion = layer.fuse(&stats, &[]).unwrap();
    let estimate = &fusion.estimates[0];
    assert_eq!(1.0, estimate.win_probability);
    assert_eq!(1.0, estimate.expected_position);
    assert_eq!(0.0, estimate.win_interval_95.width());
    assert_eq!(0.0, estimate.win_interval_99.width());
    assert_eq!(0.0, estimate.position_interval_99.width());
}

#[test]
fn outcome_incorporates_evidence() {
    let store = PriorStore::default();
    let layer = layer(&store);
    let entrants = [
        (EntrantId::from("a"), Tier::Elite),
        (EntrantId::from("b"), Tier::Midfield),
        (EntrantId::from("c"), Tier::Developing),
    ];
    layer.initialise_priors(&entrants, &FxHashMap::default());
    let stats = simulate(&[("a", 3.0), ("b", 2.0), ("c", 1.0)]);

    let prior = layer.fuse(&stats, &[]).unwrap();
    for estimate in &prior.estimates {
        assert!(estimate.prior_only);
        assert_eq!(0.0, estimate.evidence_strength);
        assert_eq!(0.0, estimate.convergence);
        assert!(estimate.uncertainty >= 0.75);
    }

    let outcome = EventOutcome::new("gp-1", ids(&["c", "a", "b"])).with_non_finishers(ids(&["b"]));
    let posterior = layer.update_and_fuse(&stats, &[], Some(&outcome)).unwrap();
    assert_eq!(3, posterior.diagnostics.updated);
    assert_eq!(0, posterior.diagnostics.prior_only);
    for estimate in &posterior.estimates {
        assert!(!estimate.prior_only);
        assert_float_absolute_eq!(0.1, estimate.evidence_strength);
        assert_float_absolute_eq!(0.5, estimate.convergence);
        assert!(estimate.uncertainty < 0.75, "{}", estimate.uncertainty);
    }
    let c_prior = prior.get(&EntrantId::from("c")).unwrap();
    let c_posterior = posterior.get(&EntrantId::from("c")).unwrap();
    assert!(c_posterior.bayesian_win_probability > c_prior.bayesian_win_probability);
    let b_prior = prior.get(&EntrantId::from("b")).unwrap();
    let b_posterior = posterior.get(&EntrantId::from("b")).unwrap();
    assert!(b_posterior.expected_reliability < b_prior.expected_reliability);
    assert_probs_sum(1.0, &posterior.win_probs(), 1e-9);
}

#[test]
fn outcome_resolves_once() {
    let store = PriorStore::default();
    let layer = layer(&store);
    let outcome = EventOutcome::new("gp-2", ids(&["a", "b"]));
    layer.update(&outcome).unwrap();
    assert_eq!(
        Err(OutcomeError::AlreadyResolved("gp-2".into())),
        layer.update(&outcome)
    );
    assert_eq!(1, store.read(&EntrantId::from("a")).unwrap().events_observed);
}

#[test]
fn missing_history_initialises_default_prior() {
    let store = PriorStore::default();
    let layer = layer(&store);
    layer.initialise_priors(&[(EntrantId::from("a"), Tier::Elite)], &FxHashMap::default());
    let summary = layer
        .update(&EventOutcome::new("gp-3", ids(&["newcomer", "a"])))
        .unwrap();
    assert_eq!(1, summary.default_priors);
    let newcomer = store.read(&EntrantId::from("newcomer")).unwrap();
    assert_eq!(belief::PriorSource::Tier(Tier::Midfield), newcomer.source);
    assert_eq!(1, newcomer.events_observed);
}

#[test]
fn invalid_outcomes() {
    let store = PriorStore::default();
    let layer = layer(&store);
    assert_eq!(
        Err(OutcomeError::EmptyOrder("e".into())),
        layer.update(&EventOutcome::new("e", vec![]))
    );
    assert_eq!(
        Err(OutcomeError::DuplicateEntrant {
            event_id: "d".into(),
            entrant: "a".into()
        }),
        layer.update(&EventOutcome::new("d", ids(&["a", "b", "a"])))
    );
    assert_eq!(
        Err(OutcomeError::UnknownNonFinisher {
            event_id: "u".into(),
            entrant: "z".into()
        }),
        layer.update(&EventOutcome::new("u", ids(&["a"])).with_non_finishers(ids(&["z"])))
    );
    assert!(store.is_empty());
    assert!(!store.is_resolved("d"));
}

#[test]
fn initialise_from_history_and_tiers() {
    let store = PriorStore::default();
    let layer = layer(&store);
    store.insert(
        EntrantId::from("kept"),
        ConjugatePriorState::from_tier(Tier::Elite, &PriorDefaults::default()),
    );
    let mut history = FxHashMap::default();
    let mut veteran = EntrantHistory::default();
    veteran.record(1, true);
    veteran.record(2, true);
    history.insert(EntrantId::from("veteran"), veteran);
    history.insert(EntrantId::from("rookie"), EntrantHistory::default());

    let summary = layer.initialise_priors(
        &[
            (EntrantId::from("kept"), Tier::Developing),
            (EntrantId::from("veteran"), Tier::Midfield),
            (EntrantId::from("rookie"), Tier::Strong),
        ],
        &history,
    );
    assert_eq!(
        PriorInitialisation {
            from_history: 1,
            from_tier: 1,
            existing: 1
        },
        summary
    );
    assert_eq!(
        belief::PriorSource::Tier(Tier::Elite),
        store.read(&EntrantId::from("kept")).unwrap().source
    );
    assert_eq!(
        belief::PriorSource::History,
        store.read(&EntrantId::from("veteran")).unwrap().source
    );
}

#[test]
fn invalid_configuration() {
    let store = PriorStore::default();
    let err = BayesianLayer::new(
        &store,
        BayesConfig::default(),
        FusionConfig {
            monte_carlo_weight: 0.0,
            bayesian_weight: 0.0,
            ..FusionConfig::default()
        },
    )
    .unwrap_err();
    assert_eq!(
        "invalid configuration: at least one fusion weight must be positive",
        err.to_string()
    );

    let err = BayesianLayer::new(
        &store,
        BayesConfig::default(),
        FusionConfig {
            track_bounds: 1.3..=0.7,
            ..FusionConfig::default()
        },
    )
    .unwrap_err();
    assert_eq!(
        "invalid configuration: track bounds must be positive and ordered, got 1.3..=0.7",
        err.to_string()
    );

    let layer = layer(&store);
    let stats = simulate(&[("a", 1.0), ("b", 1.0)]);
    let err = layer.fuse(&stats, &[FusionFactors::default()]).unwrap_err();
    assert_eq!(
        "invalid configuration: expected 2 fusion factors, got 1",
        err.to_string()
    );
    let err = layer.fuse(&[], &[]).unwrap_err();
    assert!(matches!(err, BayesError::InvalidConfiguration(_)));
}

#[test]
fn concurrent_updates_for_distinct_events() {
    let store = PriorStore::default();
    let layer = layer(&store);
    thread::scope(|scope| {
        for worker in 0..4 {
            let layer = &layer;
            scope.spawn(move || {
                for event in 0..25 {
                    let outcome = EventOutcome::new(
                        format!("w{worker}-e{event}"),
                        ids(&["a", "b", "c"]),
                    );
                    layer.update(&outcome).unwrap();
                }
            });
        }
    });
    let a = store.read(&EntrantId::from("a")).unwrap();
    assert_eq!(100, a.events_observed);
    let prior = ConjugatePriorState::from_tier(Tier::Midfield, &PriorDefaults::default());
    assert_float_absolute_eq!(prior.win.alpha + 100.0, a.win.alpha, 1e-9);
    assert_float_absolute_eq!(prior.win.beta, a.win.beta, 1e-9);
}
