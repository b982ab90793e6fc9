//! Bayesian beliefs about each entrant, amended as events resolve and fused with the Monte Carlo
//! estimate of an upcoming event.
//!
//! Each entrant carries a Beta belief over winning, a Normal belief over finishing position and a
//! Gamma belief over reliability. The served estimate blends the Monte Carlo and Bayesian point
//! estimates with fixed weights, scales the win probability by bounded track and weather factors,
//! and renormalises across the field.

use std::ops::RangeInclusive;

use anyhow::bail;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::entrant::EntrantId;
use crate::error::InvalidConfiguration;
use crate::interval::{Interval, Intervals};
use crate::mc::EntrantAggregateStats;
use crate::probs::{Normalisation, SliceExt};

pub mod belief;
pub mod store;

use belief::{ConjugatePriorState, EntrantHistory, PriorDefaults, Tier};
use store::PriorStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BayesConfig {
    #[serde(default)]
    pub priors: PriorDefaults,
    /// Variance of an observed finishing position in the Normal-Normal update.
    pub observation_variance: f64,
    /// Tier assumed for an entrant that has no prior.
    #[serde(default)]
    pub default_tier: Tier,
    /// Lower bound of the uncertainty score when no outcome has been incorporated.
    pub prior_only_uncertainty: f64,
}
impl BayesConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.priors.validate()?;
        if !(self.observation_variance > 0.0 && self.observation_variance.is_finite()) {
            bail!(
                "observation variance must be finite and positive, got {}",
                self.observation_variance
            );
        }
        if !(0.0..=1.0).contains(&self.prior_only_uncertainty) {
            bail!(
                "prior-only uncertainty must be in [0, 1], got {}",
                self.prior_only_uncertainty
            );
        }
        Ok(())
    }
}

impl Default for BayesConfig {
    fn default() -> Self {
        Self {
            priors: PriorDefaults::default(),
            observation_variance: 9.0,
            default_tier: Tier::default(),
            prior_only_uncertainty: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    pub monte_carlo_weight: f64,
    pub bayesian_weight: f64,
    pub track_bounds: RangeInclusive<f64>,
    pub weather_bounds: RangeInclusive<f64>,
}
impl FusionConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for (name, weight) in [
            ("monte carlo", self.monte_carlo_weight),
            ("bayesian", self.bayesian_weight),
        ] {
            if !(weight >= 0.0 && weight.is_finite()) {
                bail!("{name} weight must be finite and non-negative, got {weight}");
            }
        }
        if self.monte_carlo_weight + self.bayesian_weight <= 0.0 {
            bail!("at least one fusion weight must be positive");
        }
        for (name, bounds) in [("track", &self.track_bounds), ("weather", &self.weather_bounds)] {
            let (start, end) = (*bounds.start(), *bounds.end());
            if !(start > 0.0 && start <= end && end.is_finite()) {
                bail!("{name} bounds must be positive and ordered, got {start}..={end}");
            }
        }
        Ok(())
    }

    fn weights(&self) -> (f64, f64) {
        let total = self.monte_carlo_weight + self.bayesian_weight;
        (self.monte_carlo_weight / total, self.bayesian_weight / total)
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            monte_carlo_weight: 0.6,
            bayesian_weight: 0.4,
            track_bounds: 0.7..=1.3,
            weather_bounds: 0.8..=1.3,
        }
    }
}

/// Per-entrant adjustment factors applied to the fused win probability before renormalisation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionFactors {
    pub track: f64,
    pub weather: f64,
}
impl Default for FusionFactors {
    fn default() -> Self {
        Self {
            track: 1.0,
            weather: 1.0,
        }
    }
}

/// The realised result of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOutcome {
    pub event_id: String,
    /// Every entrant, winner first. Non-finishers are classified behind the finishers.
    pub finishing_order: Vec<EntrantId>,
    #[serde(default)]
    pub non_finishers: Vec<EntrantId>,
}
impl EventOutcome {
    pub fn new(event_id: impl Into<String>, finishing_order: Vec<EntrantId>) -> Self {
        Self {
            event_id: event_id.into(),
            finishing_order,
            non_finishers: vec![],
        }
    }

    pub fn with_non_finishers(mut self, non_finishers: Vec<EntrantId>) -> Self {
        self.non_finishers = non_finishers;
        self
    }

    pub fn validate(&self) -> Result<(), OutcomeError> {
        if self.finishing_order.is_empty() {
            return Err(OutcomeError::EmptyOrder(self.event_id.clone()));
        }
        let mut seen = FxHashSet::default();
        for entrant in &self.finishing_order {
            if !seen.insert(entrant) {
                return Err(OutcomeError::DuplicateEntrant {
                    event_id: self.event_id.clone(),
                    entrant: entrant.clone(),
                });
            }
        }
        if let Some(entrant) = self.non_finishers.iter().find(|entrant| !seen.contains(entrant)) {
            return Err(OutcomeError::UnknownNonFinisher {
                event_id: self.event_id.clone(),
                entrant: entrant.clone(),
            });
        }
        Ok(())
    }

    pub fn finished(&self, entrant: &EntrantId) -> bool {
        !self.non_finishers.contains(entrant)
    }

    pub fn winner(&self) -> Option<&EntrantId> {
        self.finishing_order.first()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutcomeError {
    #[error("event {0} has an empty finishing order")]
    EmptyOrder(String),

    #[error("entrant {entrant} appears more than once in event {event_id}")]
    DuplicateEntrant { event_id: String, entrant: EntrantId },

    #[error("non-finisher {entrant} is not classified in event {event_id}")]
    UnknownNonFinisher { event_id: String, entrant: EntrantId },

    #[error("event {0} has already been resolved")]
    AlreadyResolved(String),
}

#[derive(Debug, Error)]
pub enum BayesError {
    #[error("{0}")]
    InvalidConfiguration(#[from] InvalidConfiguration),

    #[error("{0}")]
    Outcome(#[from] OutcomeError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorInitialisation {
    pub from_history: usize,
    pub from_tier: usize,
    /// Entrants whose state was already present and left untouched.
    pub existing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub event_id: String,
    pub updated: usize,
    /// Entrants that had no prior and were initialised from the default tier.
    pub default_priors: usize,
}

/// The served estimate for one entrant in one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorEstimate {
    pub entrant: EntrantId,
    pub win_probability: f64,
    pub expected_position: f64,
    pub expected_reliability: f64,
    pub win_interval_95: Interval,
    pub win_interval_99: Interval,
    pub position_interval_95: Interval,
    pub position_interval_99: Interval,
    pub reliability_interval_95: Interval,
    pub reliability_interval_99: Interval,
    pub monte_carlo_win_probability: f64,
    pub bayesian_win_probability: f64,
    pub uncertainty: f64,
    pub evidence_strength: f64,
    pub convergence: f64,
    /// No outcome was incorporated for this entrant by the call that produced the estimate.
    pub prior_only: bool,
    /// The entrant had no prior; a default-tier prior stood in.
    pub default_prior: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionDiagnostics {
    pub entrants: usize,
    pub updated: usize,
    pub default_priors: usize,
    pub prior_only: usize,
    /// The fused win probabilities had no usable mass and were replaced with a uniform vector.
    pub uniform_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fusion {
    pub estimates: Vec<PosteriorEstimate>,
    pub diagnostics: FusionDiagnostics,
}
impl Fusion {
    pub fn win_probs(&self) -> Vec<f64> {
        self.estimates
            .iter()
            .map(|estimate| estimate.win_probability)
            .collect()
    }

    pub fn get(&self, entrant: &EntrantId) -> Option<&PosteriorEstimate> {
        self.estimates
            .iter()
            .find(|estimate| &estimate.entrant == entrant)
    }
}

#[derive(Debug)]
pub struct BayesianLayer<'a> {
    store: &'a PriorStore,
    config: BayesConfig,
    fusion: FusionConfig,
}
impl<'a> BayesianLayer<'a> {
    pub fn new(
        store: &'a PriorStore,
        config: BayesConfig,
        fusion: FusionConfig,
    ) -> Result<Self, InvalidConfiguration> {
        config.validate()?;
        fusion.validate()?;
        Ok(Self {
            store,
            config,
            fusion,
        })
    }

    pub fn store(&self) -> &PriorStore {
        self.store
    }

    pub fn config(&self) -> &BayesConfig {
        &self.config
    }

    pub fn fusion_config(&self) -> &FusionConfig {
        &self.fusion
    }

    /// Creates a prior for every entrant not yet in the store: fitted from `history` where the
    /// entrant has resolved events, otherwise from its tier. Existing state is left untouched.
    pub fn initialise_priors(
        &self,
        entrants: &[(EntrantId, Tier)],
        history: &FxHashMap<EntrantId, EntrantHistory>,
    ) -> PriorInitialisation {
        let mut summary = PriorInitialisation::default();
        for (entrant, tier) in entrants {
            let entrant_history = history.get(entrant).filter(|history| history.events > 0);
            let (_, created) = self.store.get_or_insert_with(entrant, || match entrant_history {
                Some(history) => {
                    ConjugatePriorState::from_history(history, *tier, &self.config.priors)
                }
                None => ConjugatePriorState::from_tier(*tier, &self.config.priors),
            });
            match (created, entrant_history) {
                (false, _) => summary.existing += 1,
                (true, Some(_)) => summary.from_history += 1,
                (true, None) => summary.from_tier += 1,
            }
        }
        debug!("initialised priors: {summary:?}");
        summary
    }

    /// Applies the conjugate updates for a resolved event.
    pub fn update(&self, outcome: &EventOutcome) -> Result<UpdateSummary, OutcomeError> {
        let (summary, _) = self.apply(outcome)?;
        Ok(summary)
    }

    /// Updates the beliefs with `outcome` if supplied, then fuses them with the Monte Carlo
    /// statistics of the event. Without an outcome the posterior is the prior.
    pub fn update_and_fuse(
        &self,
        stats: &[EntrantAggregateStats],
        factors: &[FusionFactors],
        outcome: Option<&EventOutcome>,
    ) -> Result<Fusion, BayesError> {
        validate_fusion_inputs(stats, factors).map_err(InvalidConfiguration)?;
        let (updated_defaults, growth) = match outcome {
            Some(outcome) => {
                let (summary, growth) = self.apply(outcome)?;
                (summary.default_priors, growth)
            }
            None => (0, FxHashMap::default()),
        };
        let mut fusion = self.fuse_validated(stats, factors, &growth);
        fusion.diagnostics.default_priors += updated_defaults;
        Ok(fusion)
    }

    /// Fuses the current beliefs with the Monte Carlo statistics without amending any state.
    pub fn fuse(
        &self,
        stats: &[EntrantAggregateStats],
        factors: &[FusionFactors],
    ) -> Result<Fusion, BayesError> {
        self.update_and_fuse(stats, factors, None)
    }

    /// The entrant's current state, or a transient default-tier prior if it has none.
    pub fn state_or_default(&self, entrant: &EntrantId) -> (ConjugatePriorState, bool) {
        match self.store.read(entrant) {
            Some(state) => (state, false),
            None => {
                warn!(
                    "no prior for {entrant}; assuming the {} tier",
                    self.config.default_tier
                );
                (self.default_state(), true)
            }
        }
    }

    fn default_state(&self) -> ConjugatePriorState {
        ConjugatePriorState::from_tier(self.config.default_tier, &self.config.priors)
    }

    /// Returns the summary and, per updated entrant, the growth of its win pseudo-count.
    fn apply(
        &self,
        outcome: &EventOutcome,
    ) -> Result<(UpdateSummary, FxHashMap<EntrantId, f64>), OutcomeError> {
        outcome.validate()?;
        if !self.store.mark_resolved(&outcome.event_id) {
            return Err(OutcomeError::AlreadyResolved(outcome.event_id.clone()));
        }

        let mut default_priors = 0;
        let mut growth = FxHashMap::default();
        for (index, entrant) in outcome.finishing_order.iter().enumerate() {
            let (state, created) = self
                .store
                .get_or_insert_with(entrant, || self.default_state());
            if created {
                warn!(
                    "no history for {entrant} in event {}; initialised a {} tier prior",
                    outcome.event_id, self.config.default_tier
                );
                default_priors += 1;
            }
            let mut state = state.write();
            let pseudo_count = state.win.pseudo_count();
            state.observe(
                index + 1,
                outcome.finished(entrant),
                self.config.observation_variance,
            );
            growth.insert(entrant.clone(), state.win.pseudo_count() - pseudo_count);
        }

        let summary = UpdateSummary {
            event_id: outcome.event_id.clone(),
            updated: outcome.finishing_order.len(),
            default_priors,
        };
        debug!("resolved {summary:?}");
        Ok((summary, growth))
    }

    fn fuse_validated(
        &self,
        stats: &[EntrantAggregateStats],
        factors: &[FusionFactors],
        growth: &FxHashMap<EntrantId, f64>,
    ) -> Fusion {
        let entrants = stats.len();
        let field_size = entrants as f64;
        let (mc_weight, bayes_weight) = self.fusion.weights();
        let mut diagnostics = FusionDiagnostics {
            entrants,
            ..FusionDiagnostics::default()
        };

        struct Partial {
            state: ConjugatePriorState,
            default_prior: bool,
            raw_win: f64,
            win_std_dev: f64,
            position: f64,
            position_std_dev: f64,
        }

        let partials: Vec<_> = stats
            .iter()
            .enumerate()
            .map(|(index, stats)| {
                let (state, default_prior) = self.state_or_default(&stats.entrant);
                if default_prior {
                    diagnostics.default_priors += 1;
                }
                let factors = factors.get(index).copied().unwrap_or_default();
                let adjustment = factors.track.clamp(
                    *self.fusion.track_bounds.start(),
                    *self.fusion.track_bounds.end(),
                ) * factors.weather.clamp(
                    *self.fusion.weather_bounds.start(),
                    *self.fusion.weather_bounds.end(),
                );

                let mc_win = stats.win_probability;
                let mc_win_variance = mc_win * (1.0 - mc_win) / stats.trials as f64;
                let raw_win = (mc_weight * mc_win + bayes_weight * state.win.mean()) * adjustment;
                let win_std_dev = (mc_weight.powi(2) * mc_win_variance
                    + bayes_weight.powi(2) * state.win.variance())
                .sqrt()
                    * adjustment;

                let position = (mc_weight * stats.expected_position
                    + bayes_weight * state.position.mean)
                    .clamp(1.0, field_size);
                let position_std_dev = (mc_weight.powi(2) * stats.position_variance
                    + bayes_weight.powi(2) * state.position.std_dev.powi(2))
                .sqrt();

                Partial {
                    state,
                    default_prior,
                    raw_win,
                    win_std_dev,
                    position,
                    position_std_dev,
                }
            })
            .collect();

        let mut win_probs: Vec<_> = partials.iter().map(|partial| partial.raw_win).collect();
        let normalisation = win_probs.normalise_or_uniform();
        diagnostics.uniform_fallback = normalisation.is_uniform();

        let estimates = stats
            .iter()
            .zip(partials)
            .zip(win_probs)
            .map(|((stats, partial), win_probability)| {
                let Partial {
                    state,
                    default_prior,
                    raw_win,
                    win_std_dev,
                    position,
                    position_std_dev,
                } = partial;
                let evidence = growth.get(&stats.entrant).copied();
                let prior_only = evidence.is_none();
                if prior_only {
                    diagnostics.prior_only += 1;
                } else {
                    diagnostics.updated += 1;
                }

                let (win_intervals, expected_position, position_intervals) = if entrants == 1 {
                    (Intervals::point(1.0), 1.0, Intervals::point(1.0))
                } else {
                    let win_intervals = match normalisation {
                        Normalisation::Scaled(sum) => {
                            Intervals::normal(raw_win, win_std_dev, 0.0..=f64::INFINITY)
                                .scale(sum.recip())
                                .clip(0.0..=1.0)
                        }
                        Normalisation::Uniform => Intervals::point(win_probability),
                    };
                    (
                        win_intervals,
                        position,
                        Intervals::normal(position, position_std_dev, 1.0..=field_size),
                    )
                };
                let reliability_intervals = state.reliability.intervals();

                let beta_term = 2.0 * state.win.variance().sqrt();
                let position_term = state.position.std_dev / field_size;
                let mut uncertainty = ((beta_term + position_term) / 2.0).clamp(0.0, 1.0);
                if prior_only {
                    uncertainty = f64::max(uncertainty, self.config.prior_only_uncertainty);
                }
                let evidence_strength = evidence
                    .map(|growth| (growth / state.prior_strength).clamp(0.0, 1.0))
                    .unwrap_or(0.0);

                PosteriorEstimate {
                    entrant: stats.entrant.clone(),
                    win_probability,
                    expected_position,
                    expected_reliability: state.reliability.mean(),
                    win_interval_95: win_intervals.p95,
                    win_interval_99: win_intervals.p99,
                    position_interval_95: position_intervals.p95,
                    position_interval_99: position_intervals.p99,
                    reliability_interval_95: reliability_intervals.p95,
                    reliability_interval_99: reliability_intervals.p99,
                    monte_carlo_win_probability: stats.win_probability,
                    bayesian_win_probability: state.win.mean(),
                    uncertainty,
                    evidence_strength,
                    convergence: state.convergence(),
                    prior_only,
                    default_prior,
                }
            })
            .collect::<Vec<_>>();

        Fusion {
            estimates,
            diagnostics,
        }
    }
}

fn validate_fusion_inputs(
    stats: &[EntrantAggregateStats],
    factors: &[FusionFactors],
) -> Result<(), anyhow::Error> {
    if stats.is_empty() {
        bail!("at least one entrant must be specified");
    }
    if !factors.is_empty() && factors.len() != stats.len() {
        bail!(
            "expected {} fusion factors, got {}",
            stats.len(),
            factors.len()
        );
    }
    if let Some(stats) = stats.iter().find(|stats| stats.trials == 0) {
        bail!("no effective trials for {}", stats.entrant);
    }
    for factor in factors {
        for value in [factor.track, factor.weather] {
            if !(value > 0.0 && value.is_finite()) {
                bail!("fusion factors must be finite and positive, got {value}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
