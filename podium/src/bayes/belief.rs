//! Conjugate beliefs held per entrant across events.

use std::ops::RangeInclusive;

use anyhow::bail;
use ordinalizer::Ordinal;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, Gamma};
use strum_macros::{Display, EnumCount, EnumIter, EnumString};

use crate::interval::Intervals;

const PROBABILITY_SUPPORT: RangeInclusive<f64> = 0.0..=1.0;

/// Beta(α, β) belief over the probability of winning an event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaBelief {
    pub alpha: f64,
    pub beta: f64,
}
impl BetaBelief {
    /// A belief centred on `mean`, worth `strength` pseudo-observations.
    pub fn from_mean(mean: f64, strength: f64) -> Self {
        Self {
            alpha: mean * strength,
            beta: (1.0 - mean) * strength,
        }
    }

    pub fn mean(&self) -> f64 {
        self.alpha / self.pseudo_count()
    }

    pub fn variance(&self) -> f64 {
        let total = self.pseudo_count();
        self.alpha * self.beta / (total * total * (total + 1.0))
    }

    pub fn pseudo_count(&self) -> f64 {
        self.alpha + self.beta
    }

    /// Beta-Binomial update with `wins` out of `events`.
    pub fn update(&mut self, wins: u64, events: u64) {
        debug_assert!(wins <= events);
        self.alpha += wins as f64;
        self.beta += (events - wins) as f64;
    }

    pub fn observe(&mut self, won: bool) {
        self.update(u64::from(won), 1);
    }

    /// Equal-tailed credible intervals from the Beta quantiles. Parameters that statrs rejects fall
    /// back to a normal approximation.
    pub fn intervals(&self) -> Intervals {
        match Beta::new(self.alpha, self.beta) {
            Ok(distribution) => Intervals::quantiles(&distribution, PROBABILITY_SUPPORT),
            Err(_) => Intervals::normal(self.mean(), self.variance().sqrt(), PROBABILITY_SUPPORT),
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(self.alpha > 0.0 && self.alpha.is_finite()) || !(self.beta > 0.0 && self.beta.is_finite()) {
            bail!("beta parameters must be finite and positive, got ({}, {})", self.alpha, self.beta);
        }
        Ok(())
    }
}

/// Normal(μ, σ) belief over the entrant's finishing position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalBelief {
    pub mean: f64,
    pub std_dev: f64,
}
impl NormalBelief {
    pub fn precision(&self) -> f64 {
        1.0 / self.std_dev.powi(2)
    }

    /// Normal-Normal update: the prior and the `observation` are combined by precision weighting.
    pub fn update(&mut self, observation: f64, observation_variance: f64) {
        let prior_precision = self.precision();
        let observation_precision = 1.0 / observation_variance;
        let posterior_precision = prior_precision + observation_precision;
        self.mean = (self.mean * prior_precision + observation * observation_precision) / posterior_precision;
        self.std_dev = posterior_precision.recip().sqrt();
    }

    pub fn intervals(&self, support: RangeInclusive<f64>) -> Intervals {
        Intervals::normal(self.mean, self.std_dev, support)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.mean.is_finite() || !(self.std_dev > 0.0 && self.std_dev.is_finite()) {
            bail!(
                "normal belief requires a finite mean and a positive standard deviation, got ({}, {})",
                self.mean,
                self.std_dev
            );
        }
        Ok(())
    }
}

/// Gamma(k, θ) belief over the entrant's reliability multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaBelief {
    pub shape: f64,
    pub scale: f64,
}
impl GammaBelief {
    /// A belief with the given `mean`, worth `strength` pseudo-observations.
    pub fn from_mean(mean: f64, strength: f64) -> Self {
        Self {
            shape: strength,
            scale: mean / strength,
        }
    }

    pub fn mean(&self) -> f64 {
        self.shape * self.scale
    }

    pub fn variance(&self) -> f64 {
        self.shape * self.scale.powi(2)
    }

    /// Increments the shape by one and rescales so that the mean becomes the running average of
    /// the prior mean (weighted by the prior shape) and the new `observation`.
    pub fn update(&mut self, observation: f64) {
        let shape = self.shape + 1.0;
        let mean = (self.mean() * self.shape + observation) / shape;
        self.shape = shape;
        self.scale = mean / shape;
    }

    pub fn intervals(&self) -> Intervals {
        match Gamma::new(self.shape, self.scale.recip()) {
            Ok(distribution) => Intervals::quantiles(&distribution, PROBABILITY_SUPPORT),
            Err(_) => Intervals::normal(self.mean(), self.variance().sqrt(), PROBABILITY_SUPPORT),
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(self.shape > 0.0 && self.shape.is_finite()) || !(self.scale > 0.0 && self.scale.is_finite()) {
            bail!("gamma parameters must be finite and positive, got ({}, {})", self.shape, self.scale);
        }
        Ok(())
    }
}

/// Coarse strength categories for entrants without history.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Ordinal,
    EnumCount,
    EnumIter,
    EnumString,
    Display,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Elite,
    Strong,
    #[default]
    Midfield,
    Developing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierDefaults {
    pub win_rate: f64,
    pub expected_position: f64,
    pub reliability: f64,
}

impl Tier {
    pub fn defaults(&self) -> TierDefaults {
        match self {
            Tier::Elite => TierDefaults {
                win_rate: 0.25,
                expected_position: 3.0,
                reliability: 0.95,
            },
            Tier::Strong => TierDefaults {
                win_rate: 0.08,
                expected_position: 6.0,
                reliability: 0.92,
            },
            Tier::Midfield => TierDefaults {
                win_rate: 0.02,
                expected_position: 11.0,
                reliability: 0.9,
            },
            Tier::Developing => TierDefaults {
                win_rate: 0.005,
                expected_position: 16.0,
                reliability: 0.85,
            },
        }
    }
}

/// Summary of an entrant's resolved events, used to fit a prior.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntrantHistory {
    pub events: u64,
    pub wins: u64,
    /// Events in which the entrant was classified as a finisher.
    pub finishes: u64,
    /// Finishing positions over all events, one per event.
    pub positions: Vec<f64>,
}
impl EntrantHistory {
    pub fn record(&mut self, position: usize, finished: bool) {
        self.events += 1;
        if position == 1 {
            self.wins += 1;
        }
        if finished {
            self.finishes += 1;
        }
        self.positions.push(position as f64);
    }
}

const MAX_HISTORY_STRENGTH: u64 = 20;
const MIN_HISTORY_STRENGTH: u64 = 2;
const MIN_POSITION_STD_DEV: f64 = 0.5;

/// Prior settings shared by every entrant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorDefaults {
    /// Pseudo-observation count behind a tier-derived prior.
    pub prior_strength: f64,
    /// Standard deviation of a tier-derived position belief.
    pub position_std_dev: f64,
}
impl PriorDefaults {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(self.prior_strength > 0.0 && self.prior_strength.is_finite()) {
            bail!("prior strength must be finite and positive, got {}", self.prior_strength);
        }
        if !(self.position_std_dev > 0.0 && self.position_std_dev.is_finite()) {
            bail!(
                "position standard deviation must be finite and positive, got {}",
                self.position_std_dev
            );
        }
        Ok(())
    }
}

impl Default for PriorDefaults {
    fn default() -> Self {
        Self {
            prior_strength: 10.0,
            position_std_dev: 3.0,
        }
    }
}

/// Where a prior came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PriorSource {
    Tier(Tier),
    History,
}

/// The full belief state of one entrant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConjugatePriorState {
    pub win: BetaBelief,
    pub position: NormalBelief,
    pub reliability: GammaBelief,
    pub prior_strength: f64,
    pub events_observed: u64,
    pub source: PriorSource,
    /// Precision of the position belief when the prior was formed.
    pub initial_position_precision: f64,
}
impl ConjugatePriorState {
    pub fn from_tier(tier: Tier, defaults: &PriorDefaults) -> Self {
        let TierDefaults {
            win_rate,
            expected_position,
            reliability,
        } = tier.defaults();
        Self::new(
            BetaBelief::from_mean(win_rate, defaults.prior_strength),
            NormalBelief {
                mean: expected_position,
                std_dev: defaults.position_std_dev,
            },
            GammaBelief::from_mean(reliability, defaults.prior_strength),
            defaults.prior_strength,
            PriorSource::Tier(tier),
        )
    }

    /// Fits a prior to the entrant's `history`. Without any events, the `tier` defaults are used.
    pub fn from_history(history: &EntrantHistory, tier: Tier, defaults: &PriorDefaults) -> Self {
        if history.events == 0 {
            return Self::from_tier(tier, defaults);
        }
        let events = history.events as f64;
        let strength = history.events.clamp(MIN_HISTORY_STRENGTH, MAX_HISTORY_STRENGTH) as f64;
        let win_rate = (history.wins as f64 + 0.5) / (events + 1.0);
        let reliability = (history.finishes as f64 + 0.5) / (events + 1.0);

        let samples = history.positions.len() as f64;
        let position = if history.positions.is_empty() {
            NormalBelief {
                mean: tier.defaults().expected_position,
                std_dev: defaults.position_std_dev,
            }
        } else {
            let mean = history.positions.iter().sum::<f64>() / samples;
            let sample_std_dev = if history.positions.len() > 1 {
                let sum_sq: f64 = history.positions.iter().map(|position| (position - mean).powi(2)).sum();
                (sum_sq / (samples - 1.0)).sqrt()
            } else {
                defaults.position_std_dev
            };
            NormalBelief {
                mean,
                std_dev: f64::max(sample_std_dev / samples.sqrt(), MIN_POSITION_STD_DEV),
            }
        };

        Self::new(
            BetaBelief::from_mean(win_rate, strength),
            position,
            GammaBelief::from_mean(reliability, strength),
            strength,
            PriorSource::History,
        )
    }

    fn new(
        win: BetaBelief,
        position: NormalBelief,
        reliability: GammaBelief,
        prior_strength: f64,
        source: PriorSource,
    ) -> Self {
        Self {
            initial_position_precision: position.precision(),
            win,
            position,
            reliability,
            prior_strength,
            events_observed: 0,
            source,
        }
    }

    /// Applies the outcome of one resolved event.
    pub fn observe(&mut self, position: usize, finished: bool, observation_variance: f64) {
        self.win.observe(position == 1);
        self.position.update(position as f64, observation_variance);
        self.reliability.update(if finished { 1.0 } else { 0.0 });
        self.events_observed += 1;
    }

    /// Share of the position belief's precision contributed by observed events.
    pub fn convergence(&self) -> f64 {
        (1.0 - self.initial_position_precision / self.position.precision()).clamp(0.0, 1.0)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.win.validate()?;
        self.position.validate()?;
        self.reliability.validate()?;
        if !(self.prior_strength > 0.0 && self.prior_strength.is_finite()) {
            bail!("prior strength must be finite and positive, got {}", self.prior_strength);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_float_eq::*;
    use strum::{EnumCount, IntoEnumIterator};

    use super::*;

    #[test]
    fn beta_conjugate_update_is_exact() {
        let mut belief = BetaBelief { alpha: 2.5, beta: 7.5 };
        belief.update(3, 8);
        assert_eq!(5.5, belief.alpha);
        assert_eq!(12.5, belief.beta);

        let mut sequential = BetaBelief { alpha: 2.5, beta: 7.5 };
        for won in [true, false, false, true, false, true, false, false] {
            sequential.observe(won);
        }
        assert_eq!(belief, sequential);
    }

    #[test]
    fn beta_moments() {
        let belief = BetaBelief::from_mean(0.25, 10.0);
        assert_float_absolute_eq!(2.5, belief.alpha);
        assert_float_absolute_eq!(7.5, belief.beta);
        assert_float_absolute_eq!(0.25, belief.mean());
        assert_float_absolute_eq!(0.25 * 0.75 / 11.0, belief.variance());
        let intervals = belief.intervals();
        assert!(intervals.p95.contains(0.25));
        assert!(intervals.p99.width() > intervals.p95.width());
        assert!(intervals.p99.lower >= 0.0);
    }

    #[test]
    fn beta_intervals_are_exact_quantiles() {
        // Beta(1, 1) is uniform
        let uniform = BetaBelief { alpha: 1.0, beta: 1.0 }.intervals();
        assert_float_absolute_eq!(0.025, uniform.p95.lower, 1e-3);
        assert_float_absolute_eq!(0.975, uniform.p95.upper, 1e-3);
        assert_float_absolute_eq!(0.005, uniform.p99.lower, 1e-3);
        assert_float_absolute_eq!(0.995, uniform.p99.upper, 1e-3);

        // Beta(2, 1) has CDF x², so the quantiles are square roots
        let skewed = BetaBelief { alpha: 2.0, beta: 1.0 }.intervals();
        assert_float_absolute_eq!(0.025f64.sqrt(), skewed.p95.lower, 1e-3);
        assert_float_absolute_eq!(0.975f64.sqrt(), skewed.p95.upper, 1e-3);

        // a long right tail is not cut short, which a symmetric interval would do
        let longshot = BetaBelief::from_mean(0.02, 10.0);
        let intervals = longshot.intervals();
        assert!(intervals.p99.upper - longshot.mean() > longshot.mean() - intervals.p99.lower);
    }

    #[test]
    fn gamma_intervals_are_exact_quantiles() {
        // shape 1 is exponential with rate 1/θ, whose quantile is -θ ln(1 - p)
        let belief = GammaBelief { shape: 1.0, scale: 0.1 };
        let intervals = belief.intervals();
        assert_float_absolute_eq!(-0.1 * 0.975f64.ln(), intervals.p95.lower, 1e-3);
        assert_float_absolute_eq!(-0.1 * 0.025f64.ln(), intervals.p95.upper, 1e-3);
        assert_float_absolute_eq!(-0.1 * 0.005f64.ln(), intervals.p99.upper, 1e-3);
        assert!(intervals.p99.lower < intervals.p95.lower);
    }

    #[test]
    fn normal_update_is_precision_weighted() {
        let mut belief = NormalBelief { mean: 6.0, std_dev: 3.0 };
        belief.update(2.0, 9.0);
        assert_float_absolute_eq!(4.0, belief.mean);
        assert_float_absolute_eq!((9.0f64 / 2.0).sqrt(), belief.std_dev);

        let mut tight = NormalBelief { mean: 6.0, std_dev: 0.5 };
        tight.update(2.0, 9.0);
        assert!(tight.mean > 5.5, "{}", tight.mean);
    }

    #[test]
    fn gamma_update_tracks_running_average() {
        let mut belief = GammaBelief::from_mean(0.9, 10.0);
        assert_float_absolute_eq!(0.9, belief.mean());
        belief.update(0.0);
        assert_eq!(11.0, belief.shape);
        assert_float_absolute_eq!(9.0 / 11.0, belief.mean());
        assert!(belief.scale > 0.0);
        belief.update(1.0);
        assert_float_absolute_eq!(10.0 / 12.0, belief.mean());
    }

    #[test]
    fn tiers_are_ordered_by_strength() {
        assert_eq!(4, Tier::COUNT);
        let defaults: Vec<_> = Tier::iter().map(|tier| tier.defaults()).collect();
        for pair in defaults.windows(2) {
            assert!(pair[0].win_rate > pair[1].win_rate);
            assert!(pair[0].expected_position < pair[1].expected_position);
            assert!(pair[0].reliability > pair[1].reliability);
        }
        assert_eq!(0, Tier::Elite.ordinal());
        assert_eq!(Tier::Strong, "strong".parse().unwrap());
        assert_eq!("developing", Tier::Developing.to_string());
    }

    #[test]
    fn tier_prior() {
        let state = ConjugatePriorState::from_tier(Tier::Strong, &PriorDefaults::default());
        assert_float_absolute_eq!(0.08, state.win.mean());
        assert_float_absolute_eq!(10.0, state.win.pseudo_count());
        assert_eq!(6.0, state.position.mean);
        assert_eq!(3.0, state.position.std_dev);
        assert_float_absolute_eq!(0.92, state.reliability.mean());
        assert_eq!(PriorSource::Tier(Tier::Strong), state.source);
        assert_eq!(0.0, state.convergence());
        state.validate().unwrap();
    }

    #[test]
    fn history_prior() {
        let mut history = EntrantHistory::default();
        for (position, finished) in [(1, true), (3, true), (2, true), (20, false)] {
            history.record(position, finished);
        }
        let state = ConjugatePriorState::from_history(&history, Tier::Midfield, &PriorDefaults::default());
        assert_eq!(PriorSource::History, state.source);
        assert_eq!(4.0, state.prior_strength);
        assert_float_absolute_eq!(1.5 / 5.0, state.win.mean());
        assert_float_absolute_eq!(3.5 / 5.0, state.reliability.mean());
        assert_float_absolute_eq!(6.5, state.position.mean);
        assert!(state.position.std_dev >= MIN_POSITION_STD_DEV);
        state.validate().unwrap();
    }

    #[test]
    fn history_prior_bounds_strength() {
        let mut history = EntrantHistory::default();
        history.record(4, true);
        let state = ConjugatePriorState::from_history(&history, Tier::Elite, &PriorDefaults::default());
        assert_eq!(2.0, state.prior_strength);
        assert_eq!(4.0, state.position.mean);
        assert_float_absolute_eq!(3.0, state.position.std_dev);

        for _ in 0..99 {
            history.record(1, true);
        }
        let state = ConjugatePriorState::from_history(&history, Tier::Elite, &PriorDefaults::default());
        assert_eq!(20.0, state.prior_strength);
        assert_eq!(MIN_POSITION_STD_DEV, state.position.std_dev);
    }

    #[test]
    fn empty_history_uses_tier() {
        let state = ConjugatePriorState::from_history(
            &EntrantHistory::default(),
            Tier::Developing,
            &PriorDefaults::default(),
        );
        assert_eq!(PriorSource::Tier(Tier::Developing), state.source);
    }

    #[test]
    fn observe_and_converge() {
        let mut state = ConjugatePriorState::from_tier(Tier::Midfield, &PriorDefaults::default());
        state.observe(1, true, 9.0);
        state.observe(14, false, 9.0);
        assert_eq!(2, state.events_observed);
        assert_float_absolute_eq!(0.2 + 1.0, state.win.alpha);
        assert_float_absolute_eq!(9.8 + 1.0, state.win.beta);
        // prior precision 1/9 plus two observations of precision 1/9
        assert_float_absolute_eq!(2.0 / 3.0, state.convergence());
        assert!(state.reliability.mean() < 0.9);
        state.validate().unwrap();
    }

    #[test]
    fn invalid_beliefs() {
        assert!(BetaBelief { alpha: 0.0, beta: 1.0 }.validate().is_err());
        assert!(NormalBelief { mean: 1.0, std_dev: 0.0 }.validate().is_err());
        assert!(GammaBelief { shape: 1.0, scale: f64::NAN }.validate().is_err());
    }
}
