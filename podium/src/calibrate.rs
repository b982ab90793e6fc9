//! Post-hoc correction of raw win probabilities, and an offline search for the corrections that
//! best explain historical outcomes.
//!
//! A [CalibrationParameterSet] is applied to one event's raw probabilities as a fixed pipeline:
//! temperature scaling, optional logistic recalibration, per-entrant and per-group multipliers,
//! a per-track dispersion exponent, and finally renormalisation.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::entrant::EntrantId;
use crate::error::InvalidConfiguration;
use crate::probs::{Normalisation, SliceExt};

pub mod artifact;
pub mod search;

/// Lower clamp of a probability before taking its logarithm.
pub const PROBABILITY_FLOOR: f64 = 1e-12;

const TEMPERATURE_KEY: &str = "temperature";
const SLOPE_KEY: &str = "logistic.slope";
const INTERCEPT_KEY: &str = "logistic.intercept";
const GROUP_PREFIX: &str = "group.";
const ENTRANT_PREFIX: &str = "entrant.";
const TRACK_PREFIX: &str = "track.";

/// A named correction factor. The string form is the key under which the factor is stored in a
/// [CalibrationParameterSet].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CorrectionFactor {
    Temperature,
    LogisticSlope,
    LogisticIntercept,
    Group(String),
    Entrant(EntrantId),
    /// Dispersion exponent for events held on the given track type.
    Track(String),
}
impl CorrectionFactor {
    /// The value at which the factor leaves probabilities unchanged.
    pub fn identity(&self) -> f64 {
        match self {
            CorrectionFactor::LogisticIntercept => 0.0,
            _ => 1.0,
        }
    }

    /// Whether the factor must remain strictly positive.
    pub fn is_positive(&self) -> bool {
        !matches!(self, CorrectionFactor::LogisticIntercept)
    }
}

impl Display for CorrectionFactor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrectionFactor::Temperature => write!(f, "{TEMPERATURE_KEY}"),
            CorrectionFactor::LogisticSlope => write!(f, "{SLOPE_KEY}"),
            CorrectionFactor::LogisticIntercept => write!(f, "{INTERCEPT_KEY}"),
            CorrectionFactor::Group(group) => write!(f, "{GROUP_PREFIX}{group}"),
            CorrectionFactor::Entrant(entrant) => write!(f, "{ENTRANT_PREFIX}{entrant}"),
            CorrectionFactor::Track(track) => write!(f, "{TRACK_PREFIX}{track}"),
        }
    }
}

impl FromStr for CorrectionFactor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let named = |prefix: &str| {
            s.strip_prefix(prefix)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        };
        match s {
            TEMPERATURE_KEY => Ok(CorrectionFactor::Temperature),
            SLOPE_KEY => Ok(CorrectionFactor::LogisticSlope),
            INTERCEPT_KEY => Ok(CorrectionFactor::LogisticIntercept),
            _ => {
                if let Some(group) = named(GROUP_PREFIX) {
                    Ok(CorrectionFactor::Group(group))
                } else if let Some(entrant) = named(ENTRANT_PREFIX) {
                    Ok(CorrectionFactor::Entrant(EntrantId::new(entrant)))
                } else if let Some(track) = named(TRACK_PREFIX) {
                    Ok(CorrectionFactor::Track(track))
                } else {
                    Err(anyhow!("unsupported correction factor '{s}'"))
                }
            }
        }
    }
}

impl Serialize for CorrectionFactor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CorrectionFactor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        key.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStatus {
    /// The best loss stopped improving within the patience window.
    Converged,
    ExhaustedBudget,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMetadata {
    pub version: u64,
    /// Combined loss achieved by the factors; absent for a set that was never fitted.
    pub loss: Option<f64>,
    /// Combined loss of the uncorrected probabilities over the same dataset.
    pub baseline_loss: Option<f64>,
    pub trials: u64,
    pub status: Option<CalibrationStatus>,
    pub created: DateTime<Utc>,
}

/// A flat mapping from correction factor keys to values, plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameterSet {
    pub factors: BTreeMap<String, f64>,
    pub metadata: CalibrationMetadata,
}
impl CalibrationParameterSet {
    /// The set that leaves every probability unchanged.
    pub fn identity() -> Self {
        Self {
            factors: BTreeMap::new(),
            metadata: CalibrationMetadata {
                version: 0,
                loss: None,
                baseline_loss: None,
                trials: 0,
                status: None,
                created: Utc::now(),
            },
        }
    }

    pub fn get(&self, factor: &CorrectionFactor) -> f64 {
        self.factors
            .get(&factor.to_string())
            .copied()
            .unwrap_or_else(|| factor.identity())
    }

    pub fn set(&mut self, factor: &CorrectionFactor, value: f64) {
        self.factors.insert(factor.to_string(), value);
    }

    pub fn with_factor(mut self, factor: CorrectionFactor, value: f64) -> Self {
        self.set(&factor, value);
        self
    }

    pub fn is_identity(&self) -> bool {
        self.factors.iter().all(|(key, &value)| {
            key.parse::<CorrectionFactor>()
                .map(|factor| factor.identity() == value)
                .unwrap_or(false)
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for (key, &value) in &self.factors {
            let factor: CorrectionFactor = key.parse()?;
            if !value.is_finite() {
                bail!("{factor} must be finite, got {value}");
            }
            if factor.is_positive() && value <= 0.0 {
                bail!("{factor} must be positive, got {value}");
            }
        }
        Ok(())
    }

    /// Resolves the factors into a form that can be applied without parsing keys.
    pub fn model(&self) -> Result<CorrectionModel, InvalidConfiguration> {
        self.validate()?;
        CorrectionModel::try_from(self).map_err(InvalidConfiguration)
    }
}

/// The factors of a [CalibrationParameterSet] keyed for lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionModel {
    pub temperature: f64,
    /// Slope and intercept of the logistic stage, if any.
    pub logistic: Option<(f64, f64)>,
    pub groups: FxHashMap<String, f64>,
    pub entrants: FxHashMap<EntrantId, f64>,
    pub tracks: FxHashMap<String, f64>,
}
impl Default for CorrectionModel {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            logistic: None,
            groups: FxHashMap::default(),
            entrants: FxHashMap::default(),
            tracks: FxHashMap::default(),
        }
    }
}

impl TryFrom<&CalibrationParameterSet> for CorrectionModel {
    type Error = anyhow::Error;

    fn try_from(set: &CalibrationParameterSet) -> Result<Self, Self::Error> {
        let mut model = CorrectionModel::default();
        for (key, &value) in &set.factors {
            let factor = key
                .parse::<CorrectionFactor>()
                .with_context(|| format!("in parameter set v{}", set.metadata.version))?;
            model.insert(factor, value);
        }
        Ok(model)
    }
}

impl CorrectionModel {
    pub fn insert(&mut self, factor: CorrectionFactor, value: f64) {
        match factor {
            CorrectionFactor::Temperature => self.temperature = value,
            CorrectionFactor::LogisticSlope => {
                self.logistic.get_or_insert((1.0, 0.0)).0 = value;
            }
            CorrectionFactor::LogisticIntercept => {
                self.logistic.get_or_insert((1.0, 0.0)).1 = value;
            }
            CorrectionFactor::Group(group) => {
                self.groups.insert(group, value);
            }
            CorrectionFactor::Entrant(entrant) => {
                self.entrants.insert(entrant, value);
            }
            CorrectionFactor::Track(track) => {
                self.tracks.insert(track, value);
            }
        }
    }

    /// Corrects one event's raw win probabilities in place. Returns how the final vector was
    /// normalised.
    pub fn apply(
        &self,
        entrants: &[CalibrationSample],
        track_type: Option<&str>,
        probs: &mut Vec<f64>,
    ) -> Normalisation {
        probs.clear();
        probs.extend(
            entrants
                .iter()
                .map(|sample| sample.raw_probability.max(PROBABILITY_FLOOR)),
        );

        if self.temperature != 1.0 {
            let exponent = self.temperature.recip();
            for prob in probs.iter_mut() {
                *prob = prob.powf(exponent);
            }
        }
        probs.normalise_or_uniform();

        if let Some((slope, intercept)) = self.logistic {
            for prob in probs.iter_mut() {
                let clamped = prob.clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
                let logit = (clamped / (1.0 - clamped)).ln();
                *prob = sigmoid(slope * logit + intercept);
            }
        }

        for (prob, sample) in probs.iter_mut().zip(entrants) {
            if let Some(multiplier) = self.entrants.get(&sample.entrant) {
                *prob *= multiplier;
            }
            if let Some(multiplier) = sample.group.as_ref().and_then(|group| self.groups.get(group)) {
                *prob *= multiplier;
            }
        }

        if let Some(&dispersion) = track_type.and_then(|track_type| self.tracks.get(track_type)) {
            for prob in probs.iter_mut() {
                *prob = prob.max(PROBABILITY_FLOOR).powf(dispersion);
            }
        }

        probs.normalise_or_uniform()
    }
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// One entrant's raw prediction in a historical event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub entrant: EntrantId,
    #[serde(default)]
    pub group: Option<String>,
    pub raw_probability: f64,
}
impl CalibrationSample {
    pub fn new(entrant: impl Into<String>, raw_probability: f64) -> Self {
        Self {
            entrant: EntrantId::new(entrant),
            group: None,
            raw_probability,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEvent {
    pub event_id: String,
    #[serde(default)]
    pub track_type: Option<String>,
    pub entrants: Vec<CalibrationSample>,
    pub winner: EntrantId,
}
impl CalibrationEvent {
    pub fn winner_index(&self) -> Option<usize> {
        self.entrants
            .iter()
            .position(|sample| sample.entrant == self.winner)
    }
}

/// A fixed snapshot of historical events against which candidate corrections are scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDataset {
    pub events: Vec<CalibrationEvent>,
}
impl CalibrationDataset {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.events.is_empty() {
            bail!("at least one historical event must be specified");
        }
        for event in &self.events {
            if event.entrants.is_empty() {
                bail!("event {} has no entrants", event.event_id);
            }
            if event.winner_index().is_none() {
                bail!(
                    "winner {} of event {} is not among its entrants",
                    event.winner,
                    event.event_id
                );
            }
            for sample in &event.entrants {
                if !(sample.raw_probability >= 0.0 && sample.raw_probability.is_finite()) {
                    bail!(
                        "raw probability of {} in event {} must be finite and non-negative, got {}",
                        sample.entrant,
                        event.event_id,
                        sample.raw_probability
                    );
                }
            }
        }
        Ok(())
    }

    /// Distinct group identifiers, sorted.
    pub fn groups(&self) -> Vec<String> {
        self.distinct(|sample, _| sample.group.clone())
    }

    /// Distinct entrant identifiers, sorted.
    pub fn entrants(&self) -> Vec<EntrantId> {
        self.distinct(|sample, _| Some(sample.entrant.clone()))
    }

    /// Distinct track types, sorted.
    pub fn track_types(&self) -> Vec<String> {
        self.distinct(|_, event| event.track_type.clone())
    }

    fn distinct<T: Ord>(&self, mut key: impl FnMut(&CalibrationSample, &CalibrationEvent) -> Option<T>) -> Vec<T> {
        let mut keys: Vec<_> = self
            .events
            .iter()
            .flat_map(|event| event.entrants.iter().map(move |sample| (sample, event)))
            .filter_map(|(sample, event)| key(sample, event))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub log_loss: f64,
    pub brier: f64,
    pub combined: f64,
    /// Events whose corrected probabilities fell back to uniform.
    pub uniform_events: usize,
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("{0}")]
    InvalidConfiguration(#[from] InvalidConfiguration),

    #[error("calibration was cancelled; the published parameters are unchanged")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mean log loss of the winner plus `brier_weight` times the mean multi-class Brier score.
pub fn loss(model: &CorrectionModel, dataset: &CalibrationDataset, brier_weight: f64) -> LossBreakdown {
    let mut probs = Vec::new();
    let mut breakdown = LossBreakdown::default();
    let mut events = 0;
    for event in &dataset.events {
        let Some(winner) = event.winner_index() else {
            continue;
        };
        let normalisation = model.apply(&event.entrants, event.track_type.as_deref(), &mut probs);
        if normalisation.is_uniform() {
            breakdown.uniform_events += 1;
        }
        breakdown.log_loss -= probs[winner].max(PROBABILITY_FLOOR).ln();
        breakdown.brier += probs
            .iter()
            .enumerate()
            .map(|(index, &prob)| {
                let actual = if index == winner { 1.0 } else { 0.0 };
                (prob - actual).powi(2)
            })
            .sum::<f64>();
        events += 1;
    }
    if events > 0 {
        breakdown.log_loss /= events as f64;
        breakdown.brier /= events as f64;
    }
    breakdown.combined = breakdown.log_loss + brier_weight * breakdown.brier;
    breakdown
}
