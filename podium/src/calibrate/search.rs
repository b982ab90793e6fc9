//! Randomised black-box search over bounded correction factors.
//!
//! Trial 0 scores the identity set, which is the uncorrected baseline. Subsequent trials run in
//! batches of the concurrency degree. Each candidate is drawn from a stream seeded by the trial
//! index: every third trial samples uniformly over the bounds, the rest perturb the best set known
//! at the start of the batch with a shrinking Gaussian step. Because candidates depend only on the
//! batch-start best and ties are broken by trial index, a run is reproducible for a given seed and
//! concurrency degree.

use std::ops::{Range, RangeInclusive};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use chrono::Utc;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calibrate::{
    loss, CalibrationDataset, CalibrationMetadata, CalibrationParameterSet, CalibrationStatus,
    CorrectionFactor, CorrectionModel, LossBreakdown,
};
use crate::error::InvalidConfiguration;
use crate::pool;
use crate::random::{random_unit, standard_normal, stream};
use crate::timed::Timed;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub factor: CorrectionFactor,
    pub bounds: RangeInclusive<f64>,
}
impl Dimension {
    fn range(&self) -> f64 {
        self.bounds.end() - self.bounds.start()
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(*self.bounds.start(), *self.bounds.end())
    }
}

/// Which factors to search and within what bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpaceOptions {
    pub temperature_bounds: RangeInclusive<f64>,
    pub multiplier_bounds: RangeInclusive<f64>,
    pub track_bounds: RangeInclusive<f64>,
    /// Adds a logistic recalibration stage with the given slope and intercept bounds.
    pub logistic: Option<(RangeInclusive<f64>, RangeInclusive<f64>)>,
    pub per_group: bool,
    pub per_entrant: bool,
    pub per_track: bool,
}
impl Default for SearchSpaceOptions {
    fn default() -> Self {
        Self {
            temperature_bounds: 0.5..=2.0,
            multiplier_bounds: 0.5..=2.0,
            track_bounds: 0.75..=1.33,
            logistic: None,
            per_group: true,
            per_entrant: false,
            per_track: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub dimensions: Vec<Dimension>,
}
impl SearchSpace {
    /// Derives the dimensions from the groups, entrants and track types present in `dataset`.
    pub fn for_dataset(dataset: &CalibrationDataset, options: &SearchSpaceOptions) -> Self {
        let mut dimensions = vec![Dimension {
            factor: CorrectionFactor::Temperature,
            bounds: options.temperature_bounds.clone(),
        }];
        if let Some((slope_bounds, intercept_bounds)) = &options.logistic {
            dimensions.push(Dimension {
                factor: CorrectionFactor::LogisticSlope,
                bounds: slope_bounds.clone(),
            });
            dimensions.push(Dimension {
                factor: CorrectionFactor::LogisticIntercept,
                bounds: intercept_bounds.clone(),
            });
        }
        if options.per_group {
            dimensions.extend(dataset.groups().into_iter().map(|group| Dimension {
                factor: CorrectionFactor::Group(group),
                bounds: options.multiplier_bounds.clone(),
            }));
        }
        if options.per_entrant {
            dimensions.extend(dataset.entrants().into_iter().map(|entrant| Dimension {
                factor: CorrectionFactor::Entrant(entrant),
                bounds: options.multiplier_bounds.clone(),
            }));
        }
        if options.per_track {
            dimensions.extend(dataset.track_types().into_iter().map(|track| Dimension {
                factor: CorrectionFactor::Track(track),
                bounds: options.track_bounds.clone(),
            }));
        }
        Self { dimensions }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.dimensions.is_empty() {
            bail!("at least one search dimension must be specified");
        }
        for dimension in &self.dimensions {
            let (start, end) = (*dimension.bounds.start(), *dimension.bounds.end());
            if !start.is_finite() || !end.is_finite() || start >= end {
                bail!(
                    "bounds of {} must be finite and non-empty, got {start}..={end}",
                    dimension.factor
                );
            }
            if dimension.factor.is_positive() && start <= 0.0 {
                bail!(
                    "lower bound of {} must be positive, got {start}",
                    dimension.factor
                );
            }
        }
        Ok(())
    }

    /// The identity values, one per dimension.
    pub fn identity(&self) -> Vec<f64> {
        self.dimensions
            .iter()
            .map(|dimension| dimension.factor.identity())
            .collect()
    }

    pub fn to_parameter_set(&self, values: &[f64]) -> CalibrationParameterSet {
        let mut set = CalibrationParameterSet::identity();
        for (dimension, &value) in self.dimensions.iter().zip(values) {
            set.set(&dimension.factor, value);
        }
        set
    }

    pub fn to_model(&self, values: &[f64]) -> CorrectionModel {
        let mut model = CorrectionModel::default();
        for (dimension, &value) in self.dimensions.iter().zip(values) {
            model.insert(dimension.factor.clone(), value);
        }
        model
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimiserConfig {
    /// Total number of trials, including the baseline.
    pub trials: u64,
    pub concurrency: usize,
    pub seed: u64,
    /// Stop once this many consecutive trials fail to improve on the best loss.
    pub patience: u64,
    pub brier_weight: f64,
    /// Perturbation scale, as a fraction of each dimension's range, at the start of the search.
    pub initial_scale: f64,
    /// Perturbation scale at the end of the budget.
    pub final_scale: f64,
}
impl OptimiserConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.trials == 0 {
            bail!("trial budget must be positive");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.patience == 0 {
            bail!("patience must be at least 1");
        }
        if !(self.brier_weight >= 0.0 && self.brier_weight.is_finite()) {
            bail!("Brier weight must be finite and non-negative, got {}", self.brier_weight);
        }
        for (name, scale) in [("initial", self.initial_scale), ("final", self.final_scale)] {
            if !(scale > 0.0 && scale <= 1.0) {
                bail!("{name} scale must be in (0, 1], got {scale}");
            }
        }
        Ok(())
    }

    /// Fast presets when accuracy is unimportant (e.g., a demo).
    pub fn fast() -> Self {
        Self {
            trials: 200,
            patience: 100,
            ..Self::default()
        }
    }
}

impl Default for OptimiserConfig {
    fn default() -> Self {
        Self {
            trials: 1_000,
            concurrency: pool::default_workers(),
            seed: 0,
            patience: 250,
            brier_weight: 1.0,
            initial_scale: 0.25,
            final_scale: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    /// The best set found, with its loss, trial count and status recorded in the metadata.
    pub best: CalibrationParameterSet,
    pub best_trial: u64,
    pub best_loss: LossBreakdown,
    pub baseline_loss: LossBreakdown,
    pub trials: u64,
    pub status: CalibrationStatus,
    pub elapsed: Duration,
}
impl CalibrationOutcome {
    pub fn improvement(&self) -> f64 {
        self.baseline_loss.combined - self.best_loss.combined
    }
}

#[derive(Debug, Clone)]
struct BestRecord {
    trial: u64,
    values: Vec<f64>,
    loss: LossBreakdown,
}
impl BestRecord {
    /// Replaces the record if `loss` is strictly lower, or equal with an earlier trial.
    fn offer(&mut self, trial: u64, values: &[f64], loss: LossBreakdown) -> bool {
        let better = loss.combined < self.loss.combined
            || (loss.combined == self.loss.combined && trial < self.trial);
        if better {
            self.trial = trial;
            self.values.clear();
            self.values.extend_from_slice(values);
            self.loss = loss;
        }
        better
    }
}

pub struct CalibrationOptimiser<'a> {
    dataset: &'a CalibrationDataset,
    space: SearchSpace,
    config: OptimiserConfig,
    cancel: Arc<AtomicBool>,
}
impl<'a> CalibrationOptimiser<'a> {
    pub fn new(
        dataset: &'a CalibrationDataset,
        space: SearchSpace,
        config: OptimiserConfig,
    ) -> Result<Self, InvalidConfiguration> {
        dataset.validate()?;
        space.validate()?;
        config.validate()?;
        Ok(Self {
            dataset,
            space,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shares a cancellation flag with the caller; raising it stops the search after the trials
    /// in flight.
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn config(&self) -> &OptimiserConfig {
        &self.config
    }

    /// Loss of the given factor values over the dataset.
    pub fn evaluate(&self, values: &[f64]) -> LossBreakdown {
        loss(&self.space.to_model(values), self.dataset, self.config.brier_weight)
    }

    pub fn run(&self) -> CalibrationOutcome {
        let timed = Timed::run(|| self.search());
        let (best, baseline_loss, trials, status) = timed.value;

        let mut parameters = self.space.to_parameter_set(&best.values);
        parameters.metadata = CalibrationMetadata {
            version: 0,
            loss: Some(best.loss.combined),
            baseline_loss: Some(baseline_loss.combined),
            trials,
            status: Some(status),
            created: Utc::now(),
        };
        info!(
            "calibration {status} after {trials} trials in {:?}: loss {:.6} (baseline {:.6}) at trial {}",
            timed.elapsed, best.loss.combined, baseline_loss.combined, best.trial
        );
        CalibrationOutcome {
            best: parameters,
            best_trial: best.trial,
            best_loss: best.loss,
            baseline_loss,
            trials,
            status,
            elapsed: timed.elapsed,
        }
    }

    fn search(&self) -> (BestRecord, LossBreakdown, u64, CalibrationStatus) {
        let config = &self.config;
        let identity = self.space.identity();
        let baseline_loss = self.evaluate(&identity);
        if baseline_loss.uniform_events > 0 {
            warn!(
                "{} events fell back to uniform probabilities at baseline",
                baseline_loss.uniform_events
            );
        }
        let best = Mutex::new(BestRecord {
            trial: 0,
            values: identity,
            loss: baseline_loss,
        });

        let mut completed = 1;
        let mut stale = 0;
        let status = loop {
            if self.cancel.load(Ordering::Relaxed) {
                break CalibrationStatus::Cancelled;
            }
            if completed >= config.trials {
                break CalibrationStatus::ExhaustedBudget;
            }
            if stale >= config.patience {
                break CalibrationStatus::Converged;
            }

            let batch = completed..u64::min(completed + config.concurrency as u64, config.trials);
            let centre = best.lock().values.clone();
            let evaluated = self.run_batch(batch.clone(), &centre, &best);
            completed += evaluated;

            let best_trial = best.lock().trial;
            stale = if batch.contains(&best_trial) {
                batch.end - 1 - best_trial
            } else {
                stale + evaluated
            };
            debug!(
                "completed {completed} trials; best at trial {best_trial}, {stale} since improvement"
            );
            if evaluated < batch.end - batch.start {
                break CalibrationStatus::Cancelled;
            }
        };

        let best = best.into_inner();
        (best, baseline_loss, completed, status)
    }

    /// Evaluates the trials in `batch`, offering each to `best`. Returns the number of trials
    /// evaluated, which falls short of the batch size only if cancelled.
    fn run_batch(&self, batch: Range<u64>, centre: &[f64], best: &Mutex<BestRecord>) -> u64 {
        let evaluate = |trial: u64| {
            if self.cancel.load(Ordering::Relaxed) {
                return 0;
            }
            let candidate = self.candidate(trial, centre);
            let loss = self.evaluate(&candidate);
            best.lock().offer(trial, &candidate, loss);
            1
        };
        if self.config.concurrency == 1 {
            batch.map(evaluate).sum()
        } else {
            pool::install(self.config.concurrency, || {
                batch.into_par_iter().map(evaluate).sum()
            })
        }
    }

    fn candidate(&self, trial: u64, centre: &[f64]) -> Vec<f64> {
        let mut rand = stream(self.config.seed, trial);
        if trial % 3 == 0 {
            self.space
                .dimensions
                .iter()
                .map(|dimension| dimension.bounds.start() + random_unit(&mut rand) * dimension.range())
                .collect()
        } else {
            let progress = trial as f64 / self.config.trials as f64;
            let scale = self.config.initial_scale
                + (self.config.final_scale - self.config.initial_scale) * progress;
            self.space
                .dimensions
                .iter()
                .zip(centre)
                .map(|(dimension, &value)| {
                    dimension.clamp(value + standard_normal(&mut rand) * scale * dimension.range())
                })
                .collect()
        }
    }
}
