//! The operations served to callers: simulating an event, predicting it, recording its outcome and
//! recalibrating against history.

use std::borrow::Cow;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use podium::bayes::store::{PriorSnapshot, PriorStore};
use podium::bayes::{
    BayesError, BayesianLayer, EventOutcome, FusionDiagnostics, FusionFactors, PosteriorEstimate,
    PriorInitialisation, UpdateSummary,
};
use podium::calibrate::artifact::ArtifactStore;
use podium::calibrate::search::{CalibrationOptimiser, CalibrationOutcome, SearchSpace};
use podium::calibrate::{CalibrationError, CalibrationParameterSet, CalibrationSample, CalibrationStatus};
use podium::entrant::{Entrant, EntrantId};
use podium::error::InvalidConfiguration;
use podium::file::{read_json_opt, write_json_atomic};
use podium::mc::{MonteCarloEngine, Simulation, SimulationDiagnostics, SimulationError};
use podium::timed::Timed;

use crate::config::ForecastConfig;
use crate::context::RaceContext;
use crate::history::HistoricalFeed;
use crate::registry::EntrantRegistry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceEntry {
    pub entrant: EntrantId,
    /// Externally supplied propensity; higher is stronger.
    pub base_score: f64,
    /// Externally supplied track and weather adjustments to the fused win probability. These are
    /// separate from the context multipliers, which act on the simulated score.
    #[serde(default)]
    pub fusion: FusionFactors,
}
impl RaceEntry {
    pub fn new(entrant: impl Into<String>, base_score: f64) -> Self {
        Self {
            entrant: EntrantId::new(entrant),
            base_score,
            fusion: FusionFactors::default(),
        }
    }

    pub fn with_fusion(mut self, fusion: FusionFactors) -> Self {
        self.fusion = fusion;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceRequest {
    pub event_id: String,
    pub context: RaceContext,
    pub entries: Vec<RaceEntry>,
}
impl RaceRequest {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.entries.is_empty() {
            bail!("at least one entrant must be specified");
        }
        for entry in &self.entries {
            let FusionFactors { track, weather } = entry.fusion;
            if !(track > 0.0 && track.is_finite() && weather > 0.0 && weather.is_finite()) {
                bail!(
                    "fusion factors of {} must be finite and positive, got track {track}, weather {weather}",
                    entry.entrant
                );
            }
        }
        self.context
            .validate()
            .with_context(|| format!("in the context of event {}", self.event_id))
    }

    pub fn entrants(&self) -> impl Iterator<Item = &EntrantId> {
        self.entries.iter().map(|entry| &entry.entrant)
    }
}

/// Fused, calibrated and renormalised estimates for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub event_id: String,
    pub estimates: Vec<PosteriorEstimate>,
    pub simulation: SimulationDiagnostics,
    pub fusion: FusionDiagnostics,
    /// Version of the calibration parameters applied; 0 for the identity set.
    pub calibration_version: u64,
    /// The calibrated probabilities had no usable mass and were replaced with a uniform vector.
    pub calibration_uniform: bool,
}
impl Prediction {
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

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRun {
    pub outcome: CalibrationOutcome,
    /// The parameters as published; `None` if the run was cancelled.
    pub published: Option<CalibrationParameterSet>,
    /// Historical events that entered the dataset.
    pub events: usize,
}

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("{0}")]
    InvalidConfiguration(#[from] InvalidConfiguration),

    #[error("simulation failed: {0}")]
    Simulation(#[from] SimulationError),

    #[error("{0}")]
    Bayes(#[from] BayesError),

    #[error("{0}")]
    Calibration(#[from] CalibrationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct Forecaster {
    config: ForecastConfig,
    registry: EntrantRegistry,
    store: PriorStore,
    artifacts: ArtifactStore,
}
impl Forecaster {
    /// Creates a forecaster, restoring the prior store from the configured path if one was
    /// persisted there.
    pub fn new(config: ForecastConfig, registry: EntrantRegistry) -> Result<Self, ForecastError> {
        config.validate().map_err(InvalidConfiguration)?;
        registry.validate().map_err(InvalidConfiguration)?;
        let store = match &config.priors_path {
            Some(path) => match read_json_opt::<PriorSnapshot>(path)? {
                Some(snapshot) => PriorStore::restore(snapshot),
                None => {
                    debug!("no priors at {}; starting afresh", path.display());
                    PriorStore::default()
                }
            },
            None => PriorStore::default(),
        };
        let artifacts = ArtifactStore::new(&config.artifact_path);
        Ok(Self {
            config,
            registry,
            store,
            artifacts,
        })
    }

    /// Creates a forecaster with the registry named in the configuration.
    pub fn open(config: ForecastConfig) -> Result<Self, ForecastError> {
        let registry = EntrantRegistry::load_or_default(config.registry_path.as_deref())
            .map_err(InvalidConfiguration)?;
        Self::new(config, registry)
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn registry(&self) -> &EntrantRegistry {
        &self.registry
    }

    pub fn store(&self) -> &PriorStore {
        &self.store
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Initialises a prior for every entrant that has none: fitted from its record in `feed` if
    /// it has one, otherwise from its registered tier.
    pub fn prepare<'a>(
        &self,
        entrants: impl IntoIterator<Item = &'a EntrantId>,
        feed: Option<&HistoricalFeed>,
    ) -> Result<PriorInitialisation, ForecastError> {
        let tiers: Vec<_> = entrants
            .into_iter()
            .map(|entrant| (entrant.clone(), self.registry.tier(entrant)))
            .collect();
        let history = feed.map(HistoricalFeed::histories).unwrap_or_default();
        let summary = self.layer()?.initialise_priors(&tiers, &history);
        Ok(summary)
    }

    /// Runs the Monte Carlo engine over the request with the given trial count and concurrency,
    /// leaving the seed as configured.
    pub fn simulate_event(
        &self,
        request: &RaceRequest,
        trials: u64,
        concurrency: usize,
    ) -> Result<Simulation, ForecastError> {
        request.validate().map_err(InvalidConfiguration)?;
        let entrants = self.entrants(request);
        let engine = MonteCarloEngine::default()
            .with_entrants(Cow::Owned(entrants))
            .with_options(self.config.simulation.clone())
            .with_trials(trials)
            .with_concurrency(concurrency);
        Ok(engine.simulate()?)
    }

    /// Simulates the request, fuses the result with the current beliefs and applies the
    /// published calibration. Amends no state, so repeated calls return identical predictions.
    pub fn predict_event(
        &self,
        request: &RaceRequest,
        trials: u64,
    ) -> Result<Prediction, ForecastError> {
        let calibration = self.artifacts.load_or_identity()?;
        let model = calibration.model()?;
        debug!(
            "predicting event {} with calibration v{}",
            request.event_id, calibration.metadata.version
        );

        let simulation =
            self.simulate_event(request, trials, self.config.simulation.concurrency)?;
        let factors: Vec<_> = request.entries.iter().map(|entry| entry.fusion).collect();
        let fusion = self.layer()?.fuse(&simulation.stats, &factors)?;

        let mut estimates = fusion.estimates;
        let mut calibration_uniform = false;
        if !calibration.is_identity() {
            let samples: Vec<_> = estimates
                .iter()
                .map(|estimate| CalibrationSample {
                    entrant: estimate.entrant.clone(),
                    group: self.registry.group(&estimate.entrant).map(str::to_string),
                    raw_probability: estimate.win_probability,
                })
                .collect();
            let track_type = request.context.track_type.to_string();
            let mut calibrated = Vec::with_capacity(samples.len());
            calibration_uniform = model
                .apply(&samples, Some(track_type.as_str()), &mut calibrated)
                .is_uniform();
            for (estimate, probability) in estimates.iter_mut().zip(calibrated) {
                if estimate.win_probability > 0.0 {
                    let ratio = probability / estimate.win_probability;
                    estimate.win_interval_95 = estimate.win_interval_95.scale(ratio).clip(0.0..=1.0);
                    estimate.win_interval_99 = estimate.win_interval_99.scale(ratio).clip(0.0..=1.0);
                }
                estimate.win_probability = probability;
            }
        }

        Ok(Prediction {
            event_id: request.event_id.clone(),
            estimates,
            simulation: simulation.diagnostics,
            fusion: fusion.diagnostics,
            calibration_version: calibration.metadata.version,
            calibration_uniform,
        })
    }

    /// Amends the beliefs with a resolved event and persists the store if configured to.
    pub fn record_outcome(&self, outcome: &EventOutcome) -> Result<UpdateSummary, ForecastError> {
        let summary = self.layer()?.update(outcome).map_err(BayesError::from)?;
        if summary.default_priors > 0 {
            warn!(
                "{} entrants of event {} had no prior",
                summary.default_priors, outcome.event_id
            );
        }
        self.persist_priors()?;
        Ok(summary)
    }

    /// Searches for the correction factors that best explain `feed` within `trial_budget` trials
    /// and publishes them, unless `cancel` is raised first.
    pub fn run_calibration(
        &self,
        feed: &HistoricalFeed,
        trial_budget: u64,
        cancel: Arc<AtomicBool>,
    ) -> Result<CalibrationRun, ForecastError> {
        let dataset = feed.calibration_dataset(&self.registry);
        let space = SearchSpace::for_dataset(&dataset, &self.config.search);
        let mut config = self.config.optimiser.clone();
        config.trials = trial_budget;
        info!(
            "calibrating {} dimensions over {} events with a budget of {trial_budget} trials",
            space.dimensions.len(),
            dataset.events.len()
        );
        let outcome = CalibrationOptimiser::new(&dataset, space, config)?
            .with_cancellation(cancel)
            .run();
        let published = if outcome.status == CalibrationStatus::Cancelled {
            warn!(
                "calibration cancelled after {} trials; leaving {} unchanged",
                outcome.trials,
                self.artifacts.path().display()
            );
            None
        } else {
            Some(self.artifacts.publish(outcome.best.clone())?)
        };
        Ok(CalibrationRun {
            outcome,
            published,
            events: dataset.events.len(),
        })
    }

    pub fn persist_priors(&self) -> Result<(), ForecastError> {
        if let Some(path) = &self.config.priors_path {
            let timed = Timed::result(|| write_json_atomic(path, &self.store.snapshot()))?;
            debug!(
                "persisted {} priors to {} in {:?}",
                self.store.len(),
                path.display(),
                timed.elapsed
            );
        }
        Ok(())
    }

    fn layer(&self) -> Result<BayesianLayer<'_>, InvalidConfiguration> {
        BayesianLayer::new(
            &self.store,
            self.config.bayes.clone(),
            self.config.fusion.clone(),
        )
    }

    fn entrants(&self, request: &RaceRequest) -> Vec<Entrant> {
        let mapper = &self.config.context;
        request
            .entries
            .iter()
            .map(|entry| {
                let profile = self.registry.profile(&entry.entrant);
                let entrant = Entrant::new(entry.entrant.as_str(), entry.base_score)
                    .with_name(self.registry.name(&entry.entrant))
                    .with_multipliers(mapper.multipliers(profile, &request.context))
                    .with_noise(mapper.noise(profile, &request.context));
                match &profile.group {
                    Some(group) => entrant.with_group(group.as_str()),
                    None => entrant,
                }
            })
            .collect()
    }
}
