use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use podium::bayes::{BayesConfig, FusionConfig};
use podium::calibrate::search::{OptimiserConfig, SearchSpaceOptions};
use podium::file::read_json_opt;
use podium::mc::SimulationOptions;

use crate::context::ContextMapper;

/// Everything a [Forecaster](crate::forecast::Forecaster) needs, with a default for every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub simulation: SimulationOptions,
    pub bayes: BayesConfig,
    pub fusion: FusionConfig,
    pub context: ContextMapper,
    pub optimiser: OptimiserConfig,
    pub search: SearchSpaceOptions,
    /// Where the published calibration parameters live.
    pub artifact_path: PathBuf,
    /// Where the prior store is persisted between runs; `None` keeps priors in memory only.
    pub priors_path: Option<PathBuf>,
    pub registry_path: Option<PathBuf>,
}
impl ForecastConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.simulation.validate().context("in the simulation options")?;
        self.bayes.validate().context("in the Bayesian configuration")?;
        self.fusion.validate().context("in the fusion configuration")?;
        self.context.validate().context("in the context mapper")?;
        self.optimiser.validate().context("in the optimiser configuration")?;
        Ok(())
    }

    /// Loads the configuration from `path`, or `None` if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>, anyhow::Error> {
        let path = path.as_ref();
        let config: Option<Self> = read_json_opt(path)
            .with_context(|| format!("reading configuration from {}", path.display()))?;
        if let Some(config) = &config {
            config.validate()?;
        }
        Ok(config)
    }

    /// Loads the configuration from `path` if given and present, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let loaded = match path {
            Some(path) => Self::load(path)?,
            None => None,
        };
        Ok(loaded.unwrap_or_else(|| {
            debug!("using the default configuration");
            Self::default()
        }))
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationOptions::default(),
            bayes: BayesConfig::default(),
            fusion: FusionConfig::default(),
            context: ContextMapper::default(),
            optimiser: OptimiserConfig::default(),
            search: SearchSpaceOptions::default(),
            artifact_path: PathBuf::from("config/calibration.json"),
            priors_path: None,
            registry_path: None,
        }
    }
}
