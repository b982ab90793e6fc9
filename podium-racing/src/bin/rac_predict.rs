use std::env;
use std::error::Error;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use stanza::renderer::console::Console;
use stanza::renderer::Renderer;
use tracing::{debug, info, warn};

use podium::file::{read_json, write_json};
use podium_racing::config::ForecastConfig;
use podium_racing::forecast::{Forecaster, RaceRequest};
use podium_racing::history::HistoricalFeed;
use podium_racing::print::tabulate_prediction;

#[derive(Debug, clap::Parser, Clone)]
struct Args {
    /// file to source the race request from
    request: Option<PathBuf>,

    /// configuration file
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,

    /// number of trials, overriding the configuration
    #[clap(short = 't', long)]
    trials: Option<u64>,

    /// historical feed used to fit priors for entrants that have none
    #[clap(short = 'f', long)]
    history: Option<PathBuf>,

    /// write the prediction as JSON to this file
    #[clap(short = 'o', long)]
    output: Option<PathBuf>,
}
impl Args {
    fn validate(&self) -> anyhow::Result<()> {
        self.request
            .as_ref()
            .ok_or(anyhow!("race request must be specified"))?;
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    if env::var("RUST_BACKTRACE").is_err() {
        env::set_var("RUST_BACKTRACE", "full")
    }
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info")
    }
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    args.validate()?;
    debug!("args: {args:?}");

    let config = ForecastConfig::load_or_default(args.config.as_deref())?;
    let trials = args.trials.unwrap_or(config.simulation.trials);
    let forecaster = Forecaster::open(config)?;
    let request: RaceRequest = read_json(args.request.unwrap())?;
    let feed = match &args.history {
        Some(path) => HistoricalFeed::load(path)?,
        None => None,
    };

    let initialised = forecaster.prepare(request.entrants(), feed.as_ref())?;
    debug!("priors: {initialised:?}");
    if initialised.from_history + initialised.from_tier > 0 {
        forecaster.persist_priors()?;
    }

    let prediction = forecaster.predict_event(&request, trials)?;
    let table = tabulate_prediction(&prediction, forecaster.registry());
    info!("\n{}", Console::default().render(&table));
    info!(
        "event {} on calibration v{}: {} prior-only, {} default priors, degenerate ratio {:.6}",
        prediction.event_id,
        prediction.calibration_version,
        prediction.fusion.prior_only,
        prediction.fusion.default_priors,
        prediction.simulation.degenerate_ratio
    );
    if prediction.fusion.uniform_fallback || prediction.calibration_uniform {
        warn!("win probabilities fell back to uniform; treat this prediction as degraded");
    }

    if let Some(output) = args.output {
        write_json(&output, &prediction)?;
        info!("wrote prediction to {}", output.display());
    }
    Ok(())
}
