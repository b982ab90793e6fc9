use std::env;
use std::error::Error;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use stanza::renderer::console::Console;
use stanza::renderer::Renderer;
use tracing::{debug, info};

use podium::file::{read_json, write_json};
use podium_racing::config::ForecastConfig;
use podium_racing::forecast::{Forecaster, RaceRequest};
use podium_racing::print::tabulate_simulation;

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

    /// number of worker threads, overriding the configuration
    #[clap(short = 'j', long)]
    concurrency: Option<usize>,

    /// write the aggregated statistics as JSON to this file
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
    let concurrency = args.concurrency.unwrap_or(config.simulation.concurrency);
    let forecaster = Forecaster::open(config)?;
    let request: RaceRequest = read_json(args.request.unwrap())?;

    let simulation = forecaster.simulate_event(&request, trials, concurrency)?;
    let table = tabulate_simulation(&simulation, forecaster.registry());
    info!("\n{}", Console::default().render(&table));
    let diagnostics = &simulation.diagnostics;
    info!(
        "{} effective of {} requested trials ({} skipped, degenerate ratio {:.6}) on {} workers in {:?}",
        diagnostics.effective_trials,
        diagnostics.requested_trials,
        diagnostics.skipped_trials,
        diagnostics.degenerate_ratio,
        diagnostics.workers,
        diagnostics.elapsed
    );

    if let Some(output) = args.output {
        write_json(&output, &simulation.stats)?;
        info!("wrote statistics to {}", output.display());
    }
    Ok(())
}
