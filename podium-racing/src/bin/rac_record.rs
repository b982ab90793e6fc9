use std::env;
use std::error::Error;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use stanza::renderer::console::Console;
use stanza::renderer::Renderer;
use tracing::{debug, info, warn};

use podium::bayes::EventOutcome;
use podium::file::read_json;
use podium_racing::config::ForecastConfig;
use podium_racing::forecast::Forecaster;
use podium_racing::print::tabulate_update;

#[derive(Debug, clap::Parser, Clone)]
struct Args {
    /// file to source the event outcome from
    outcome: Option<PathBuf>,

    /// configuration file
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,
}
impl Args {
    fn validate(&self) -> anyhow::Result<()> {
        self.outcome
            .as_ref()
            .ok_or(anyhow!("event outcome must be specified"))?;
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
    if config.priors_path.is_none() {
        warn!("no priors path is configured; the update will not outlive this process");
    }
    let forecaster = Forecaster::open(config)?;
    let outcome: EventOutcome = read_json(args.outcome.unwrap())?;

    let summary = forecaster.record_outcome(&outcome)?;
    info!("\n{}", Console::default().render(&tabulate_update(&summary)));
    Ok(())
}
