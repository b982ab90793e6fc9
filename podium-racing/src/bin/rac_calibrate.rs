use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use stanza::renderer::console::Console;
use stanza::renderer::Renderer;
use tracing::{debug, info, warn};

use podium_racing::config::ForecastConfig;
use podium_racing::forecast::Forecaster;
use podium_racing::history::HistoricalFeed;
use podium_racing::print::tabulate_calibration;

#[derive(Debug, clap::Parser, Clone)]
struct Args {
    /// file to source the historical feed from
    history: Option<PathBuf>,

    /// configuration file
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,

    /// trial budget, overriding the configuration
    #[clap(short = 'b', long)]
    budget: Option<u64>,
}
impl Args {
    fn validate(&self) -> anyhow::Result<()> {
        self.history
            .as_ref()
            .ok_or(anyhow!("historical feed must be specified"))?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
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
    let budget = args.budget.unwrap_or(config.optimiser.trials);
    let forecaster = Arc::new(Forecaster::open(config)?);
    let path = args.history.unwrap();
    let feed = HistoricalFeed::load(&path)?
        .ok_or_else(|| anyhow!("no historical feed at {}", path.display()))?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; stopping once the trials in flight complete");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let run = tokio::task::spawn_blocking({
        let forecaster = forecaster.clone();
        move || forecaster.run_calibration(&feed, budget, cancel)
    })
    .await??;

    let outcome = &run.outcome;
    info!("\n{}", Console::default().render(&tabulate_calibration(outcome)));
    info!(
        "{} after {} trials over {} events in {:?}; improvement {:.6} at trial {}",
        outcome.status,
        outcome.trials,
        run.events,
        outcome.elapsed,
        outcome.improvement(),
        outcome.best_trial
    );
    match &run.published {
        Some(published) => info!(
            "published calibration v{} to {}",
            published.metadata.version,
            forecaster.artifacts().path().display()
        ),
        None => warn!("nothing was published"),
    }
    Ok(())
}
