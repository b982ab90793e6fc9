//! Monte Carlo aggregation of simulated finishing orders.
//!
//! Trials are partitioned into fixed-size blocks, each drawing from its own seeded stream and
//! accumulating into a private [Tally]. Tallies hold only integer counters, so merging them in any
//! order yields bit-identical statistics regardless of the concurrency degree.

use std::borrow::Cow;
use std::ops::AddAssign;
use std::time::Duration;

use anyhow::bail;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tinyrand::{Seeded, StdRand};
use tracing::{debug, trace, warn};

use crate::entrant::{validate_field, Entrant, EntrantId};
use crate::error::InvalidConfiguration;
use crate::interval::{Interval, Intervals};
use crate::pool;
use crate::random::mix;
use crate::sampler::rank_once;
use crate::timed::Timed;

pub const TRIALS_PER_BLOCK: u64 = 4_096;

const TOP_3: usize = 3;
const TOP_10: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOptions {
    pub trials: u64,
    pub concurrency: usize,
    pub seed: u64,
    /// Number of leading trials whose finishing orders are retained for export.
    #[serde(default)]
    pub captured_trials: usize,
}
impl SimulationOptions {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.trials == 0 {
            bail!("number of trials must be positive");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.captured_trials as u64 > self.trials {
            bail!(
                "cannot capture {} trials out of {}",
                self.captured_trials,
                self.trials
            );
        }
        Ok(())
    }

    /// Fast presets when accuracy is unimportant (e.g., a demo).
    pub fn fast() -> Self {
        Self {
            trials: 10_000,
            ..Self::default()
        }
    }
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            trials: 100_000,
            concurrency: pool::default_workers(),
            seed: 0,
            captured_trials: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("{0}")]
    InvalidConfiguration(#[from] InvalidConfiguration),

    #[error("none of the {requested} requested trials completed")]
    NoEffectiveTrials { requested: u64 },
}

/// Integer counters for one entrant, accumulated over a subset of trials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntrantTally {
    pub wins: u64,
    pub top_3: u64,
    pub top_10: u64,
    pub position_sum: u64,
    pub position_sum_sq: u64,
    /// `histogram[p]` counts the trials in which the entrant finished in position `p + 1`.
    pub histogram: Vec<u64>,
}
impl EntrantTally {
    fn new(entrants: usize) -> Self {
        Self {
            histogram: vec![0; entrants],
            ..Self::default()
        }
    }

    #[inline(always)]
    fn record(&mut self, position: usize) {
        if position == 1 {
            self.wins += 1;
        }
        if position <= TOP_3 {
            self.top_3 += 1;
        }
        if position <= TOP_10 {
            self.top_10 += 1;
        }
        let position_u64 = position as u64;
        self.position_sum += position_u64;
        self.position_sum_sq += position_u64 * position_u64;
        self.histogram[position - 1] += 1;
    }

    /// The smallest position at or below which `quantile` of the recorded trials finished.
    pub fn percentile(&self, quantile: f64) -> usize {
        let trials: u64 = self.histogram.iter().sum();
        let rank = u64::max(1, (quantile * trials as f64).ceil() as u64);
        let mut cumulative = 0;
        for (index, &count) in self.histogram.iter().enumerate() {
            cumulative += count;
            if cumulative >= rank {
                return index + 1;
            }
        }
        self.histogram.len()
    }
}

impl AddAssign<&EntrantTally> for EntrantTally {
    fn add_assign(&mut self, rhs: &EntrantTally) {
        self.wins += rhs.wins;
        self.top_3 += rhs.top_3;
        self.top_10 += rhs.top_10;
        self.position_sum += rhs.position_sum;
        self.position_sum_sq += rhs.position_sum_sq;
        for (count, &other) in self.histogram.iter_mut().zip(&rhs.histogram) {
            *count += other;
        }
    }
}

/// Partial statistics of one worker or block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    pub entrants: Vec<EntrantTally>,
    pub completed: u64,
    pub skipped: u64,
    pub degenerate: u64,
}
impl Tally {
    pub fn new(entrants: usize) -> Self {
        Self {
            entrants: vec![EntrantTally::new(entrants); entrants],
            completed: 0,
            skipped: 0,
            degenerate: 0,
        }
    }

    /// Folds one finishing order (indices of entrants, first to last) into the tally.
    pub fn record(&mut self, order: &[usize], degenerate: bool) {
        for (rank, &entrant) in order.iter().enumerate() {
            self.entrants[entrant].record(rank + 1);
        }
        self.completed += 1;
        if degenerate {
            self.degenerate += 1;
        }
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        for (entrant, other) in self.entrants.iter_mut().zip(&rhs.entrants) {
            *entrant += other;
        }
        self.completed += rhs.completed;
        self.skipped += rhs.skipped;
        self.degenerate += rhs.degenerate;
    }
}

/// One sampled finishing order, retained only when trial capture is requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationTrial {
    pub block: u64,
    pub index: u64,
    /// Seed of the block's stream; replaying the block from this seed reproduces the trial.
    pub seed: u64,
    pub order: Vec<EntrantId>,
}

/// Statistics of one entrant over all effective trials of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrantAggregateStats {
    pub entrant: EntrantId,
    pub trials: u64,
    pub wins: u64,
    pub top_3: u64,
    pub top_10: u64,
    pub position_sum: u64,
    pub position_sum_sq: u64,
    pub histogram: Vec<u64>,
    pub win_probability: f64,
    pub top_3_probability: f64,
    pub top_10_probability: f64,
    pub expected_position: f64,
    pub position_variance: f64,
    /// Empirical percentile intervals of the finishing position (2.5–97.5 and 0.5–99.5).
    pub position_intervals: Intervals,
}
impl EntrantAggregateStats {
    fn finalise(entrant: EntrantId, tally: EntrantTally, trials: u64) -> Self {
        debug_assert!(trials > 0);
        let denominator = trials as f64;
        let expected_position = tally.position_sum as f64 / denominator;
        let position_variance = f64::max(
            0.0,
            tally.position_sum_sq as f64 / denominator - expected_position.powi(2),
        );
        let interval = |lower: f64, upper: f64| {
            Interval::new(
                tally.percentile(lower) as f64,
                tally.percentile(upper) as f64,
            )
        };
        let position_intervals = Intervals {
            p95: interval(0.025, 0.975),
            p99: interval(0.005, 0.995),
        };
        Self {
            entrant,
            trials,
            win_probability: tally.wins as f64 / denominator,
            top_3_probability: tally.top_3 as f64 / denominator,
            top_10_probability: tally.top_10 as f64 / denominator,
            expected_position,
            position_variance,
            position_intervals,
            wins: tally.wins,
            top_3: tally.top_3,
            top_10: tally.top_10,
            position_sum: tally.position_sum,
            position_sum_sq: tally.position_sum_sq,
            histogram: tally.histogram,
        }
    }

    pub fn position_std_dev(&self) -> f64 {
        self.position_variance.sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationDiagnostics {
    pub requested_trials: u64,
    pub effective_trials: u64,
    pub skipped_trials: u64,
    pub degenerate_trials: u64,
    /// Share of effective trials that fell back to a uniform draw in at least one step.
    pub degenerate_ratio: f64,
    pub workers: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub stats: Vec<EntrantAggregateStats>,
    pub diagnostics: SimulationDiagnostics,
    #[serde(default)]
    pub trials: Vec<SimulationTrial>,
}
impl Simulation {
    pub fn win_probs(&self) -> Vec<f64> {
        self.stats.iter().map(|stats| stats.win_probability).collect()
    }

    pub fn get(&self, entrant: &EntrantId) -> Option<&EntrantAggregateStats> {
        self.stats.iter().find(|stats| &stats.entrant == entrant)
    }
}

#[derive(Debug)]
struct BlockOutcome {
    tally: Tally,
    captured: Vec<(u64, u64, u64, Vec<usize>)>,
}
impl BlockOutcome {
    fn new(entrants: usize) -> Self {
        Self {
            tally: Tally::new(entrants),
            captured: vec![],
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.tally += other.tally;
        self.captured.extend(other.captured);
        self
    }
}

#[derive(Debug, Default)]
pub struct MonteCarloEngine<'a> {
    entrants: Cow<'a, [Entrant]>,
    options: SimulationOptions,
}
impl<'a> MonteCarloEngine<'a> {
    pub fn with_entrants(mut self, entrants: Cow<'a, [Entrant]>) -> Self {
        self.entrants = entrants;
        self
    }

    pub fn with_options(mut self, options: SimulationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_trials(mut self, trials: u64) -> Self {
        self.options.trials = trials;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.options.concurrency = concurrency;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.options.seed = seed;
        self
    }

    pub fn with_captured_trials(mut self, captured_trials: usize) -> Self {
        self.options.captured_trials = captured_trials;
        self
    }

    pub fn options(&self) -> &SimulationOptions {
        &self.options
    }

    pub fn entrants(&self) -> &[Entrant] {
        &self.entrants
    }

    /// Runs the configured number of trials and aggregates them into per-entrant statistics.
    pub fn simulate(&self) -> Result<Simulation, SimulationError> {
        self.options.validate().map_err(InvalidConfiguration)?;
        validate_field(&self.entrants).map_err(InvalidConfiguration)?;

        let options = &self.options;
        let entrants = self.entrants.len();
        let adjusted: Vec<_> = self.entrants.iter().map(Entrant::adjusted_score).collect();
        let blocks = options.trials.div_ceil(TRIALS_PER_BLOCK);
        debug!(
            "simulating {} trials of {entrants} entrants in {blocks} blocks across {} workers",
            options.trials, options.concurrency
        );

        let timed = Timed::run(|| {
            if options.concurrency == 1 {
                (0..blocks)
                    .map(|block| self.run_block(block, &adjusted))
                    .fold(BlockOutcome::new(entrants), BlockOutcome::merge)
            } else {
                pool::install(options.concurrency, || {
                    (0..blocks)
                        .into_par_iter()
                        .map(|block| self.run_block(block, &adjusted))
                        .reduce(|| BlockOutcome::new(entrants), BlockOutcome::merge)
                })
            }
        });
        let BlockOutcome {
            tally,
            mut captured,
        } = timed.value;

        if tally.skipped > 0 {
            warn!(
                "skipped {} of {} trials with non-finite scores",
                tally.skipped, options.trials
            );
        }
        if tally.completed == 0 {
            return Err(SimulationError::NoEffectiveTrials {
                requested: options.trials,
            });
        }
        let degenerate_ratio = tally.degenerate as f64 / tally.completed as f64;
        if tally.degenerate > 0 {
            warn!(
                "{} of {} trials were degenerate (ratio {degenerate_ratio:.6})",
                tally.degenerate, tally.completed
            );
        }

        captured.sort_by_key(|(block, index, _, _)| (*block, *index));
        let trials = captured
            .into_iter()
            .map(|(block, index, seed, order)| SimulationTrial {
                block,
                index,
                seed,
                order: order
                    .into_iter()
                    .map(|entrant| self.entrants[entrant].id.clone())
                    .collect(),
            })
            .collect();

        let effective_trials = tally.completed;
        let stats = self
            .entrants
            .iter()
            .zip(tally.entrants)
            .map(|(entrant, entrant_tally)| {
                EntrantAggregateStats::finalise(entrant.id.clone(), entrant_tally, effective_trials)
            })
            .collect();

        Ok(Simulation {
            stats,
            diagnostics: SimulationDiagnostics {
                requested_trials: options.trials,
                effective_trials,
                skipped_trials: tally.skipped,
                degenerate_trials: tally.degenerate,
                degenerate_ratio,
                workers: options.concurrency,
                elapsed: timed.elapsed,
            },
            trials,
        })
    }

    fn run_block(&self, block: u64, adjusted: &[f64]) -> BlockOutcome {
        let options = &self.options;
        let entrants = adjusted.len();
        let seed = mix(options.seed, block);
        let mut rand = StdRand::seed(seed);
        let start = block * TRIALS_PER_BLOCK;
        let end = u64::min(start + TRIALS_PER_BLOCK, options.trials);

        let mut outcome = BlockOutcome::new(entrants);
        let mut scores = vec![0.0; entrants];
        let mut order = vec![usize::MAX; entrants];
        let mut bitmap = vec![true; entrants];
        'trial: for index in 0..end - start {
            for (entrant, &score) in adjusted.iter().enumerate() {
                let noisy = self.entrants[entrant].noise.perturb(score, &mut rand);
                if !noisy.is_finite() {
                    debug!(
                        "skipping trial {} (block {block}): {} scored {noisy}",
                        start + index,
                        self.entrants[entrant].id
                    );
                    outcome.tally.skipped += 1;
                    continue 'trial;
                }
                scores[entrant] = noisy;
            }
            let degenerate = rank_once(&scores, &mut order, &mut bitmap, &mut rand);
            trace!("trial {}: {order:?}", start + index);
            outcome.tally.record(&order, degenerate);
            if start + index < options.captured_trials as u64 {
                outcome.captured.push((block, index, seed, order.clone()));
            }
        }
        outcome
    }
}
