//! Probabilistic forecasting of ranked-finish competitions.
//!
//! Estimates each entrant's chance of winning and expected finishing position by Monte Carlo
//! simulation over a Plackett–Luce ranking model, refines those estimates with conjugate Bayesian
//! beliefs updated from observed outcomes, and calibrates the resulting probabilities against
//! historical results.

#![allow(clippy::too_many_arguments)]

pub mod bayes;
pub mod calibrate;
pub mod entrant;
pub mod error;
pub mod file;
pub mod interval;
pub mod mc;
pub mod noise;
pub mod pool;
pub mod probs;
pub mod random;
pub mod sampler;
pub mod timed;

#[doc = include_str!("../../README.md")]
#[cfg(doc)]
fn readme() {}
