//! Per-trial perturbation of an entrant's deterministic score.
//!
//! Each trial draws five independent zero-mean Gaussian terms (season form, consistency, weather
//! sensitivity, track-specific variance and reliability variance), sums them onto the adjusted score,
//! and then applies a mechanical failure draw that drops the score to the floor.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use tinyrand::Rand;

use crate::random::{random_unit, standard_normal};
use crate::sampler::SCORE_FLOOR;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NoiseCoefficients {
    /// Standard deviation of season-form variance, in score units.
    #[serde(default)]
    pub form: f64,
    #[serde(default)]
    pub consistency: f64,
    #[serde(default)]
    pub weather: f64,
    #[serde(default)]
    pub track: f64,
    #[serde(default)]
    pub reliability: f64,
    /// Probability of a failure that takes the entrant out of contention for the trial.
    #[serde(default)]
    pub failure_rate: f64,
}
impl NoiseCoefficients {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for (name, sd) in self.std_devs() {
            if !sd.is_finite() || sd < 0.0 {
                bail!("{name} noise must be finite and non-negative, got {sd}");
            }
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            bail!("failure rate must be in [0, 1], got {}", self.failure_rate);
        }
        Ok(())
    }

    pub fn is_deterministic(&self) -> bool {
        self.failure_rate == 0.0 && self.std_devs().iter().all(|(_, sd)| *sd == 0.0)
    }

    fn std_devs(&self) -> [(&'static str, f64); 5] {
        [
            ("form", self.form),
            ("consistency", self.consistency),
            ("weather", self.weather),
            ("track", self.track),
            ("reliability", self.reliability),
        ]
    }

    /// Perturbs `score` with one draw of every noise term. The result may be non-finite if the
    /// coefficients are; callers treat that as a failed trial.
    #[inline]
    pub fn perturb(&self, score: f64, rand: &mut impl Rand) -> f64 {
        if self.is_deterministic() {
            return score;
        }
        let mut noisy = score;
        for (_, sd) in self.std_devs() {
            if sd != 0.0 {
                noisy += sd * standard_normal(rand);
            }
        }
        if self.failure_rate > 0.0 && random_unit(rand) < self.failure_rate {
            return SCORE_FLOOR;
        }
        noisy
    }
}
