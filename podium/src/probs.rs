//! Utilities for working with probabilities.

use tracing::warn;

pub trait SliceExt {
    fn sum(&self) -> f64;
    fn normalise(&mut self, target: f64) -> f64;
    fn normalise_or_uniform(&mut self) -> Normalisation;
    fn scale(&mut self, factor: f64);
    fn mean(&self) -> f64;
    fn variance(&self) -> f64;
}
impl SliceExt for [f64] {
    fn sum(&self) -> f64 {
        self.iter().sum()
    }

    fn normalise(&mut self, target: f64) -> f64 {
        let sum = self.sum();
        self.scale(target / sum);
        sum
    }

    /// Normalises the slice to sum to 1. If the slice has no usable mass (its sum is non-positive
    /// or not finite), every element is replaced with `1/len` and the fallback is reported.
    fn normalise_or_uniform(&mut self) -> Normalisation {
        let sum = self.sum();
        if sum > 0.0 && sum.is_finite() {
            self.scale(1.0 / sum);
            Normalisation::Scaled(sum)
        } else {
            warn!("cannot normalise {} values summing to {sum}; falling back to uniform", self.len());
            let uniform = 1.0 / self.len() as f64;
            self.fill(uniform);
            Normalisation::Uniform
        }
    }

    fn scale(&mut self, factor: f64) {
        for element in self {
            *element *= factor;
        }
    }

    fn mean(&self) -> f64 {
        self.sum() / self.len() as f64
    }

    fn variance(&self) -> f64 {
        let mean = self.mean();
        self.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / self.len() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalisation {
    /// Scaled by the reciprocal of the contained sum.
    Scaled(f64),
    Uniform,
}
impl Normalisation {
    pub fn is_uniform(&self) -> bool {
        matches!(self, Normalisation::Uniform)
    }
}
