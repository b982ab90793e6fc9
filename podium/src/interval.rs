//! Two-sided intervals used for confidence and credible bounds.

use std::fmt::{Display, Formatter};
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use statrs::distribution::ContinuousCDF;

/// Two-sided standard normal quantile for 95% coverage.
pub const Z_95: f64 = 1.959_963_984_540_054;

/// Two-sided standard normal quantile for 99% coverage.
pub const Z_99: f64 = 2.575_829_303_548_901;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}
impl Interval {
    pub fn new(lower: f64, upper: f64) -> Self {
        debug_assert!(lower <= upper, "inverted interval {lower}..{upper}");
        Self { lower, upper }
    }

    pub fn point(value: f64) -> Self {
        Self {
            lower: value,
            upper: value,
        }
    }

    /// A symmetric interval of `z` standard deviations about `mean`, clipped to `support`.
    pub fn normal(mean: f64, std_dev: f64, z: f64, support: RangeInclusive<f64>) -> Self {
        let half_width = z * std_dev;
        Self {
            lower: mean - half_width,
            upper: mean + half_width,
        }
        .clip(support)
    }

    /// The central `coverage` mass of `distribution`, clipped to `support`.
    pub fn quantiles(
        distribution: &impl ContinuousCDF<f64, f64>,
        coverage: f64,
        support: RangeInclusive<f64>,
    ) -> Self {
        let tail = (1.0 - coverage) / 2.0;
        Self {
            lower: distribution.inverse_cdf(tail),
            upper: distribution.inverse_cdf(1.0 - tail),
        }
        .clip(support)
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.lower..=self.upper).contains(&value)
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self {
            lower: self.lower * factor,
            upper: self.upper * factor,
        }
    }

    pub fn clip(&self, support: RangeInclusive<f64>) -> Self {
        Self {
            lower: self.lower.clamp(*support.start(), *support.end()),
            upper: self.upper.clamp(*support.start(), *support.end()),
        }
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let precision = f.precision().unwrap_or(3);
        write!(f, "[{:.precision$}, {:.precision$}]", self.lower, self.upper)
    }
}

/// A pair of intervals at the two coverage levels reported throughout.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Intervals {
    pub p95: Interval,
    pub p99: Interval,
}
impl Intervals {
    pub fn point(value: f64) -> Self {
        Self {
            p95: Interval::point(value),
            p99: Interval::point(value),
        }
    }

    pub fn normal(mean: f64, std_dev: f64, support: RangeInclusive<f64>) -> Self {
        Self {
            p95: Interval::normal(mean, std_dev, Z_95, support.clone()),
            p99: Interval::normal(mean, std_dev, Z_99, support),
        }
    }

    /// Equal-tailed intervals read off the inverse CDF of `distribution`, clipped to `support`.
    pub fn quantiles(
        distribution: &impl ContinuousCDF<f64, f64>,
        support: RangeInclusive<f64>,
    ) -> Self {
        Self {
            p95: Interval::quantiles(distribution, 0.95, support.clone()),
            p99: Interval::quantiles(distribution, 0.99, support),
        }
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self {
            p95: self.p95.scale(factor),
            p99: self.p99.scale(factor),
        }
    }

    pub fn clip(&self, support: RangeInclusive<f64>) -> Self {
        Self {
            p95: self.p95.clip(support.clone()),
            p99: self.p99.clip(support),
        }
    }
}
