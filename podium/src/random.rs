//! Random draws layered over [tinyrand].

use std::f64::consts::TAU;

use tinyrand::{Rand, Seeded, StdRand};

const UNIT_SCALE: f64 = 1.0 / (1u64 << 53) as f64;

/// A uniform draw in `[0, 1)`.
#[inline]
pub fn random_unit(rand: &mut impl Rand) -> f64 {
    (rand.next_u64() >> 11) as f64 * UNIT_SCALE
}

/// A standard normal draw using the Box-Muller transform. Consumes two `u64`s.
#[inline]
pub fn standard_normal(rand: &mut impl Rand) -> f64 {
    let u1 = 1.0 - random_unit(rand);
    let u2 = random_unit(rand);
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

/// Derives an independent stream seed from a base `seed` and a `stream` index (SplitMix64 finaliser).
#[inline]
pub fn mix(seed: u64, stream: u64) -> u64 {
    let mut z = seed ^ stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// A generator for the given `stream` of a base `seed`.
pub fn stream(seed: u64, stream: u64) -> StdRand {
    StdRand::seed(mix(seed, stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_unit_in_range() {
        let mut rand = StdRand::seed(7);
        for _ in 0..10_000 {
            let value = random_unit(&mut rand);
            assert!((0.0..1.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn standard_normal_moments() {
        let mut rand = StdRand::seed(11);
        const SAMPLES: usize = 200_000;
        let (mut sum, mut sum_sq) = (0.0, 0.0);
        for _ in 0..SAMPLES {
            let value = standard_normal(&mut rand);
            assert!(value.is_finite());
            sum += value;
            sum_sq += value * value;
        }
        let mean = sum / SAMPLES as f64;
        let variance = sum_sq / SAMPLES as f64 - mean * mean;
        assert!(mean.abs() < 0.01, "mean {mean}");
        assert!((variance - 1.0).abs() < 0.02, "variance {variance}");
    }

    #[test]
    fn streams_are_distinct_and_repeatable() {
        assert_ne!(mix(42, 0), mix(42, 1));
        assert_ne!(mix(42, 0), mix(43, 0));
        assert_eq!(
            stream(42, 3).next_u64(),
            stream(42, 3).next_u64()
        );
    }
}
