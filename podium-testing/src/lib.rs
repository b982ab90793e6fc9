//! Assertions shared by the test suites of the workspace crates.

use assert_float_eq::*;

/// Asserts that two slices are of equal length and that every pair of elements is within a
/// relative `epsilon` of each other.
pub fn assert_slice_f64_relative(expected: &[f64], actual: &[f64], epsilon: f64) {
    assert_eq!(
        expected.len(),
        actual.len(),
        "lengths do not match: {} ≠ {}",
        expected.len(),
        actual.len()
    );
    for (&expected, &actual) in expected.iter().zip(actual) {
        if expected != actual {
            assert_float_relative_eq!(expected, actual, epsilon);
        }
    }
}

/// Asserts that the probabilities in `probs` are all in `[0, 1]` and sum to `expected_sum`
/// within an absolute `epsilon`.
pub fn assert_probs_sum(expected_sum: f64, probs: &[f64], epsilon: f64) {
    for (index, &prob) in probs.iter().enumerate() {
        assert!(
            (0.0..=1.0).contains(&prob),
            "probability {prob} at index {index} is outside [0, 1] in {probs:?}"
        );
    }
    let sum: f64 = probs.iter().sum();
    assert_float_absolute_eq!(expected_sum, sum, epsilon);
}

/// Asserts that `order` is a permutation of `0..len`: every index appears exactly once.
pub fn assert_permutation(order: &[usize], len: usize) {
    assert_eq!(len, order.len(), "order {order:?} should have {len} elements");
    let mut seen = vec![false; len];
    for &index in order {
        assert!(index < len, "index {index} out of range in {order:?}");
        assert!(!seen[index], "index {index} repeated in {order:?}");
        seen[index] = true;
    }
}
