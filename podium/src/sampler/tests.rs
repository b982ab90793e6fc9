use assert_float_eq::*;
use podium_testing::assert_permutation;
use tinyrand::{Seeded, StdRand};
use tinyrand_alloc::Mock;

use super::*;

/// Counts the number of `u64`s drawn from the wrapped generator.
struct Counting {
    inner: StdRand,
    draws: usize,
}
impl Rand for Counting {
    fn next_u64(&mut self) -> u64 {
        self.draws += 1;
        self.inner.next_u64()
    }
}

#[test]
fn empty_field() {
    let mut rand = StdRand::seed(0);
    let ranking = rank(&[], &mut rand).unwrap();
    assert!(ranking.order.is_empty());
    assert!(!ranking.degenerate);
}

#[test]
fn single_entrant_consumes_no_randomness() {
    let mut rand = Counting {
        inner: StdRand::seed(0),
        draws: 0,
    };
    for score in [5.0, 0.0, -3.0] {
        let ranking = rank(&[score], &mut rand).unwrap();
        assert_eq!(vec![0], ranking.order);
        assert!(!ranking.degenerate);
    }
    assert_eq!(0, rand.draws);
}

#[test]
fn last_place_is_free() {
    let mut rand = Counting {
        inner: StdRand::seed(0),
        draws: 0,
    };
    rank(&[1.0, 2.0, 3.0, 4.0], &mut rand).unwrap();
    assert_eq!(3, rand.draws);
}

#[test]
fn extreme_draws_select_boundary_entrants() {
    let scores = [3.0, 2.0, 1.0];
    let mut low = Mock::default().with_next_u128(|_| 0);
    assert_eq!(vec![0, 1, 2], rank(&scores, &mut low).unwrap().order);

    let mut high = Mock::default().with_next_u128(|_| u64::MAX as u128);
    assert_eq!(vec![2, 1, 0], rank(&scores, &mut high).unwrap().order);
}

#[test]
fn always_a_permutation() {
    let mut rand = StdRand::seed(42);
    let fields: [&[f64]; 5] = [
        &[1.0, 2.0],
        &[10.0, 5.0, 3.0, 1.0],
        &[0.0, 0.0, 0.0],
        &[-1.0, 4.0, -2.0, 0.5, 7.0],
        &[3.0, 3.0, 3.0, 3.0, 3.0, 3.0],
    ];
    for scores in fields {
        for _ in 0..1_000 {
            let ranking = rank(scores, &mut rand).unwrap();
            assert_permutation(&ranking.order, scores.len());
        }
    }
}

#[test]
fn rejects_non_finite() {
    let mut rand = StdRand::seed(0);
    assert_eq!(
        RankingError::NonFiniteScore {
            index: 1,
            score: f64::INFINITY
        },
        rank(&[1.0, f64::INFINITY], &mut rand).unwrap_err()
    );
    assert_eq!(
        "score NaN at index 0 is not finite",
        rank(&[f64::NAN], &mut rand).unwrap_err().to_string()
    );
}

#[test]
fn same_seed_same_order() {
    let scores = [4.0, 1.0, 3.0, 2.0, 6.0, 0.5];
    for seed in 0..20 {
        let first = rank(&scores, &mut StdRand::seed(seed)).unwrap();
        let second = rank(&scores, &mut StdRand::seed(seed)).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn all_non_positive_is_degenerate_and_uniform() {
    let scores = [0.0, -1.0, -5.0];
    let mut rand = StdRand::seed(1);
    let mut wins = [0usize; 3];
    const TRIALS: usize = 30_000;
    for _ in 0..TRIALS {
        let ranking = rank(&scores, &mut rand).unwrap();
        assert!(ranking.degenerate);
        wins[ranking.order[0]] += 1;
    }
    for count in wins {
        assert_float_absolute_eq!(1.0 / 3.0, count as f64 / TRIALS as f64, 0.015);
    }
}

#[test]
fn overflowing_sum_is_degenerate() {
    let mut rand = StdRand::seed(1);
    let ranking = rank(&[f64::MAX, f64::MAX, 1.0], &mut rand).unwrap();
    assert!(ranking.degenerate);
    assert_permutation(&ranking.order, 3);
}

#[test]
fn scores_at_the_floor_are_not_degenerate() {
    // failed entrants score exactly the floor; the step is still an informative draw
    let scores = [SCORE_FLOOR, SCORE_FLOOR, SCORE_FLOOR / 2.0];
    let mut rand = StdRand::seed(3);
    for _ in 0..1_000 {
        let ranking = rank(&scores, &mut rand).unwrap();
        assert!(!ranking.degenerate);
        assert_permutation(&ranking.order, 3);
    }
}

#[test]
fn negative_scores_are_floored() {
    // a non-positive score competes at the floor, so it should practically never win
    let scores = [-10.0, 1.0];
    let mut rand = StdRand::seed(5);
    for _ in 0..10_000 {
        let ranking = rank(&scores, &mut rand).unwrap();
        assert!(!ranking.degenerate);
        assert_eq!(1, ranking.order[0]);
    }
}

#[test]
fn win_frequencies_follow_scores() {
    let scores = [6.0, 3.0, 1.0];
    let mut rand = StdRand::seed(9);
    let mut wins = [0usize; 3];
    const TRIALS: usize = 100_000;
    for _ in 0..TRIALS {
        wins[rank(&scores, &mut rand).unwrap().order[0]] += 1;
    }
    for (entrant, count) in wins.iter().enumerate() {
        assert_float_absolute_eq!(scores[entrant] / 10.0, *count as f64 / TRIALS as f64, 0.01);
    }
}

#[test]
fn duplicate_scores_unbiased() {
    let scores = [2.0, 2.0, 2.0, 2.0];
    let mut rand = StdRand::seed(13);
    let mut seconds = [0usize; 4];
    const TRIALS: usize = 80_000;
    for _ in 0..TRIALS {
        seconds[rank(&scores, &mut rand).unwrap().order[1]] += 1;
    }
    for count in seconds {
        assert_float_absolute_eq!(0.25, count as f64 / TRIALS as f64, 0.01);
    }
}

#[test]
fn second_place_follows_plackett_luce() {
    // P(1 second) = P(0 first) * 3/4 + P(2 first) * 3/9
    let scores = [6.0, 3.0, 1.0];
    let expected = 0.6 * 0.75 + 0.1 * 3.0 / 9.0;
    let mut rand = StdRand::seed(21);
    let mut count = 0;
    const TRIALS: usize = 100_000;
    for _ in 0..TRIALS {
        if rank(&scores, &mut rand).unwrap().order[1] == 1 {
            count += 1;
        }
    }
    assert_float_absolute_eq!(expected, count as f64 / TRIALS as f64, 0.01);
}
