//! Sequential, exclusion-based sampling of a full finishing order from per-entrant scores.
//!
//! At each step the remaining scores are floored at [SCORE_FLOOR], renormalised and one entrant is
//! drawn in proportion to its score, then excluded from subsequent steps. This is equivalent to
//! drawing an order from a Plackett–Luce model.

use thiserror::Error;
use tinyrand::Rand;
use tracing::trace;

use crate::random::random_unit;

/// Scores at or below zero are raised to this value before normalisation.
pub const SCORE_FLOOR: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum RankingError {
    #[error("score {score} at index {index} is not finite")]
    NonFiniteScore { index: usize, score: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    /// Indices into the score slice, in finishing order.
    pub order: Vec<usize>,
    /// Whether any step fell back to a uniform draw.
    pub degenerate: bool,
}

/// Samples one finishing order for `scores`, allocating the output.
pub fn rank(scores: &[f64], rand: &mut impl Rand) -> Result<Ranking, RankingError> {
    for (index, &score) in scores.iter().enumerate() {
        if !score.is_finite() {
            return Err(RankingError::NonFiniteScore { index, score });
        }
    }
    let mut order = vec![usize::MAX; scores.len()];
    let mut bitmap = vec![true; scores.len()];
    let degenerate = rank_once(scores, &mut order, &mut bitmap, rand);
    Ok(Ranking { order, degenerate })
}

/// Samples one finishing order into `order`, using `bitmap` as scratch space for the entrants that
/// remain unplaced. Returns `true` if the trial was degenerate, i.e., at least one step had every
/// remaining score at or below zero (or a sum that overflowed) and was drawn uniformly. Positive
/// scores under [SCORE_FLOOR] still count as informative.
///
/// The last remaining entrant is placed without consuming randomness.
#[inline]
pub fn rank_once(
    scores: &[f64],
    order: &mut [usize],
    bitmap: &mut [bool],
    rand: &mut impl Rand,
) -> bool {
    debug_assert_eq!(scores.len(), order.len());
    debug_assert_eq!(scores.len(), bitmap.len());

    let entrants = scores.len();
    bitmap.fill(true);
    let mut degenerate = false;
    for (rank, remaining) in (1..=entrants).rev().enumerate() {
        let chosen = if remaining == 1 {
            last_remaining(bitmap)
        } else {
            let mut sum = 0.0;
            let mut any_positive = false;
            for (entrant, &score) in scores.iter().enumerate() {
                if bitmap[entrant] {
                    any_positive |= score > 0.0;
                    sum += floored(score);
                }
            }
            if any_positive && sum.is_finite() {
                draw_proportional(scores, bitmap, sum, rand)
            } else {
                trace!("degenerate step at rank {rank}: sum {sum}, falling back to a uniform draw");
                degenerate = true;
                draw_uniform(bitmap, remaining, rand)
            }
        };
        order[rank] = chosen;
        bitmap[chosen] = false;
    }
    degenerate
}

#[inline(always)]
fn floored(score: f64) -> f64 {
    if score > SCORE_FLOOR {
        score
    } else {
        SCORE_FLOOR
    }
}

#[inline(always)]
fn draw_proportional(scores: &[f64], bitmap: &[bool], sum: f64, rand: &mut impl Rand) -> usize {
    let random = random_unit(rand) * sum;
    let mut cumulative = 0.0;
    let mut last = usize::MAX;
    for (entrant, &score) in scores.iter().enumerate() {
        if bitmap[entrant] {
            cumulative += floored(score);
            if cumulative > random {
                return entrant;
            }
            last = entrant;
        }
    }
    // rounding in the cumulative sum can leave the draw just short of the total
    last
}

#[inline(always)]
fn draw_uniform(bitmap: &[bool], remaining: usize, rand: &mut impl Rand) -> usize {
    let target = usize::min((random_unit(rand) * remaining as f64) as usize, remaining - 1);
    bitmap
        .iter()
        .enumerate()
        .filter(|(_, unplaced)| **unplaced)
        .nth(target)
        .map(|(entrant, _)| entrant)
        .unwrap_or_else(|| last_remaining(bitmap))
}

#[inline(always)]
fn last_remaining(bitmap: &[bool]) -> usize {
    bitmap
        .iter()
        .position(|&unplaced| unplaced)
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests;
