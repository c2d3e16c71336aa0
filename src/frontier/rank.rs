//! Rank function for eligible pending items
//!
//! `rank = priority + floor(relevance_score * 100)`
//!
//! Rank is derived at read time and never stored, so a relevance update is
//! visible to the very next claim. Ties are broken by `retry_count` ascending
//! and then by insertion order (row id) ascending, which makes the order total.

use crate::frontier::merge::clamp_relevance;
use std::cmp::Ordering;

/// Multiplier that maps a relevance score in [0,1] onto rank points
const RELEVANCE_SCALE: f64 = 100.0;

/// SQL expression computing the rank of a row in `items`.
///
/// `CAST(... AS INTEGER)` truncates toward zero, which equals `floor` for the
/// non-negative relevance values the store admits.
pub(crate) const RANK_SQL: &str = "(priority + CAST(relevance_score * 100 AS INTEGER))";

/// Rank points contributed by a relevance score, in `0..=100`
pub fn relevance_points(relevance_score: f64) -> i64 {
    (clamp_relevance(relevance_score) * RELEVANCE_SCALE).floor() as i64
}

/// Computes the rank of an item from its priority and relevance
///
/// # Examples
///
/// ```
/// use stashy::frontier::rank;
///
/// assert_eq!(rank(10, 0.9), 100);
/// assert_eq!(rank(20, 0.1), 30);
/// ```
pub fn rank(priority: i64, relevance_score: f64) -> i64 {
    priority.saturating_add(relevance_points(relevance_score))
}

/// Sort key giving the total claim order of eligible items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankKey {
    pub rank: i64,
    pub retry_count: u32,
    pub id: i64,
}

impl RankKey {
    pub fn new(priority: i64, relevance_score: f64, retry_count: u32, id: i64) -> Self {
        Self {
            rank: rank(priority, relevance_score),
            retry_count,
            id,
        }
    }
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher rank first, then fewer failures, then older rows
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| self.retry_count.cmp(&other.retry_count))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compares two rank keys in claim order (the item to claim first is `Less`)
pub fn claim_order(a: &RankKey, b: &RankKey) -> Ordering {
    a.cmp(b)
}
