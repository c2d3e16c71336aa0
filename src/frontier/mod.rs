//! Frontier policy: how items are ranked for claiming and how a rediscovered
//! URL is reconciled with what the queue already knows about it.
//!
//! Both pieces are pure functions over plain values. The storage layer calls
//! them inside its transactions so that the policy lives in one place and the
//! SQL only has to load and persist rows.

mod merge;
mod rank;

pub use merge::{
    clamp_relevance, normalize_depth, reconcile, DiscoveredLink, MergeOutcome, MergeState,
    Reconciled,
};
pub use rank::{claim_order, rank, relevance_points, RankKey};

pub(crate) use rank::RANK_SQL;
