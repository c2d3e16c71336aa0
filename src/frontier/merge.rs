//! Discovery merge policy
//!
//! A URL that is discovered again is reconciled with the existing row rather
//! than overwritten. Every rank input moves only in its safe direction:
//! priority and relevance can only grow, depth can only shrink, the first
//! discoverer keeps the lineage, and a seed stays a seed. The policy is
//! order-independent, so arbitrary rediscovery orders (including cycles in
//! the link graph) converge to the same row.

use crate::state::{ItemSource, ItemStatus};

/// A URL reported by a scorer (or an operator) for inclusion in the frontier
///
/// Values are untrusted: [`DiscoveredLink::sanitized`] clamps them before
/// they reach the store.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredLink {
    /// Item that linked to this URL, if any
    pub parent_id: Option<i64>,
    /// Raw URL; canonicalized by the store before lookup
    pub url: String,
    pub priority: i64,
    pub relevance_score: f64,
    pub source: ItemSource,
    /// Hop count from the nearest seed
    pub depth: i64,
}

impl DiscoveredLink {
    /// A link found while expanding `parent_id`
    pub fn discovered(
        parent_id: i64,
        url: impl Into<String>,
        priority: i64,
        relevance_score: f64,
        depth: i64,
    ) -> Self {
        Self {
            parent_id: Some(parent_id),
            url: url.into(),
            priority,
            relevance_score,
            source: ItemSource::Frontier,
            depth,
        }
    }

    /// A seed URL at depth 0 with no parent
    pub fn seed(url: impl Into<String>, priority: i64) -> Self {
        Self {
            parent_id: None,
            url: url.into(),
            priority,
            relevance_score: 0.0,
            source: ItemSource::Seed,
            depth: 0,
        }
    }

    pub fn with_relevance(mut self, relevance_score: f64) -> Self {
        self.relevance_score = relevance_score;
        self
    }

    pub fn with_source(mut self, source: ItemSource) -> Self {
        self.source = source;
        self
    }

    /// Rank inputs with out-of-range values clamped instead of rejected
    pub fn sanitized(&self) -> MergeState {
        MergeState {
            status: ItemStatus::Pending,
            priority: self.priority,
            relevance_score: clamp_relevance(self.relevance_score),
            depth: normalize_depth(self.depth),
            parent_id: self.parent_id,
            source: self.source,
        }
    }
}

/// Clamps a relevance score into `[0, 1]`; NaN becomes 0
pub fn clamp_relevance(relevance_score: f64) -> f64 {
    if relevance_score.is_nan() {
        0.0
    } else {
        relevance_score.clamp(0.0, 1.0)
    }
}

/// Negative depths are treated as seeds (depth 0)
pub fn normalize_depth(depth: i64) -> u32 {
    depth.clamp(0, u32::MAX as i64) as u32
}

/// The merge-relevant slice of an item row
#[derive(Debug, Clone, PartialEq)]
pub struct MergeState {
    pub status: ItemStatus,
    pub priority: i64,
    pub relevance_score: f64,
    pub depth: u32,
    pub parent_id: Option<i64>,
    pub source: ItemSource,
}

/// Result of reconciling an existing row with an incoming discovery
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub priority: i64,
    pub relevance_score: f64,
    pub depth: u32,
    pub parent_id: Option<i64>,
    pub source: ItemSource,
    /// The existing row was done/failed and goes back to pending with a
    /// fresh retry budget and no claim
    pub resurrect: bool,
}

/// Applies the merge policy to an existing row and a sanitized discovery
pub fn reconcile(existing: &MergeState, incoming: &MergeState) -> Reconciled {
    Reconciled {
        priority: existing.priority.max(incoming.priority),
        relevance_score: clamp_relevance(existing.relevance_score)
            .max(clamp_relevance(incoming.relevance_score)),
        depth: existing.depth.min(incoming.depth),
        parent_id: existing.parent_id.or(incoming.parent_id),
        source: existing.source.merged_with(incoming.source),
        resurrect: existing.status.is_terminal(),
    }
}

/// What a merge call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First sighting of the URL; a new pending item was created
    Inserted { item_id: i64 },
    /// The URL was already known and its row was reconciled
    Updated { item_id: i64, resurrected: bool },
}

impl MergeOutcome {
    /// True when the call grew the frontier
    pub fn inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }

    pub fn item_id(&self) -> i64 {
        match self {
            Self::Inserted { item_id } | Self::Updated { item_id, .. } => *item_id,
        }
    }

    pub fn resurrected(&self) -> bool {
        matches!(
            self,
            Self::Updated {
                resurrected: true,
                ..
            }
        )
    }
}
