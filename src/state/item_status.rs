//! Item status definitions for the frontier lifecycle
//!
//! ```text
//!            claim                 mark_done
//! pending ----------> in_progress -----------> done
//!    ^                   |                      |
//!    |   mark_failed     |  mark_failed         |
//!    +---(retries left)--+  (exhausted) -> failed
//!    |                                          |
//!    +------------- merge (resurrection) -------+
//! ```

use std::fmt;

/// Represents the current lifecycle state of a frontier item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    /// Waiting to be claimed
    Pending,

    /// Claimed by exactly one worker; `claim_owner` and `claim_time` are set
    InProgress,

    /// Successfully processed
    Done,

    /// Retries exhausted; kept with its last error for inspection
    Failed,
}

impl ItemStatus {
    /// Returns true for states a rediscovery can resurrect back to pending
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if an item in this state may be handed out by a claim
    /// (retry budget and backoff are checked separately)
    pub fn is_claimable_state(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all statuses
    pub fn all_statuses() -> [Self; 4] {
        [Self::Pending, Self::InProgress, Self::Done, Self::Failed]
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
