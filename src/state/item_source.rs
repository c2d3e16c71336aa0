use std::fmt;

/// How an item entered the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemSource {
    /// Operator-provided starting point; never demoted by a later merge
    Seed,

    /// Discovered by a worker while expanding another item
    Frontier,

    /// Enqueued by hand outside of seeding
    Manual,
}

impl ItemSource {
    pub fn is_seed(&self) -> bool {
        matches!(self, Self::Seed)
    }

    /// Resolves the source tag after a rediscovery: seeds stay seeds,
    /// everything else takes the incoming tag.
    pub fn merged_with(self, incoming: ItemSource) -> ItemSource {
        if self.is_seed() {
            self
        } else {
            incoming
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Frontier => "frontier",
            Self::Manual => "manual",
        }
    }

    /// Parses a source tag; unknown tags are treated as frontier discoveries
    pub fn from_db_string(s: &str) -> Self {
        match s {
            "seed" => Self::Seed,
            "manual" => Self::Manual,
            _ => Self::Frontier,
        }
    }
}

impl fmt::Display for ItemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
