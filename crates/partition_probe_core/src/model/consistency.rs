//! Replica acknowledgment policy.
//!
//! # Invariants
//! - `Quorum` is a strict majority of the node set.
//! - Resolution never returns zero; callers compare against live nodes.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// How many replicas must acknowledge a read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyLevel {
    One,
    Two,
    Three,
    /// Strict majority of the configured nodes.
    #[default]
    Quorum,
    All,
}

impl ConsistencyLevel {
    /// Resolves the level to a replica count for a set of `node_count` nodes.
    ///
    /// The result may exceed `node_count` (e.g. `Three` on two nodes); such a
    /// request can never be satisfied and is reported as unavailable.
    pub fn required_replicas(self, node_count: usize) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Quorum => node_count / 2 + 1,
            Self::All => node_count.max(1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::One => "ONE",
            Self::Two => "TWO",
            Self::Three => "THREE",
            Self::Quorum => "QUORUM",
            Self::All => "ALL",
        }
    }
}

impl Display for ConsistencyLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown consistency level name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseConsistencyError(pub String);

impl Display for ParseConsistencyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unsupported consistency level `{}`; expected ONE|TWO|THREE|QUORUM|ALL",
            self.0
        )
    }
}

impl Error for ParseConsistencyError {}

impl FromStr for ConsistencyLevel {
    type Err = ParseConsistencyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        // Single-datacenter backend: LOCAL_* levels collapse to their global form.
        match value.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ONE" | "LOCAL_ONE" => Ok(Self::One),
            "TWO" => Ok(Self::Two),
            "THREE" => Ok(Self::Three),
            "QUORUM" | "LOCAL_QUORUM" => Ok(Self::Quorum),
            "ALL" => Ok(Self::All),
            other => Err(ParseConsistencyError(other.to_string())),
        }
    }
}
