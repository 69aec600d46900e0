//! Vote reconciliation.
//!
//! A voter holds at most one vote per target. Re-sending the same direction
//! clears it, sending the opposite direction flips it. Every transition carries
//! the delta to apply to the target's aggregate counter so that the counter
//! always equals the sum of stored vote weights.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Up,
    Down,
}

impl VoteType {
    /// Contribution of one stored vote to the aggregate counter.
    pub fn weight(self) -> i64 {
        match self {
            VoteType::Up => 1,
            VoteType::Down => -1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VoteType::Up => "up",
            VoteType::Down => "down",
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown vote type '{0}'")]
pub struct UnknownVoteType(pub String);

impl FromStr for VoteType {
    type Err = UnknownVoteType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(VoteType::Up),
            "down" => Ok(VoteType::Down),
            other => Err(UnknownVoteType(other.to_string())),
        }
    }
}

/// What to do with the `(voter, target)` vote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteAction {
    Insert(VoteType),
    Delete,
    Update(VoteType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: VoteAction,
    /// Amount to add to the target's `votes` counter.
    pub delta: i64,
    /// The voter's vote once the action is applied.
    pub current: Option<VoteType>,
}

/// Decide the row action and counter delta for one vote request.
pub fn reconcile(existing: Option<VoteType>, requested: VoteType) -> Transition {
    let (action, current) = match existing {
        None => (VoteAction::Insert(requested), Some(requested)),
        Some(prev) if prev == requested => (VoteAction::Delete, None),
        Some(_) => (VoteAction::Update(requested), Some(requested)),
    };
    let weight = |v: Option<VoteType>| v.map(VoteType::weight).unwrap_or(0);
    Transition { action, delta: weight(current) - weight(existing), current }
}
