/// Item state definitions for tracking crawl progress
///
/// This module defines the states a work item can be recorded in by the
/// progress ledger.
use std::fmt;

/// Represents the recorded state of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
    /// A worker has picked up the item and is fetching it
    InProgress,

    /// The item's record is in the output and will not be fetched again
    Finished,

    /// The item failed permanently or exhausted its retries in some run
    Failed,
}

impl ItemState {
    /// Returns true if this state means the item needs no further work
    ///
    /// Only `Finished` is final. A `Failed` item is retried on the next run,
    /// and a dangling `InProgress` means the previous run died mid-fetch.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Returns true if this represents an error state
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Converts the state to its ledger string representation
    pub fn to_log_string(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    /// Parses a state from its ledger string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_log_string(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible item states
    pub fn all_states() -> Vec<Self> {
        vec![Self::InProgress, Self::Finished, Self::Failed]
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_log_string())
    }
}
