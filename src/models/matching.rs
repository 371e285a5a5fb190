//! Match records and their caller-facing views.

use serde::{Deserialize, Serialize};

/// One giver/recipient assignment produced by a matching run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: String,
    pub giver_id: String,
    pub recipient_id: String,
    pub group_id: String,
    /// Group `run_version` of the run that created this match
    pub run_number: i64,
    pub created_at: String,
    /// false = pending notification, true = notified/settled
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notified_at: Option<String>,
}

/// Lifecycle state of a single match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchState {
    Pending,
    Notified,
}

impl Match {
    pub fn state(&self) -> MatchState {
        if self.archived {
            MatchState::Notified
        } else {
            MatchState::Pending
        }
    }
}

/// Name summary of a member referenced by a match.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberRef {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
}

/// A match with giver and recipient resolved, as returned by listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDetails {
    pub id: String,
    pub giver: MemberRef,
    pub recipient: MemberRef,
    pub group_id: String,
    pub run_number: i64,
    pub created_at: String,
    pub archived: bool,
}

/// Result of a successful matching run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingRun {
    pub group_id: String,
    pub run_number: i64,
    /// Pending matches from an earlier run that this run replaced
    pub superseded: u64,
    pub matches: Vec<Match>,
}
