//! Group model and group request bodies.

use serde::{Deserialize, Serialize};

/// A set of members drawing names together for one year.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub year: String,
    /// Membership, in insertion order
    pub member_ids: Vec<String>,
    /// Matches produced by every run of this group, oldest first
    pub match_ids: Vec<String>,
    /// Monotonic: once true, never reset
    pub archived: bool,
    /// Number of matching runs started; guards the run critical section
    pub run_version: i64,
    pub updated_at: String,
}

/// Request body for creating or updating a group.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertGroupRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

/// Outcome of deleting a group together with its matches.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedGroup {
    pub group: Group,
    pub deleted_matches_count: u64,
}

/// Stored group after an upsert.
#[derive(Debug, Clone)]
pub struct UpsertedGroup {
    pub group: Group,
    pub created: bool,
    /// Pending matches dropped because the roster changed.
    pub superseded: u64,
}
