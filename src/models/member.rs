//! Member model and member request bodies.

use serde::{Deserialize, Serialize};

/// A person who can take part in group draws.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Recipient of this member's most recent notified match. Only one is kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_recipient: Option<String>,
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

impl Member {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// One entry of a batch create-or-update request.
///
/// Entries without an `id` create a new member; entries with one update it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertMemberRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl UpsertMemberRequest {
    /// Required fields are present and non-blank.
    pub fn is_complete(&self) -> bool {
        [&self.first_name, &self.last_name, &self.phone_number]
            .iter()
            .all(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

/// Per-entry result of a batch upsert.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertMemberResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<Member>,
}

/// Request body for updating an existing member.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMemberRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    /// An empty string clears the phone number
    #[serde(default)]
    pub phone_number: Option<String>,
    /// An empty string clears the email
    #[serde(default)]
    pub email: Option<String>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}
