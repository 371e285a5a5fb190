//! Notification channel and batch report types.

use serde::{Deserialize, Serialize};

use super::MemberRef;

/// Medium used to tell a giver who they are buying for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Sms,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
        }
    }

    /// Name of the member field this channel delivers to.
    pub fn contact_field(&self) -> &'static str {
        match self {
            Channel::Sms => "phone number",
            Channel::Email => "email",
        }
    }
}

/// A match that was delivered and settled.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSuccess {
    pub match_id: String,
    pub group_id: String,
    pub channel: Channel,
    pub message_id: String,
    pub giver: MemberRef,
    pub recipient: MemberRef,
    pub message_text: String,
}

/// A match that stayed pending.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFailure {
    pub match_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub giver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub code: String,
    pub error: String,
    pub retryable: bool,
}

/// Summary of one notification pass over a group's pending matches.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyBatchReport {
    pub success: bool,
    pub group_id: String,
    pub channel: Channel,
    pub total_matches: usize,
    pub successful_notifications: usize,
    pub failed_notifications: usize,
    pub group_archived: bool,
    pub notifications: Vec<NotificationSuccess>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<NotificationFailure>,
}

/// Result of notifying one match through the single-match endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleNotification {
    pub notification: NotificationSuccess,
    pub group_archived: bool,
}
