//! Match lifecycle: matching runs, notification and group archival.
//!
//! A run replaces the group's pending matches atomically. Each match moves
//! from pending to notified exactly once, after the delivery provider accepts
//! the message, and only then is the giver's last recipient updated. A group
//! is archived once every match of its latest run is notified.
//!
//! Lock order is group, then match, then member. A match lock is held across
//! its delivery so one match is never sent twice.

mod locks;

pub use locks::KeyedLocks;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::db::Repository;
use crate::delivery::{self, Delivery, OutboundMessage};
use crate::errors::AppError;
use crate::matcher::{self, Candidate, MatchingFailure, Shuffler};
use crate::models::{
    Channel, DeletedGroup, Group, MatchDetails, MatchState, MatchingRun, Member, MemberRef,
    NotificationFailure, NotificationSuccess, NotifyBatchReport, SingleNotification,
    UpsertGroupRequest, UpsertedGroup,
};

/// Orchestrates matching runs and their notification.
pub struct MatchLifecycle {
    repo: Arc<Repository>,
    delivery: Arc<dyn Delivery>,
    shuffler: Arc<dyn Shuffler>,
    delivery_timeout: Duration,
    group_locks: KeyedLocks,
    match_locks: KeyedLocks,
    member_locks: KeyedLocks,
}

impl MatchLifecycle {
    pub fn new(
        repo: Arc<Repository>,
        delivery: Arc<dyn Delivery>,
        shuffler: Arc<dyn Shuffler>,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            delivery,
            shuffler,
            delivery_timeout,
            group_locks: KeyedLocks::new(),
            match_locks: KeyedLocks::new(),
            member_locks: KeyedLocks::new(),
        }
    }

    /// Run the matcher for a group and persist the result as its pending set.
    ///
    /// Pending matches of an earlier, unfinished run are replaced in the same
    /// transaction. On any failure nothing is written.
    pub async fn start_matching_run(&self, group_id: &str) -> Result<MatchingRun, AppError> {
        let _guard = self.group_locks.lock(group_id).await;

        let group = self.require_group(group_id).await?;
        if group.archived {
            return Err(AppError::GroupArchived(format!(
                "Group {} is archived. No further action can be taken on it.",
                group_id
            )));
        }

        let members = self.repo.group_members(group_id).await?;
        if members.len() < 2 {
            return Err(AppError::InsufficientMembers(format!(
                "Group {} has {} member(s); at least 2 are needed to create matches",
                group_id,
                members.len()
            )));
        }

        let candidates: Vec<Candidate> = members
            .iter()
            .map(|m| Candidate::new(m.id.as_str(), m.last_recipient.as_deref()))
            .collect();

        let pairs = matcher::compute_assignment(&candidates, self.shuffler.as_ref()).map_err(
            |failure| {
                tracing::warn!(group_id, %failure, "Matching run found no valid assignment");
                match failure {
                    MatchingFailure::TooFewMembers { .. } => {
                        AppError::InsufficientMembers(failure.to_string())
                    }
                    MatchingFailure::NoValidAssignment { .. } => AppError::NoValidAssignment(
                        "Could not find a valid match. Please try again.".to_string(),
                    ),
                }
            },
        )?;

        let pairs: Vec<(String, String)> = pairs
            .into_iter()
            .map(|p| (p.giver, p.recipient))
            .collect();
        let (superseded, matches) = self
            .repo
            .replace_pending_matches(group_id, group.run_version, &pairs)
            .await?;

        if superseded > 0 {
            tracing::info!(group_id, superseded, "Superseded pending matches of earlier run");
        }
        tracing::info!(
            group_id,
            run_number = group.run_version + 1,
            pairs = matches.len(),
            "Matching run complete"
        );

        Ok(MatchingRun {
            group_id: group_id.to_string(),
            run_number: group.run_version + 1,
            superseded,
            matches,
        })
    }

    /// Deliver one pending match and settle it.
    ///
    /// On any error the match stays pending and can be retried.
    pub async fn notify(
        &self,
        match_id: &str,
        channel: Channel,
    ) -> Result<NotificationSuccess, AppError> {
        let pending = self
            .repo
            .get_match(match_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Match {} not found", match_id)))?;
        let group = self.require_group(&pending.group_id).await?;

        self.deliver_and_settle(match_id, &group, channel).await
    }

    /// Archive the group if its latest run is fully notified and the batch
    /// that just finished delivered at least one message.
    ///
    /// Returns whether the group is archived afterwards. Calling it again on
    /// an archived group is a no-op.
    pub async fn maybe_archive_group(
        &self,
        group_id: &str,
        batch_succeeded: bool,
    ) -> Result<bool, AppError> {
        let _guard = self.group_locks.lock(group_id).await;

        let group = self.require_group(group_id).await?;
        if group.archived {
            return Ok(true);
        }
        if !batch_succeeded {
            return Ok(false);
        }

        let archived = self.repo.archive_group_if_settled(group_id).await?;
        if archived {
            tracing::info!(group_id, run_number = group.run_version, "Group archived");
        }
        Ok(archived)
    }

    /// Notify a single match, then apply the archival rule to its group.
    pub async fn notify_one(
        &self,
        match_id: &str,
        channel: Channel,
    ) -> Result<SingleNotification, AppError> {
        let notification = self.notify(match_id, channel).await?;
        let group_archived = self
            .maybe_archive_group(&notification.group_id, true)
            .await?;

        Ok(SingleNotification {
            notification,
            group_archived,
        })
    }

    /// Notify every pending match of a group over one channel.
    ///
    /// Matches are delivered concurrently; each failure is reported on its
    /// own and leaves that match pending.
    pub async fn notify_batch(
        &self,
        group_id: &str,
        channel: Channel,
    ) -> Result<NotifyBatchReport, AppError> {
        let group = self.require_group(group_id).await?;
        if group.match_ids.is_empty() {
            return Err(AppError::NotFound(format!(
                "No matches found for group {}",
                group_id
            )));
        }
        if group.archived {
            return Err(AppError::GroupArchived(format!(
                "Group {} is already archived (notifications already sent)",
                group_id
            )));
        }

        let pending = self.repo.pending_matches(group_id).await?;
        if pending.is_empty() {
            return Err(AppError::AlreadyArchived(format!(
                "All matches in group {} are already archived",
                group_id
            )));
        }

        let outcomes = join_all(
            pending
                .iter()
                .map(|m| self.deliver_and_settle(&m.id, &group, channel)),
        )
        .await;

        let mut notifications = Vec::new();
        let mut failures = Vec::new();
        for (record, outcome) in pending.iter().zip(outcomes) {
            match outcome {
                Ok(success) => notifications.push(success),
                Err(error) => failures.push(NotificationFailure {
                    match_id: record.id.clone(),
                    giver_id: Some(record.giver_id.clone()),
                    recipient_id: Some(record.recipient_id.clone()),
                    code: error.error_code().to_string(),
                    error: error.message().to_string(),
                    retryable: error.is_retryable(),
                }),
            }
        }

        let group_archived = self
            .maybe_archive_group(group_id, !notifications.is_empty())
            .await?;

        tracing::info!(
            group_id,
            channel = channel.as_str(),
            total = pending.len(),
            succeeded = notifications.len(),
            failed = failures.len(),
            group_archived,
            "Notification batch finished"
        );

        Ok(NotifyBatchReport {
            success: !notifications.is_empty(),
            group_id: group_id.to_string(),
            channel,
            total_matches: pending.len(),
            successful_notifications: notifications.len(),
            failed_notifications: failures.len(),
            group_archived,
            notifications,
            failures,
        })
    }

    /// Matches of a group, pending only unless `include_archived`.
    pub async fn list_matches(
        &self,
        group_id: &str,
        include_archived: bool,
    ) -> Result<Vec<MatchDetails>, AppError> {
        self.require_group(group_id).await?;
        self.repo.list_match_details(group_id, include_archived).await
    }

    /// Create a group or edit an existing one.
    ///
    /// Edits hold the group lock so a roster change cannot interleave with a
    /// matching run. Changing the roster drops the unfinished run.
    pub async fn upsert_group(
        &self,
        request: &UpsertGroupRequest,
    ) -> Result<UpsertedGroup, AppError> {
        let _guard = match request.id.as_deref() {
            Some(id) => Some(self.group_locks.lock(id).await),
            None => None,
        };

        let upserted = self.repo.upsert_group(request).await?;
        if upserted.superseded > 0 {
            tracing::info!(
                group_id = %upserted.group.id,
                superseded = upserted.superseded,
                "Roster changed; pending matches dropped"
            );
        }
        Ok(upserted)
    }

    /// Delete a member along with its memberships and matches.
    pub async fn delete_member(&self, member_id: &str) -> Result<Member, AppError> {
        let _guard = self.member_locks.lock(member_id).await;
        let member = self.repo.delete_member(member_id).await?;
        tracing::info!(member_id, "Member deleted with its memberships and matches");
        Ok(member)
    }

    /// Delete a group and all of its matches.
    pub async fn delete_group(&self, group_id: &str) -> Result<DeletedGroup, AppError> {
        let _guard = self.group_locks.lock(group_id).await;
        let deleted = self.repo.delete_group(group_id).await?;
        tracing::info!(
            group_id,
            deleted_matches = deleted.deleted_matches_count,
            "Group deleted"
        );
        Ok(deleted)
    }

    async fn require_group(&self, group_id: &str) -> Result<Group, AppError> {
        self.repo
            .get_group(group_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Group {} not found", group_id)))
    }

    async fn require_member(&self, member_id: &str) -> Result<Member, AppError> {
        self.repo
            .get_member(member_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Member {} not found", member_id)))
    }

    async fn deliver_and_settle(
        &self,
        match_id: &str,
        group: &Group,
        channel: Channel,
    ) -> Result<NotificationSuccess, AppError> {
        let _match_guard = self.match_locks.lock(match_id).await;

        // Re-read under the lock; a concurrent call may have settled it.
        let pending = self
            .repo
            .get_match(match_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Match {} not found", match_id)))?;
        if pending.state() == MatchState::Notified {
            return Err(AppError::AlreadyArchived(format!(
                "Match {} has already been notified",
                pending.id
            )));
        }

        let giver = self.require_member(&pending.giver_id).await?;
        let recipient = self.require_member(&pending.recipient_id).await?;

        let to = delivery::contact_for(&giver, channel).ok_or_else(|| {
            tracing::warn!(
                match_id = %pending.id,
                giver_id = %giver.id,
                "Giver has no {}",
                channel.contact_field()
            );
            AppError::MissingContactInfo(format!(
                "Secret Santa {} has no {}",
                giver.full_name(),
                channel.contact_field()
            ))
        })?;

        let text = delivery::assignment_text(&giver, &recipient);
        let message = OutboundMessage {
            channel,
            match_id: pending.id.clone(),
            to: to.to_string(),
            to_name: giver.full_name(),
            subject: match channel {
                Channel::Email => Some(delivery::email_subject(&group.name)),
                Channel::Sms => None,
            },
            text: text.clone(),
            group_name: group.name.clone(),
        };

        let receipt = match tokio::time::timeout(
            self.delivery_timeout,
            self.delivery.deliver(&message),
        )
        .await
        {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                tracing::error!(match_id = %pending.id, reason = %e, "Delivery failed");
                return Err(AppError::DeliveryFailure(format!(
                    "Failed to send {}: {}",
                    channel.as_str(),
                    e
                )));
            }
            Err(_) => {
                tracing::error!(
                    match_id = %pending.id,
                    timeout_ms = self.delivery_timeout.as_millis() as u64,
                    "Delivery timed out"
                );
                return Err(AppError::DeliveryFailure(format!(
                    "Failed to send {}: timed out after {:?}",
                    channel.as_str(),
                    self.delivery_timeout
                )));
            }
        };

        {
            let _giver_guard = self.member_locks.lock(&giver.id).await;
            self.repo.mark_match_notified(&pending).await?;
        }

        tracing::info!(
            match_id = %pending.id,
            message_id = %receipt.message_id,
            channel = channel.as_str(),
            "Notification delivered"
        );

        Ok(NotificationSuccess {
            match_id: pending.id.clone(),
            group_id: pending.group_id.clone(),
            channel,
            message_id: receipt.message_id,
            giver: member_ref(&giver),
            recipient: member_ref(&recipient),
            message_text: text,
        })
    }
}

fn member_ref(member: &Member) -> MemberRef {
    MemberRef {
        id: member.id.clone(),
        first_name: member.first_name.clone(),
        last_name: member.last_name.clone(),
    }
}
