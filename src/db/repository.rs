//! Database repository for members, groups and matches.
//!
//! Multi-row changes (cascading deletes, replacing a group's pending match
//! set, settling a match) run inside a single transaction.

use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    DeletedGroup, Group, Match, MatchDetails, Member, MemberRef, UpdateMemberRequest,
    UpsertGroupRequest, UpsertMemberRequest, UpsertMemberResult, UpsertedGroup,
};

const MEMBER_COLUMNS: &str =
    "id, first_name, last_name, phone_number, email, last_recipient_id, updated_at, version";

const MATCH_COLUMNS: &str =
    "id, giver_id, recipient_id, group_id, run_number, created_at, archived, notified_at";

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== MEMBER OPERATIONS ====================

    /// List all members.
    pub async fn list_members(&self) -> Result<Vec<Member>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members ORDER BY last_name, first_name"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(member_from_row).collect())
    }

    /// Get a member by ID.
    pub async fn get_member(&self, id: &str) -> Result<Option<Member>, AppError> {
        let row = sqlx::query(&format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(member_from_row))
    }

    /// Create or update a batch of members.
    ///
    /// Every entry is validated before anything is written. Unknown ids are
    /// reported per entry instead of failing the batch.
    pub async fn upsert_members(
        &self,
        requests: &[UpsertMemberRequest],
    ) -> Result<Vec<UpsertMemberResult>, AppError> {
        if requests.is_empty() {
            return Err(AppError::Validation(
                "Request body must be a non-empty array of members".to_string(),
            ));
        }
        if !requests.iter().all(UpsertMemberRequest::is_complete) {
            return Err(AppError::Validation(
                "Missing required fields (firstName, lastName, phoneNumber) in one or more members"
                    .to_string(),
            ));
        }

        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let result = match request.id.as_deref() {
                Some(id) => {
                    let update = UpdateMemberRequest {
                        first_name: request.first_name.clone(),
                        last_name: request.last_name.clone(),
                        phone_number: request.phone_number.clone(),
                        email: request.email.clone(),
                        expected_version: None,
                    };
                    match self.update_member(id, &update).await {
                        Ok(member) => UpsertMemberResult {
                            success: true,
                            message: "Member updated".to_string(),
                            member: Some(member),
                        },
                        Err(AppError::NotFound(_)) => UpsertMemberResult {
                            success: false,
                            message: format!("Member with ID {} not found", id),
                            member: None,
                        },
                        Err(e) => return Err(e),
                    }
                }
                None => UpsertMemberResult {
                    success: true,
                    message: "Member added".to_string(),
                    member: Some(self.create_member(request).await?),
                },
            };
            results.push(result);
        }

        Ok(results)
    }

    /// Create a new member. Required fields are checked by the caller.
    pub async fn create_member(&self, request: &UpsertMemberRequest) -> Result<Member, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let first_name = request.first_name.clone().unwrap_or_default();
        let last_name = request.last_name.clone().unwrap_or_default();
        let phone_number = non_blank(request.phone_number.clone());
        let email = non_blank(request.email.clone());

        sqlx::query(
            "INSERT INTO members (id, first_name, last_name, phone_number, email, last_recipient_id, updated_at, version) VALUES (?, ?, ?, ?, ?, NULL, ?, 1)"
        )
        .bind(&id)
        .bind(&first_name)
        .bind(&last_name)
        .bind(&phone_number)
        .bind(&email)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Member {
            id,
            first_name,
            last_name,
            phone_number,
            email,
            last_recipient: None,
            updated_at: now,
            version: 1,
        })
    }

    /// Update a member with optimistic concurrency control.
    pub async fn update_member(
        &self,
        id: &str,
        request: &UpdateMemberRequest,
    ) -> Result<Member, AppError> {
        let existing = self
            .get_member(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Member {} not found", id)))?;

        // Check version for optimistic concurrency
        if let Some(expected) = request.expected_version {
            if existing.version != expected {
                return Err(AppError::Conflict(format!(
                    "Version mismatch: expected {}, current {}",
                    expected, existing.version
                )));
            }
        }

        let first_name = match request.first_name.as_deref().map(str::trim) {
            Some("") => return Err(AppError::Validation("First name cannot be empty".into())),
            Some(name) => name.to_string(),
            None => existing.first_name.clone(),
        };
        let last_name = match request.last_name.as_deref().map(str::trim) {
            Some("") => return Err(AppError::Validation("Last name cannot be empty".into())),
            Some(name) => name.to_string(),
            None => existing.last_name.clone(),
        };
        let phone_number = match &request.phone_number {
            Some(phone) => non_blank(Some(phone.clone())),
            None => existing.phone_number.clone(),
        };
        let email = match &request.email {
            Some(email) => non_blank(Some(email.clone())),
            None => existing.email.clone(),
        };

        let now = Utc::now().to_rfc3339();
        let new_version = existing.version + 1;

        // Conditional UPDATE with version check to prevent lost updates
        let result = sqlx::query(
            "UPDATE members SET first_name = ?, last_name = ?, phone_number = ?, email = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(&first_name)
        .bind(&last_name)
        .bind(&phone_number)
        .bind(&email)
        .bind(&now)
        .bind(new_version)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(
                "Concurrent modification detected".to_string(),
            ));
        }

        Ok(Member {
            first_name,
            last_name,
            phone_number,
            email,
            updated_at: now,
            version: new_version,
            ..existing
        })
    }

    /// Delete a member, its group memberships and every match it takes part in.
    pub async fn delete_member(&self, id: &str) -> Result<Member, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let member = row
            .as_ref()
            .map(member_from_row)
            .ok_or_else(|| AppError::NotFound(format!("Member {} not found", id)))?;

        sqlx::query("DELETE FROM members WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM group_members WHERE member_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM matches WHERE giver_id = ? OR recipient_id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(member)
    }

    // ==================== GROUP OPERATIONS ====================

    /// List all groups.
    pub async fn list_groups(&self) -> Result<Vec<Group>, AppError> {
        let ids: Vec<String> = sqlx::query("SELECT id FROM groups ORDER BY year DESC, name")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.get("id"))
            .collect();

        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(group) = self.get_group(&id).await? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    /// Get a group with its membership and match ids.
    pub async fn get_group(&self, id: &str) -> Result<Option<Group>, AppError> {
        let mut conn = self.pool.acquire().await?;
        load_group(&mut *conn, id).await
    }

    /// Members of a group, in membership order.
    pub async fn group_members(&self, group_id: &str) -> Result<Vec<Member>, AppError> {
        let rows = sqlx::query(
            "SELECT m.id, m.first_name, m.last_name, m.phone_number, m.email, m.last_recipient_id, m.updated_at, m.version
             FROM group_members gm JOIN members m ON m.id = gm.member_id
             WHERE gm.group_id = ? ORDER BY gm.position",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(member_from_row).collect())
    }

    /// Create a group, or replace the name, year and roster of an existing one.
    ///
    /// A roster change on an existing group supersedes its unfinished run:
    /// pending matches are deleted and `run_version` is bumped in the same
    /// transaction, so the group needs a fresh run before it can archive.
    pub async fn upsert_group(
        &self,
        request: &UpsertGroupRequest,
    ) -> Result<UpsertedGroup, AppError> {
        let name = request.name.as_deref().map(str::trim).unwrap_or_default();
        let year = request.year.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() || year.is_empty() || request.member_ids.is_empty() {
            return Err(AppError::Validation(
                "Missing required fields (name, year, memberIds)".to_string(),
            ));
        }

        let mut member_ids: Vec<String> = Vec::with_capacity(request.member_ids.len());
        for id in &request.member_ids {
            if !member_ids.contains(id) {
                member_ids.push(id.clone());
            }
        }

        let mut tx = self.pool.begin().await?;

        let mut unknown = Vec::new();
        for id in &member_ids {
            let exists = sqlx::query("SELECT 1 FROM members WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            if !exists {
                unknown.push(id.as_str());
            }
        }
        if !unknown.is_empty() {
            return Err(AppError::Validation(format!(
                "Unknown member ids: {}",
                unknown.join(", ")
            )));
        }

        let now = Utc::now().to_rfc3339();
        let (group_id, created, superseded) = match request.id.as_deref() {
            Some(id) => {
                let existing = load_group(&mut *tx, id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Group {} not found", id)))?;
                if existing.archived {
                    return Err(AppError::GroupArchived(format!(
                        "Group {} is archived and can no longer be edited",
                        id
                    )));
                }

                let roster_changed = existing.member_ids.len() != member_ids.len()
                    || existing.member_ids.iter().any(|m| !member_ids.contains(m));

                let mut superseded = 0;
                if roster_changed {
                    superseded =
                        sqlx::query("DELETE FROM matches WHERE group_id = ? AND archived = 0")
                            .bind(id)
                            .execute(&mut *tx)
                            .await?
                            .rows_affected();
                    sqlx::query(
                        "UPDATE groups SET name = ?, year = ?, run_version = run_version + 1, updated_at = ? WHERE id = ?",
                    )
                    .bind(name)
                    .bind(year)
                    .bind(&now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                } else {
                    sqlx::query("UPDATE groups SET name = ?, year = ?, updated_at = ? WHERE id = ?")
                        .bind(name)
                        .bind(year)
                        .bind(&now)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }

                sqlx::query("DELETE FROM group_members WHERE group_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                (id.to_string(), false, superseded)
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO groups (id, name, year, archived, run_version, updated_at) VALUES (?, ?, ?, 0, 0, ?)",
                )
                .bind(&id)
                .bind(name)
                .bind(year)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                (id, true, 0)
            }
        };

        for (position, member_id) in member_ids.iter().enumerate() {
            sqlx::query("INSERT INTO group_members (group_id, member_id, position) VALUES (?, ?, ?)")
                .bind(&group_id)
                .bind(member_id)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
        }

        let group = load_group(&mut *tx, &group_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Group {} vanished during upsert", group_id)))?;

        tx.commit().await?;
        Ok(UpsertedGroup {
            group,
            created,
            superseded,
        })
    }

    /// Delete a group and every match it produced.
    pub async fn delete_group(&self, id: &str) -> Result<DeletedGroup, AppError> {
        let mut tx = self.pool.begin().await?;

        let group = load_group(&mut *tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Group {} not found", id)))?;

        let deleted_matches_count = sqlx::query("DELETE FROM matches WHERE group_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM group_members WHERE group_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(DeletedGroup {
            group,
            deleted_matches_count,
        })
    }

    /// Set `archived` on a group whose latest run is fully notified.
    ///
    /// Returns true only for the call that performed the transition.
    pub async fn archive_group_if_settled(&self, group_id: &str) -> Result<bool, AppError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE groups SET archived = 1, updated_at = ?
             WHERE id = ? AND archived = 0
               AND EXISTS (SELECT 1 FROM matches m
                           WHERE m.group_id = groups.id AND m.run_number = groups.run_version)
               AND NOT EXISTS (SELECT 1 FROM matches m
                               WHERE m.group_id = groups.id AND m.run_number = groups.run_version
                                 AND m.archived = 0)",
        )
        .bind(&now)
        .bind(group_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== MATCH OPERATIONS ====================

    /// Get a match by ID.
    pub async fn get_match(&self, id: &str) -> Result<Option<Match>, AppError> {
        let row = sqlx::query(&format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(match_from_row))
    }

    /// Pending matches of a group, in creation order.
    pub async fn pending_matches(&self, group_id: &str) -> Result<Vec<Match>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE group_id = ? AND archived = 0 ORDER BY run_number, seq"
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(match_from_row).collect())
    }

    /// Matches of a group with giver and recipient names, newest run first.
    pub async fn list_match_details(
        &self,
        group_id: &str,
        include_archived: bool,
    ) -> Result<Vec<MatchDetails>, AppError> {
        let rows = sqlx::query(
            "SELECT mt.id, mt.group_id, mt.run_number, mt.created_at, mt.archived,
                    g.id AS giver_id, g.first_name AS giver_first_name, g.last_name AS giver_last_name,
                    r.id AS recipient_id, r.first_name AS recipient_first_name, r.last_name AS recipient_last_name
             FROM matches mt
             JOIN members g ON g.id = mt.giver_id
             JOIN members r ON r.id = mt.recipient_id
             WHERE mt.group_id = ? AND (? OR mt.archived = 0)
             ORDER BY mt.run_number DESC, mt.seq",
        )
        .bind(group_id)
        .bind(include_archived)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let archived: i32 = row.get("archived");
                MatchDetails {
                    id: row.get("id"),
                    giver: MemberRef {
                        id: row.get("giver_id"),
                        first_name: row.get("giver_first_name"),
                        last_name: row.get("giver_last_name"),
                    },
                    recipient: MemberRef {
                        id: row.get("recipient_id"),
                        first_name: row.get("recipient_first_name"),
                        last_name: row.get("recipient_last_name"),
                    },
                    group_id: row.get("group_id"),
                    run_number: row.get("run_number"),
                    created_at: row.get("created_at"),
                    archived: archived != 0,
                }
            })
            .collect())
    }

    /// Atomically replace a group's pending match set with a new run.
    ///
    /// The group's `run_version` must still equal `expected_run_version`;
    /// otherwise another run got there first and nothing is written.
    /// Returns the number of superseded pending matches and the new matches.
    pub async fn replace_pending_matches(
        &self,
        group_id: &str,
        expected_run_version: i64,
        pairs: &[(String, String)],
    ) -> Result<(u64, Vec<Match>), AppError> {
        let mut tx = self.pool.begin().await?;
        let run_number = expected_run_version + 1;
        let now = Utc::now().to_rfc3339();

        let claimed = sqlx::query(
            "UPDATE groups SET run_version = ?, updated_at = ? WHERE id = ? AND run_version = ? AND archived = 0",
        )
        .bind(run_number)
        .bind(&now)
        .bind(group_id)
        .bind(expected_run_version)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Group {} changed while matching; start the run again",
                group_id
            )));
        }

        let superseded = sqlx::query("DELETE FROM matches WHERE group_id = ? AND archived = 0")
            .bind(group_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let mut matches = Vec::with_capacity(pairs.len());
        for (seq, (giver_id, recipient_id)) in pairs.iter().enumerate() {
            let record = Match {
                id: uuid::Uuid::new_v4().to_string(),
                giver_id: giver_id.clone(),
                recipient_id: recipient_id.clone(),
                group_id: group_id.to_string(),
                run_number,
                created_at: now.clone(),
                archived: false,
                notified_at: None,
            };
            sqlx::query(
                "INSERT INTO matches (id, seq, giver_id, recipient_id, group_id, run_number, created_at, archived, notified_at) VALUES (?, ?, ?, ?, ?, ?, ?, 0, NULL)",
            )
            .bind(&record.id)
            .bind(seq as i64)
            .bind(&record.giver_id)
            .bind(&record.recipient_id)
            .bind(&record.group_id)
            .bind(record.run_number)
            .bind(&record.created_at)
            .execute(&mut *tx)
            .await?;
            matches.push(record);
        }

        tx.commit().await?;
        Ok((superseded, matches))
    }

    /// Settle a pending match: archive it and record the giver's last recipient.
    pub async fn mark_match_notified(&self, pending: &Match) -> Result<Match, AppError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        let settled = sqlx::query(
            "UPDATE matches SET archived = 1, notified_at = ? WHERE id = ? AND archived = 0",
        )
        .bind(&now)
        .bind(&pending.id)
        .execute(&mut *tx)
        .await?;

        if settled.rows_affected() == 0 {
            let still_exists = sqlx::query("SELECT 1 FROM matches WHERE id = ?")
                .bind(&pending.id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            return Err(if still_exists {
                AppError::AlreadyArchived(format!(
                    "Match {} has already been notified",
                    pending.id
                ))
            } else {
                AppError::NotFound(format!(
                    "Match {} was superseded by a newer run",
                    pending.id
                ))
            });
        }

        let updated = sqlx::query(
            "UPDATE members SET last_recipient_id = ?, updated_at = ?, version = version + 1 WHERE id = ?",
        )
        .bind(&pending.recipient_id)
        .bind(&now)
        .bind(&pending.giver_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Member {} not found",
                pending.giver_id
            )));
        }

        tx.commit().await?;
        Ok(Match {
            archived: true,
            notified_at: Some(now),
            ..pending.clone()
        })
    }
}

/// Load a group with its membership and match ids on any connection.
async fn load_group(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Group>, AppError> {
    let Some(row) = sqlx::query(
        "SELECT id, name, year, archived, run_version, updated_at FROM groups WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };

    let member_ids = sqlx::query(
        "SELECT member_id FROM group_members WHERE group_id = ? ORDER BY position",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|r| r.get("member_id"))
    .collect();

    let match_ids = sqlx::query("SELECT id FROM matches WHERE group_id = ? ORDER BY run_number, seq")
        .bind(id)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|r| r.get("id"))
        .collect();

    let archived: i32 = row.get("archived");
    Ok(Some(Group {
        id: row.get("id"),
        name: row.get("name"),
        year: row.get("year"),
        member_ids,
        match_ids,
        archived: archived != 0,
        run_version: row.get("run_version"),
        updated_at: row.get("updated_at"),
    }))
}

// Helper functions for row conversion

fn member_from_row(row: &sqlx::sqlite::SqliteRow) -> Member {
    Member {
        id: row.get("id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        phone_number: row.get("phone_number"),
        email: row.get("email"),
        last_recipient: row.get("last_recipient_id"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn match_from_row(row: &sqlx::sqlite::SqliteRow) -> Match {
    let archived: i32 = row.get("archived");
    Match {
        id: row.get("id"),
        giver_id: row.get("giver_id"),
        recipient_id: row.get("recipient_id"),
        group_id: row.get("group_id"),
        run_number: row.get("run_number"),
        created_at: row.get("created_at"),
        archived: archived != 0,
        notified_at: row.get("notified_at"),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
