//! Matching run and notification endpoints.

use axum::extract::{Path, Query, State};
use serde::Deserialize;

use super::{created, success, ApiResult};
use crate::models::{Channel, MatchDetails, MatchingRun, NotifyBatchReport, SingleNotification};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMatchesQuery {
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelQuery {
    #[serde(default)]
    pub channel: Channel,
}

/// POST /api/groups/:id/matches - Start a matching run.
pub async fn start_matching_run(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> ApiResult<MatchingRun> {
    created(state.lifecycle.start_matching_run(&group_id).await?)
}

/// GET /api/groups/:id/matches - List a group's matches.
pub async fn list_matches(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Query(query): Query<ListMatchesQuery>,
) -> ApiResult<Vec<MatchDetails>> {
    success(
        state
            .lifecycle
            .list_matches(&group_id, query.include_archived)
            .await?,
    )
}

/// POST /api/groups/:id/notifications - Notify every pending match.
pub async fn notify_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Query(query): Query<ChannelQuery>,
) -> ApiResult<NotifyBatchReport> {
    success(state.lifecycle.notify_batch(&group_id, query.channel).await?)
}

/// POST /api/matches/:id/notify - Notify a single match.
pub async fn notify_match(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
    Query(query): Query<ChannelQuery>,
) -> ApiResult<SingleNotification> {
    success(state.lifecycle.notify_one(&match_id, query.channel).await?)
}
