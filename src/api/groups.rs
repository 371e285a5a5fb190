//! Group API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{created, success, ApiResult};
use crate::errors::AppError;
use crate::models::{DeletedGroup, Group, UpsertGroupRequest};
use crate::AppState;

/// GET /api/groups - List all groups.
pub async fn list_groups(State(state): State<AppState>) -> ApiResult<Vec<Group>> {
    success(state.repo.list_groups().await?)
}

/// GET /api/groups/:id - Get a single group.
pub async fn get_group(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Group> {
    match state.repo.get_group(&id).await? {
        Some(group) => success(group),
        None => Err(AppError::NotFound(format!("Group {} not found", id))),
    }
}

/// POST /api/groups - Create a group, or update one when `id` is given.
pub async fn upsert_group(
    State(state): State<AppState>,
    Json(request): Json<UpsertGroupRequest>,
) -> ApiResult<Group> {
    let upserted = state.lifecycle.upsert_group(&request).await?;
    if upserted.created {
        created(upserted.group)
    } else {
        success(upserted.group)
    }
}

/// DELETE /api/groups/:id - Delete a group and its matches.
pub async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DeletedGroup> {
    success(state.lifecycle.delete_group(&id).await?)
}
