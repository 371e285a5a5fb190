//! Member API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{created, success, ApiResult};
use crate::errors::AppError;
use crate::models::{Member, UpdateMemberRequest, UpsertMemberRequest, UpsertMemberResult};
use crate::AppState;

/// GET /api/members - List all members.
pub async fn list_members(State(state): State<AppState>) -> ApiResult<Vec<Member>> {
    success(state.repo.list_members().await?)
}

/// GET /api/members/:id - Get a single member.
pub async fn get_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Member> {
    match state.repo.get_member(&id).await? {
        Some(member) => success(member),
        None => Err(AppError::NotFound(format!("Member {} not found", id))),
    }
}

/// POST /api/members - Create or update a batch of members.
pub async fn upsert_members(
    State(state): State<AppState>,
    Json(requests): Json<Vec<UpsertMemberRequest>>,
) -> ApiResult<Vec<UpsertMemberResult>> {
    created(state.repo.upsert_members(&requests).await?)
}

/// PUT /api/members/:id - Update a member.
pub async fn update_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateMemberRequest>,
) -> ApiResult<Member> {
    success(state.repo.update_member(&id, &request).await?)
}

/// DELETE /api/members/:id - Delete a member, its memberships and matches.
pub async fn delete_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Member> {
    success(state.lifecycle.delete_member(&id).await?)
}
