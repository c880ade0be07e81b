use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::{
    AppState,
    analytics::MONTH_DAYS,
    auth::{AdminOnly, Authorized},
    error::ApiError,
    extract::{IdPath, ValidJson, ValidQuery},
    handlers::auth::normalize_email,
    models::{
        MessageResponse, UpdateUserRequest, UserChanges, UserDetailResponse, UserListResponse,
        UserResponse, UserStatsResponse,
    },
    query::{Pagination, UserFilter, UserQuery},
};

fn user_not_found() -> ApiError {
    ApiError::NotFound("User not found".to_string())
}

/// list_users
///
/// [Admin Route] Paginated account list with per-user issue counts.
#[utoipa::path(
    get,
    path = "/api/users",
    params(UserQuery),
    responses(
        (status = 200, description = "One page of users", body = UserListResponse),
        (status = 403, description = "Insufficient permissions")
    )
)]
pub async fn list_users(
    _admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<UserQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    let filter = UserFilter::from(query);
    let (users, total) = state.repo.list_users(&filter).await?;

    Ok(Json(UserListResponse {
        users,
        pagination: Pagination::new(filter.page, filter.limit, total),
    }))
}

/// get_user
///
/// [Admin Route] Profile plus the ten most recent reported and assigned issues.
#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User detail", body = UserDetailResponse),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(
    _admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> Result<Json<UserDetailResponse>, ApiError> {
    let user = state.repo.user_detail(id).await?.ok_or_else(user_not_found)?;
    Ok(Json(UserDetailResponse { user }))
}

#[utoipa::path(
    put,
    path = "/api/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = UserResponse),
        (status = 400, description = "Validation error or email taken"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_user(
    _admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
    IdPath(id): IdPath,
    ValidJson(req): ValidJson<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    state.repo.get_user(id).await?.ok_or_else(user_not_found)?;

    let email = req.email.as_deref().map(normalize_email);
    if let Some(email) = &email {
        if let Some(existing) = state.repo.find_user_by_email(email).await? {
            if existing.id != id {
                return Err(ApiError::BadRequest("Email already taken".to_string()));
            }
        }
    }

    let user = state
        .repo
        .update_user(
            id,
            UserChanges {
                name: req.name,
                email,
                role: req.role,
            },
        )
        .await?
        .ok_or_else(user_not_found)?;
    tracing::info!(user_id = %id, role = ?user.role, "user updated by admin");

    Ok(Json(UserResponse {
        message: Some("User updated successfully".to_string()),
        user: user.into(),
    }))
}

/// delete_user
///
/// [Admin Route] Refused with 400 and the blocking `issueCount` while the account
/// reports or is assigned any issue.
#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 400, description = "User still has issues"),
        (status = 404, description = "User not found")
    )
)]
pub async fn delete_user(
    _admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> Result<Response, ApiError> {
    state.repo.get_user(id).await?.ok_or_else(user_not_found)?;

    let issue_count = state.repo.count_user_issues(id).await?;
    if issue_count > 0 {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Cannot delete user with associated issues",
                "issueCount": issue_count,
            })),
        )
            .into_response());
    }

    if !state.repo.delete_user(id).await? {
        return Err(user_not_found());
    }
    tracing::info!(user_id = %id, "user deleted");

    Ok(Json(MessageResponse::new("User deleted successfully")).into_response())
}

/// user_stats
///
/// [Admin Route] Lifetime and last-30-days issue counts for one account.
#[utoipa::path(
    get,
    path = "/api/users/{id}/stats",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Statistics", body = UserStatsResponse),
        (status = 404, description = "User not found")
    )
)]
pub async fn user_stats(
    _admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> Result<Json<UserStatsResponse>, ApiError> {
    state.repo.get_user(id).await?.ok_or_else(user_not_found)?;

    let since = Utc::now() - Duration::days(MONTH_DAYS);
    let stats = state.repo.user_stats(id, since).await?;

    Ok(Json(UserStatsResponse { stats }))
}
