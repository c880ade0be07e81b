use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    AppState,
    auth::{AdminOnly, AnyRole, AuthUser, Authorized},
    error::ApiError,
    extract::{IdPath, ValidJson, ValidQuery},
    lifecycle::{IssueChanges, StatusTransition},
    models::{
        AssignIssueRequest, CommentResponse, CreateCommentRequest, CreateIssueRequest, Issue,
        IssueDetailResponse, IssueListResponse, IssueResponse, MessageResponse, NewComment,
        NewIssue, UpdateIssueRequest, UpdateStatusRequest,
    },
    query::{IssueFilter, IssueQuery, Pagination},
};

fn issue_not_found() -> ApiError {
    ApiError::NotFound("Issue not found".to_string())
}

/// Citizens may only touch issues they reported; admins may touch any.
fn ensure_can_access(user: &AuthUser, issue: &Issue) -> Result<(), ApiError> {
    if user.is_admin() || issue.reporter_id == user.id {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Access denied".to_string()))
    }
}

/// Loads an issue and applies the ownership rule in one step.
pub(crate) async fn load_accessible_issue(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> Result<Issue, ApiError> {
    let issue = state.repo.find_issue(id).await?.ok_or_else(issue_not_found)?;
    ensure_can_access(user, &issue)?;
    Ok(issue)
}

/// list_issues
///
/// [Authenticated Route] Paginated, filtered, sorted issue list.
///
/// *Security*: for citizens the filter is pinned to `reporter = caller` by
/// `IssueFilter::for_caller`; no query parameter can widen it.
#[utoipa::path(
    get,
    path = "/api/issues",
    params(IssueQuery),
    responses(
        (status = 200, description = "One page of issues", body = IssueListResponse),
        (status = 400, description = "Invalid query parameters")
    )
)]
pub async fn list_issues(
    user: Authorized<AnyRole>,
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<IssueQuery>,
) -> Result<Json<IssueListResponse>, ApiError> {
    let filter = IssueFilter::for_caller(query, &user);
    let (issues, total) = state.repo.list_issues(&filter).await?;

    Ok(Json(IssueListResponse {
        issues,
        pagination: Pagination::new(filter.page, filter.limit, total),
    }))
}

/// get_issue
///
/// [Authenticated Route] Full issue detail with comments and status history.
/// Internal comments are only included for admins.
#[utoipa::path(
    get,
    path = "/api/issues/{id}",
    params(("id" = Uuid, Path, description = "Issue ID")),
    responses(
        (status = 200, description = "Issue detail", body = IssueDetailResponse),
        (status = 403, description = "Not the reporter"),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_issue(
    user: Authorized<AnyRole>,
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> Result<Json<IssueDetailResponse>, ApiError> {
    let detail = state
        .repo
        .issue_detail(id, user.is_admin())
        .await?
        .ok_or_else(issue_not_found)?;
    ensure_can_access(&user, &detail.view.issue)?;

    Ok(Json(IssueDetailResponse { issue: detail }))
}

/// create_issue
///
/// [Authenticated Route] Files a new report owned by the caller. The issue starts in
/// `SUBMITTED` with one matching history row.
#[utoipa::path(
    post,
    path = "/api/issues",
    request_body = CreateIssueRequest,
    responses(
        (status = 201, description = "Created", body = IssueResponse),
        (status = 400, description = "Validation error")
    )
)]
pub async fn create_issue(
    user: Authorized<AnyRole>,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateIssueRequest>,
) -> Result<(StatusCode, Json<IssueResponse>), ApiError> {
    let issue = state
        .repo
        .create_issue(NewIssue {
            title: req.title,
            description: req.description,
            category: req.category,
            priority: req.priority,
            severity: req.severity,
            location: req.location,
            latitude: req.latitude,
            longitude: req.longitude,
            reporter_id: user.id,
        })
        .await?;
    tracing::info!(issue_id = %issue.issue.id, reporter_id = %user.id, "issue created");

    Ok((
        StatusCode::CREATED,
        Json(IssueResponse {
            message: Some("Issue created successfully".to_string()),
            issue,
        }),
    ))
}

/// update_issue
///
/// [Authenticated Route] Partial update. Citizens are limited to the descriptive fields
/// of their own issues (others are silently dropped); admins may set any field,
/// including `status` and `assigneeId`, without a history entry.
#[utoipa::path(
    put,
    path = "/api/issues/{id}",
    params(("id" = Uuid, Path, description = "Issue ID")),
    request_body = UpdateIssueRequest,
    responses(
        (status = 200, description = "Updated", body = IssueResponse),
        (status = 400, description = "Validation error or no valid fields"),
        (status = 403, description = "Not the reporter"),
        (status = 404, description = "Issue or assignee not found")
    )
)]
pub async fn update_issue(
    user: Authorized<AnyRole>,
    State(state): State<AppState>,
    IdPath(id): IdPath,
    ValidJson(req): ValidJson<UpdateIssueRequest>,
) -> Result<Json<IssueResponse>, ApiError> {
    load_accessible_issue(&state, &user, id).await?;

    let changes = IssueChanges::from_request(req, user.role, Utc::now())?;
    if let Some(assignee_id) = changes.assignee_id {
        if state.repo.get_user(assignee_id).await?.is_none() {
            return Err(ApiError::NotFound("Assignee not found".to_string()));
        }
    }

    let issue = state
        .repo
        .update_issue(id, changes)
        .await?
        .ok_or_else(issue_not_found)?;

    Ok(Json(IssueResponse {
        message: Some("Issue updated successfully".to_string()),
        issue,
    }))
}

/// update_status
///
/// [Admin Route] Writes the new status and appends a history row. Any status may follow
/// any other; moving to `RESOLVED` stamps `resolvedAt`.
#[utoipa::path(
    patch,
    path = "/api/issues/{id}/status",
    params(("id" = Uuid, Path, description = "Issue ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = IssueResponse),
        (status = 403, description = "Insufficient permissions"),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_status(
    admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
    IdPath(id): IdPath,
    ValidJson(req): ValidJson<UpdateStatusRequest>,
) -> Result<Json<IssueResponse>, ApiError> {
    let transition = StatusTransition::new(req.status, req.comment, Utc::now());
    let issue = state
        .repo
        .change_status(id, admin.id, &transition)
        .await?
        .ok_or_else(issue_not_found)?;
    tracing::info!(issue_id = %id, status = transition.status.as_str(), "issue status changed");

    Ok(Json(IssueResponse {
        message: Some("Issue status updated successfully".to_string()),
        issue,
    }))
}

/// assign_issue
///
/// [Admin Route] Sets the assignee and forces status `ASSIGNED` in a single write, plus
/// one history row naming the assignee. The assignee only has to exist.
#[utoipa::path(
    patch,
    path = "/api/issues/{id}/assign",
    params(("id" = Uuid, Path, description = "Issue ID")),
    request_body = AssignIssueRequest,
    responses(
        (status = 200, description = "Assigned", body = IssueResponse),
        (status = 400, description = "Missing assigneeId"),
        (status = 404, description = "Issue or assignee not found")
    )
)]
pub async fn assign_issue(
    admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
    IdPath(id): IdPath,
    ValidJson(req): ValidJson<AssignIssueRequest>,
) -> Result<Json<IssueResponse>, ApiError> {
    let assignee_id = req
        .assignee_id
        .ok_or_else(|| ApiError::BadRequest("Assignee ID is required".to_string()))?;
    let assignee = state
        .repo
        .get_user(assignee_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Assignee not found".to_string()))?;

    let issue = state
        .repo
        .assign_issue(id, admin.id, &assignee)
        .await?
        .ok_or_else(issue_not_found)?;
    tracing::info!(issue_id = %id, assignee_id = %assignee.id, "issue assigned");

    Ok(Json(IssueResponse {
        message: Some("Issue assigned successfully".to_string()),
        issue,
    }))
}

/// add_comment
///
/// [Authenticated Route] Comments on an accessible issue. Only admins may post
/// internal comments.
#[utoipa::path(
    post,
    path = "/api/issues/{id}/comments",
    params(("id" = Uuid, Path, description = "Issue ID")),
    request_body = CreateCommentRequest,
    responses(
        (status = 201, description = "Comment added", body = CommentResponse),
        (status = 403, description = "Not allowed"),
        (status = 404, description = "Not found")
    )
)]
pub async fn add_comment(
    user: Authorized<AnyRole>,
    State(state): State<AppState>,
    IdPath(id): IdPath,
    ValidJson(req): ValidJson<CreateCommentRequest>,
) -> Result<(StatusCode, Json<CommentResponse>), ApiError> {
    load_accessible_issue(&state, &user, id).await?;

    if req.is_internal && !user.is_admin() {
        return Err(ApiError::Forbidden(
            "Only admins can create internal comments".to_string(),
        ));
    }

    let comment = state
        .repo
        .add_comment(NewComment {
            issue_id: id,
            author_id: user.id,
            content: req.content,
            is_internal: req.is_internal,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CommentResponse {
            message: "Comment added successfully".to_string(),
            comment,
        }),
    ))
}

/// delete_issue
///
/// [Admin Route] Removes the issue. Attachment files are deleted from storage first;
/// the database cascade then removes comments, attachment rows and history.
#[utoipa::path(
    delete,
    path = "/api/issues/{id}",
    params(("id" = Uuid, Path, description = "Issue ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 403, description = "Insufficient permissions"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_issue(
    _admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> Result<Json<MessageResponse>, ApiError> {
    state.repo.find_issue(id).await?.ok_or_else(issue_not_found)?;

    for attachment in state.repo.list_attachments(id).await? {
        if let Err(e) = state.storage.delete(attachment.kind, &attachment.filename).await {
            tracing::warn!(error = %e, file = %attachment.filename, "failed to delete attachment file");
        }
    }

    if !state.repo.delete_issue(id).await? {
        return Err(issue_not_found());
    }
    tracing::info!(issue_id = %id, "issue deleted");

    Ok(Json(MessageResponse::new("Issue deleted successfully")))
}
