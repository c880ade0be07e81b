use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::query::Pagination;

// --- Closed Enumerations (Mapped to Postgres enum types) ---

/// Role
///
/// The RBAC role attached to every account. Stored as the `user_role` Postgres enum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "user_role", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum Role {
    #[default]
    Citizen,
    Admin,
}

/// IssueStatus
///
/// Lifecycle states of an issue. Any state may be written directly by an admin;
/// the declaration order is only used for sorting.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "issue_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum IssueStatus {
    #[default]
    Submitted,
    Acknowledged,
    Assigned,
    InProgress,
    Resolved,
    Closed,
}

impl IssueStatus {
    /// Statuses counted as "open" by the dashboards.
    pub const OPEN: [IssueStatus; 4] = [
        IssueStatus::Submitted,
        IssueStatus::Acknowledged,
        IssueStatus::Assigned,
        IssueStatus::InProgress,
    ];

    /// Statuses that count as the first administrative response to a report.
    pub const FIRST_RESPONSE: [IssueStatus; 2] = [IssueStatus::Acknowledged, IssueStatus::Assigned];

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Submitted => "SUBMITTED",
            IssueStatus::Acknowledged => "ACKNOWLEDGED",
            IssueStatus::Assigned => "ASSIGNED",
            IssueStatus::InProgress => "IN_PROGRESS",
            IssueStatus::Resolved => "RESOLVED",
            IssueStatus::Closed => "CLOSED",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "issue_priority", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum IssuePriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "issue_category", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum IssueCategory {
    Pothole,
    GarbageCollection,
    StreetLight,
    SewerIssue,
    RoadMaintenance,
    PublicSafety,
    ParksRecreation,
    TrafficSignal,
    #[default]
    Other,
}

/// AttachmentKind
///
/// Media family of an upload. Decides the storage sub-directory and public URL segment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default,
    Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "attachment_type", rename_all = "lowercase")]
#[ts(export)]
pub enum AttachmentKind {
    #[default]
    Image,
    Audio,
}

impl AttachmentKind {
    /// Classifies a MIME type. Only `image/*` and `audio/*` are accepted.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            Some(AttachmentKind::Image)
        } else if mime.starts_with("audio/") {
            Some(AttachmentKind::Audio)
        } else {
            None
        }
    }

    /// Sub-directory under the upload root (and URL segment under `/uploads`).
    pub fn directory(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "images",
            AttachmentKind::Audio => "audio",
        }
    }
}

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// The canonical account row from the `users` table. Never serialized directly:
/// handlers convert it to `UserProfile` so the password hash cannot leak.
#[derive(Debug, Clone, FromRow, Default)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Name shown in audit comments: the display name, falling back to the email.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

/// UserProfile
///
/// Public projection of a `User` (no credentials).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// UserSummary
///
/// Compact user reference embedded in issue payloads (reporter, assignee, actor).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

/// Issue
///
/// A citizen-reported civic problem, one row of the `issues` table.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Issue {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: IssueCategory,
    pub priority: IssuePriority,
    /// Citizen-assigned urgency, 1 (minor) to 5 (urgent).
    pub severity: i32,
    pub status: IssueStatus,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub reporter_id: Uuid,
    pub assignee_id: Option<Uuid>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    #[ts(type = "string | null")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Attachment
///
/// Metadata of a stored media file linked to an issue (`issue_attachments`).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Attachment {
    pub id: Uuid,
    pub issue_id: Uuid,
    /// Generated on-disk name (`<uuid>.<ext>`).
    pub filename: String,
    /// Name supplied by the client at upload time.
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub url: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: AttachmentKind,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// CommentAuthor
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct CommentAuthor {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub role: Role,
}

/// Comment
///
/// An issue comment enriched with its author. `is_internal` comments are admin-only.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Comment {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub content: String,
    pub is_internal: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub author: CommentAuthor,
}

/// StatusHistoryEntry
///
/// One append-only audit row of `issue_status_history`, enriched with the actor.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub status: IssueStatus,
    pub comment: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub changed_by: UserSummary,
}

/// IssueView
///
/// List/mutation payload: the issue row plus reporter, assignee, attachments and comment count.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct IssueView {
    #[serde(flatten)]
    pub issue: Issue,
    pub reporter: UserSummary,
    pub assignee: Option<UserSummary>,
    pub attachments: Vec<Attachment>,
    pub comment_count: i64,
}

/// IssueDetail
///
/// Single-issue payload: everything in `IssueView` plus comments and the status history.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct IssueDetail {
    #[serde(flatten)]
    pub view: IssueView,
    pub comments: Vec<Comment>,
    pub status_history: Vec<StatusHistoryEntry>,
}

/// IssueBrief
///
/// Minimal issue reference listed on a user's admin detail page.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct IssueBrief {
    pub id: Uuid,
    pub title: String,
    pub status: IssueStatus,
    pub priority: IssuePriority,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// IssueCounts
///
/// How many issues a user has reported and how many are assigned to them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct IssueCounts {
    pub reported_issues: i64,
    pub assigned_issues: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserWithCounts {
    #[serde(flatten)]
    pub user: UserProfile,
    pub issue_counts: IssueCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: UserProfile,
    pub reported_issues: Vec<IssueBrief>,
    pub assigned_issues: Vec<IssueBrief>,
    pub issue_counts: IssueCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserStats {
    pub total_reported: i64,
    pub total_assigned: i64,
    pub reported_this_month: i64,
    pub assigned_this_month: i64,
    pub resolved_as_reporter: i64,
    pub resolved_as_assignee: i64,
}

// --- Write Models (Repository Inputs) ---

/// NewUser
///
/// Everything needed to insert a `users` row. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub role: Role,
}

/// UserChanges
///
/// Partial update of an account; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Clone)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub category: IssueCategory,
    pub priority: IssuePriority,
    pub severity: i32,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub reporter_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub issue_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub is_internal: bool,
}

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub issue_id: Uuid,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub url: String,
    pub kind: AttachmentKind,
}

/// IssueFacts
///
/// The per-issue timestamps and dimensions the analytics aggregator works from.
/// `first_response_at` is the earliest ACKNOWLEDGED/ASSIGNED history entry, if any.
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct IssueFacts {
    pub category: IssueCategory,
    pub status: IssueStatus,
    pub priority: IssuePriority,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub first_response_at: Option<DateTime<Utc>>,
}

/// IssueTotals
#[derive(Debug, Clone, Copy, Default, PartialEq, FromRow)]
pub struct IssueTotals {
    pub total: i64,
    pub open: i64,
}

// --- Request Payloads (Input Schemas) ---

/// RegisterRequest
///
/// Input payload for `POST /auth/register`. The role defaults to `CITIZEN`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[validate(length(min = 2, message = "Name must be at least 2 characters"))]
    pub name: Option<String>,
    pub role: Option<Role>,
}

/// LoginRequest
///
/// Input payload for `POST /auth/login`. When `role` is present it must match the account.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 2, message = "Name must be at least 2 characters"))]
    pub name: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 6, message = "New password must be at least 6 characters"))]
    pub new_password: String,
}

fn default_severity() -> i32 {
    3
}

/// CreateIssueRequest
///
/// Input payload for `POST /issues`. The reporter is always the caller.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct CreateIssueRequest {
    #[validate(length(min = 5, message = "Title must be at least 5 characters"))]
    pub title: String,
    #[validate(length(min = 10, message = "Description must be at least 10 characters"))]
    pub description: String,
    pub category: IssueCategory,
    #[serde(default)]
    pub priority: IssuePriority,
    #[serde(default = "default_severity")]
    #[validate(range(min = 1, max = 5, message = "Severity must be between 1 and 5"))]
    pub severity: i32,
    #[validate(length(min = 5, message = "Location must be at least 5 characters"))]
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// UpdateIssueRequest
///
/// Partial update payload for `PUT /issues/{id}`. Which fields survive depends on the
/// caller's role (see `lifecycle::IssueChanges`).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateIssueRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 5, message = "Title must be at least 5 characters"))]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 10, message = "Description must be at least 10 characters"))]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<IssueCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<IssuePriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 5, message = "Severity must be between 1 and 5"))]
    pub severity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 5, message = "Location must be at least 5 characters"))]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IssueStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct UpdateStatusRequest {
    pub status: IssueStatus,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AssignIssueRequest {
    pub assignee_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateCommentRequest {
    #[validate(length(min = 1, message = "Comment cannot be empty"))]
    pub content: String,
    #[serde(default)]
    pub is_internal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct UpdateUserRequest {
    #[validate(length(min = 2, message = "Name must be at least 2 characters"))]
    pub name: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    pub role: Option<Role>,
}

// --- Response Envelopes (Output Schemas) ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// AuthResponse
///
/// Returned by register and login: the profile plus a signed bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AuthResponse {
    pub message: String,
    pub user: UserProfile,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct IssueResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub issue: IssueView,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct IssueDetailResponse {
    pub issue: IssueDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct IssueListResponse {
    pub issues: Vec<IssueView>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CommentResponse {
    pub message: String,
    pub comment: Comment,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UploadResponse {
    pub message: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserListResponse {
    pub users: Vec<UserWithCounts>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserDetailResponse {
    pub user: UserDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserStatsResponse {
    pub stats: UserStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct HealthResponse {
    pub status: String,
    #[ts(type = "string")]
    pub timestamp: DateTime<Utc>,
    pub environment: String,
}
