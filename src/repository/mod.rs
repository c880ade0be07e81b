use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    analytics::DateWindow,
    lifecycle::{IssueChanges, StatusTransition},
    models::{
        Attachment, Comment, Issue, IssueDetail, IssueFacts, IssueTotals, IssueView,
        NewAttachment, NewComment, NewIssue, NewUser, StatusHistoryEntry, User, UserChanges,
        UserDetail, UserStats, UserWithCounts,
    },
    query::{IssueFilter, UserFilter},
};

mod memory;
mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

/// RepositoryError
///
/// Persistence failures surfaced to handlers. Constraint violations are classified so
/// they can become 400s; everything else is an internal error.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A unique constraint rejected the write (e.g. duplicate email).
    #[error("conflict: {0}")]
    Conflict(String),
    /// A foreign key still points at the row being removed.
    #[error("still referenced: {0}")]
    Referenced(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("in-memory store lock poisoned")]
    Poisoned,
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            match db.code().as_deref() {
                Some("23505") => return RepositoryError::Conflict(db.message().to_string()),
                Some("23503") => return RepositoryError::Referenced(db.message().to_string()),
                _ => {}
            }
        }
        RepositoryError::Database(err)
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Repository Trait
///
/// The abstract contract for all persistence operations. Handlers only ever see
/// `Arc<dyn Repository>`, so Postgres and the in-memory store are interchangeable.
///
/// Methods returning `Option` yield `None` when the addressed row does not exist.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn create_user(&self, user: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    /// Case-insensitive lookup.
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn update_user(&self, id: Uuid, changes: UserChanges) -> RepoResult<Option<User>>;
    async fn set_password(&self, id: Uuid, password_hash: &str) -> RepoResult<bool>;
    async fn list_users(&self, filter: &UserFilter) -> RepoResult<(Vec<UserWithCounts>, i64)>;
    async fn user_detail(&self, id: Uuid) -> RepoResult<Option<UserDetail>>;
    /// Number of issues the user reports or is assigned to.
    async fn count_user_issues(&self, id: Uuid) -> RepoResult<i64>;
    async fn delete_user(&self, id: Uuid) -> RepoResult<bool>;
    /// Lifetime totals plus counts for issues created since `since`.
    async fn user_stats(&self, id: Uuid, since: DateTime<Utc>) -> RepoResult<UserStats>;

    // --- Issues ---
    /// Inserts the issue and its initial SUBMITTED history row atomically.
    async fn create_issue(&self, issue: NewIssue) -> RepoResult<IssueView>;
    async fn find_issue(&self, id: Uuid) -> RepoResult<Option<Issue>>;
    async fn issue_view(&self, id: Uuid) -> RepoResult<Option<IssueView>>;
    /// Full detail. Internal comments are left out unless `include_internal`.
    async fn issue_detail(&self, id: Uuid, include_internal: bool)
    -> RepoResult<Option<IssueDetail>>;
    /// One page of matching issues plus the total match count.
    async fn list_issues(&self, filter: &IssueFilter) -> RepoResult<(Vec<IssueView>, i64)>;
    /// Applies field changes without writing history.
    async fn update_issue(&self, id: Uuid, changes: IssueChanges) -> RepoResult<Option<IssueView>>;
    /// Writes the new status and appends one history row atomically. A RESOLVED
    /// transition stamps `resolved_at` with the store's own clock.
    async fn change_status(
        &self,
        id: Uuid,
        actor_id: Uuid,
        transition: &StatusTransition,
    ) -> RepoResult<Option<IssueView>>;
    /// Sets the assignee and forces status ASSIGNED in one update, plus one history row.
    async fn assign_issue(
        &self,
        id: Uuid,
        actor_id: Uuid,
        assignee: &User,
    ) -> RepoResult<Option<IssueView>>;
    /// Removes the issue; comments, attachments and history go with it.
    async fn delete_issue(&self, id: Uuid) -> RepoResult<bool>;
    async fn add_comment(&self, comment: NewComment) -> RepoResult<Comment>;
    /// History rows of an issue, oldest first.
    async fn status_history(&self, issue_id: Uuid) -> RepoResult<Vec<StatusHistoryEntry>>;

    // --- Attachments ---
    async fn create_attachment(&self, attachment: NewAttachment) -> RepoResult<Attachment>;
    async fn find_attachment(&self, id: Uuid) -> RepoResult<Option<Attachment>>;
    async fn list_attachments(&self, issue_id: Uuid) -> RepoResult<Vec<Attachment>>;
    async fn delete_attachment(&self, id: Uuid) -> RepoResult<bool>;

    // --- Analytics ---
    async fn issue_totals(&self) -> RepoResult<IssueTotals>;
    /// Facts for issues created inside `window`.
    async fn issue_facts(&self, window: DateWindow) -> RepoResult<Vec<IssueFacts>>;
    /// Facts for RESOLVED issues whose `resolved_at` is at or after `since`.
    async fn resolved_facts(&self, since: DateTime<Utc>) -> RepoResult<Vec<IssueFacts>>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;
