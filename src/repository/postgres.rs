use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, query_builder::QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

use super::{RepoResult, Repository, RepositoryError};
use crate::{
    analytics::DateWindow,
    lifecycle::{CREATION_COMMENT, IssueChanges, StatusTransition, assignment_comment},
    models::{
        Attachment, Comment, CommentAuthor, Issue, IssueBrief, IssueCounts, IssueDetail,
        IssueFacts, IssueStatus, IssueTotals, IssueView, NewAttachment, NewComment, NewIssue,
        NewUser, Role, StatusHistoryEntry, User, UserChanges, UserDetail, UserProfile, UserStats,
        UserSummary, UserWithCounts,
    },
    query::{IssueFilter, UserFilter, contains_pattern},
};

const USER_COLUMNS: &str = "id, email, password_hash, name, role, created_at, updated_at";

const ISSUE_COLUMNS: &str = "id, title, description, category, priority, severity, status, \
     location, latitude, longitude, reporter_id, assignee_id, created_at, updated_at, resolved_at";

const ATTACHMENT_COLUMNS: &str =
    "id, issue_id, filename, original_name, mime_type, size, url, type, created_at";

const FACT_SELECT: &str = r#"
    SELECT i.category, i.status, i.priority, i.created_at, i.resolved_at,
           (SELECT MIN(h.created_at)
              FROM issue_status_history h
             WHERE h.issue_id = i.id
               AND h.status IN ('ACKNOWLEDGED', 'ASSIGNED')) AS first_response_at
      FROM issues i
"#;

/// Joined comment + author row.
#[derive(FromRow)]
struct CommentRow {
    id: Uuid,
    issue_id: Uuid,
    content: String,
    is_internal: bool,
    created_at: DateTime<Utc>,
    author_id: Uuid,
    author_name: Option<String>,
    author_email: String,
    author_role: Role,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Comment {
            id: row.id,
            issue_id: row.issue_id,
            content: row.content,
            is_internal: row.is_internal,
            created_at: row.created_at,
            author: CommentAuthor {
                id: row.author_id,
                name: row.author_name,
                email: row.author_email,
                role: row.author_role,
            },
        }
    }
}

/// Joined history + actor row.
#[derive(FromRow)]
struct HistoryRow {
    id: Uuid,
    issue_id: Uuid,
    status: IssueStatus,
    comment: Option<String>,
    created_at: DateTime<Utc>,
    changed_by_id: Uuid,
    changed_by_name: Option<String>,
    changed_by_email: String,
}

impl From<HistoryRow> for StatusHistoryEntry {
    fn from(row: HistoryRow) -> Self {
        StatusHistoryEntry {
            id: row.id,
            issue_id: row.issue_id,
            status: row.status,
            comment: row.comment,
            created_at: row.created_at,
            changed_by: UserSummary {
                id: row.changed_by_id,
                name: row.changed_by_name,
                email: row.changed_by_email,
            },
        }
    }
}

#[derive(FromRow)]
struct UserCountRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    role: Role,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    reported_issues: i64,
    assigned_issues: i64,
}

impl From<UserCountRow> for UserWithCounts {
    fn from(row: UserCountRow) -> Self {
        UserWithCounts {
            user: UserProfile {
                id: row.id,
                email: row.email,
                name: row.name,
                role: row.role,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            issue_counts: IssueCounts {
                reported_issues: row.reported_issues,
                assigned_issues: row.assigned_issues,
            },
        }
    }
}

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
/// Dynamic filters go through `QueryBuilder` so every user-supplied value is a bind
/// parameter; only whitelisted column names are ever spliced into SQL text.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// hydrate
    ///
    /// Turns bare issue rows into `IssueView`s with three batched lookups (users,
    /// attachments, comment counts) instead of one query per issue.
    async fn hydrate(&self, issues: Vec<Issue>) -> RepoResult<Vec<IssueView>> {
        if issues.is_empty() {
            return Ok(Vec::new());
        }

        let issue_ids: Vec<Uuid> = issues.iter().map(|i| i.id).collect();
        let mut user_ids: Vec<Uuid> = issues
            .iter()
            .flat_map(|i| std::iter::once(i.reporter_id).chain(i.assignee_id))
            .collect();
        user_ids.sort();
        user_ids.dedup();

        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)");
        let users: HashMap<Uuid, UserSummary> = sqlx::query_as::<_, User>(&sql)
            .bind(&user_ids)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|u| (u.id, UserSummary::from(u)))
            .collect();

        let sql = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM issue_attachments \
             WHERE issue_id = ANY($1) ORDER BY created_at ASC"
        );
        let mut attachments: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
        for attachment in sqlx::query_as::<_, Attachment>(&sql)
            .bind(&issue_ids)
            .fetch_all(&self.pool)
            .await?
        {
            attachments.entry(attachment.issue_id).or_default().push(attachment);
        }

        let comment_counts: HashMap<Uuid, i64> = sqlx::query_as::<_, (Uuid, i64)>(
            "SELECT issue_id, COUNT(*) FROM issue_comments \
             WHERE issue_id = ANY($1) GROUP BY issue_id",
        )
        .bind(&issue_ids)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .collect();

        Ok(issues
            .into_iter()
            .map(|issue| IssueView {
                reporter: users.get(&issue.reporter_id).cloned().unwrap_or_default(),
                assignee: issue.assignee_id.and_then(|id| users.get(&id).cloned()),
                attachments: attachments.remove(&issue.id).unwrap_or_default(),
                comment_count: comment_counts.get(&issue.id).copied().unwrap_or(0),
                issue,
            })
            .collect())
    }

    async fn hydrate_one(&self, issue: Option<Issue>) -> RepoResult<Option<IssueView>> {
        match issue {
            Some(issue) => Ok(self.hydrate(vec![issue]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn recent_briefs(&self, column: &str, user_id: Uuid) -> RepoResult<Vec<IssueBrief>> {
        // `column` is one of two literals supplied by `user_detail`.
        let sql = format!(
            "SELECT id, title, status, priority, created_at FROM issues \
             WHERE {column} = $1 ORDER BY created_at DESC LIMIT 10"
        );
        Ok(sqlx::query_as::<_, IssueBrief>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
    }
}

fn push_issue_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &IssueFilter) {
    builder.push(" WHERE TRUE");
    if let Some(reporter_id) = filter.reporter_id {
        builder.push(" AND reporter_id = ").push_bind(reporter_id);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status);
    }
    if let Some(priority) = filter.priority {
        builder.push(" AND priority = ").push_bind(priority);
    }
    if let Some(category) = filter.category {
        builder.push(" AND category = ").push_bind(category);
    }
    if let Some(term) = &filter.search {
        let pattern = contains_pattern(term);
        builder
            .push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR description ILIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR location ILIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR id::text ILIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

fn push_user_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    builder.push(" WHERE TRUE");
    if let Some(role) = filter.role {
        builder.push(" AND u.role = ").push_bind(role);
    }
    if let Some(term) = &filter.search {
        let pattern = contains_pattern(term);
        builder
            .push(" AND (u.email ILIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR u.name ILIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- Users ---

    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let sql = format!(
            "INSERT INTO users (id, email, password_hash, name, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(user.role)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// update_user
    ///
    /// Partial update via `COALESCE`: a NULL bind keeps the current column value.
    async fn update_user(&self, id: Uuid, changes: UserChanges) -> RepoResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET \
                name = COALESCE($2, name), \
                email = COALESCE($3, email), \
                role = COALESCE($4, role), \
                updated_at = NOW() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(changes.name)
            .bind(changes.email)
            .bind(changes.role)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn set_password(&self, id: Uuid, password_hash: &str) -> RepoResult<bool> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(password_hash)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self, filter: &UserFilter) -> RepoResult<(Vec<UserWithCounts>, i64)> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT u.id, u.email, u.name, u.role, u.created_at, u.updated_at,
                   (SELECT COUNT(*) FROM issues i WHERE i.reporter_id = u.id) AS reported_issues,
                   (SELECT COUNT(*) FROM issues i WHERE i.assignee_id = u.id) AS assigned_issues
              FROM users u
            "#,
        );
        push_user_filters(&mut builder, filter);
        builder
            .push(" ORDER BY u.created_at DESC LIMIT ")
            .push_bind(i64::from(filter.limit))
            .push(" OFFSET ")
            .push_bind(filter.offset());

        let users = builder
            .build_query_as::<UserCountRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(UserWithCounts::from)
            .collect();

        let mut count: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM users u");
        push_user_filters(&mut count, filter);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        Ok((users, total))
    }

    async fn user_detail(&self, id: Uuid) -> RepoResult<Option<UserDetail>> {
        let Some(user) = self.get_user(id).await? else {
            return Ok(None);
        };

        let (reported, assigned) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*) FILTER (WHERE reporter_id = $1), \
                    COUNT(*) FILTER (WHERE assignee_id = $1) \
               FROM issues",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(UserDetail {
            user: user.into(),
            reported_issues: self.recent_briefs("reporter_id", id).await?,
            assigned_issues: self.recent_briefs("assignee_id", id).await?,
            issue_counts: IssueCounts {
                reported_issues: reported,
                assigned_issues: assigned,
            },
        }))
    }

    async fn count_user_issues(&self, id: Uuid) -> RepoResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM issues WHERE reporter_id = $1 OR assignee_id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn delete_user(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn user_stats(&self, id: Uuid, since: DateTime<Utc>) -> RepoResult<UserStats> {
        Ok(sqlx::query_as::<_, UserStats>(
            r#"
            SELECT COUNT(*) FILTER (WHERE reporter_id = $1) AS total_reported,
                   COUNT(*) FILTER (WHERE assignee_id = $1) AS total_assigned,
                   COUNT(*) FILTER (WHERE reporter_id = $1 AND created_at >= $2) AS reported_this_month,
                   COUNT(*) FILTER (WHERE assignee_id = $1 AND created_at >= $2) AS assigned_this_month,
                   COUNT(*) FILTER (WHERE reporter_id = $1 AND status = 'RESOLVED') AS resolved_as_reporter,
                   COUNT(*) FILTER (WHERE assignee_id = $1 AND status = 'RESOLVED') AS resolved_as_assignee
              FROM issues
            "#,
        )
        .bind(id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?)
    }

    // --- Issues ---

    async fn create_issue(&self, new: NewIssue) -> RepoResult<IssueView> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO issues \
                (id, title, description, category, priority, severity, location, latitude, longitude, reporter_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {ISSUE_COLUMNS}"
        );
        let issue = sqlx::query_as::<_, Issue>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.title)
            .bind(&new.description)
            .bind(new.category)
            .bind(new.priority)
            .bind(new.severity)
            .bind(&new.location)
            .bind(new.latitude)
            .bind(new.longitude)
            .bind(new.reporter_id)
            .fetch_one(&mut *tx)
            .await?;

        insert_history(&mut tx, issue.id, IssueStatus::Submitted, new.reporter_id, CREATION_COMMENT)
            .await?;
        tx.commit().await?;

        self.hydrate_one(Some(issue))
            .await?
            .ok_or(RepositoryError::Database(sqlx::Error::RowNotFound))
    }

    async fn find_issue(&self, id: Uuid) -> RepoResult<Option<Issue>> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = $1");
        Ok(sqlx::query_as::<_, Issue>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn issue_view(&self, id: Uuid) -> RepoResult<Option<IssueView>> {
        let issue = self.find_issue(id).await?;
        self.hydrate_one(issue).await
    }

    async fn issue_detail(
        &self,
        id: Uuid,
        include_internal: bool,
    ) -> RepoResult<Option<IssueDetail>> {
        let Some(view) = self.issue_view(id).await? else {
            return Ok(None);
        };

        let comments = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT c.id, c.issue_id, c.content, c.is_internal, c.created_at,
                   u.id AS author_id, u.name AS author_name, u.email AS author_email, u.role AS author_role
              FROM issue_comments c
              JOIN users u ON u.id = c.author_id
             WHERE c.issue_id = $1 AND ($2 OR NOT c.is_internal)
             ORDER BY c.created_at ASC
            "#,
        )
        .bind(id)
        .bind(include_internal)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Comment::from)
        .collect();

        Ok(Some(IssueDetail {
            view,
            comments,
            status_history: self.status_history(id).await?,
        }))
    }

    async fn list_issues(&self, filter: &IssueFilter) -> RepoResult<(Vec<IssueView>, i64)> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {ISSUE_COLUMNS} FROM issues"));
        push_issue_filters(&mut builder, filter);
        builder
            .push(format!(
                " ORDER BY {} {}, id ASC LIMIT ",
                filter.sort_by.column(),
                filter.sort_order.keyword()
            ))
            .push_bind(i64::from(filter.limit))
            .push(" OFFSET ")
            .push_bind(filter.offset());

        let issues = builder
            .build_query_as::<Issue>()
            .fetch_all(&self.pool)
            .await?;

        let mut count: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM issues");
        push_issue_filters(&mut count, filter);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        Ok((self.hydrate(issues).await?, total))
    }

    async fn update_issue(&self, id: Uuid, changes: IssueChanges) -> RepoResult<Option<IssueView>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE issues SET updated_at = NOW()");
        if let Some(title) = changes.title {
            builder.push(", title = ").push_bind(title);
        }
        if let Some(description) = changes.description {
            builder.push(", description = ").push_bind(description);
        }
        if let Some(category) = changes.category {
            builder.push(", category = ").push_bind(category);
        }
        if let Some(priority) = changes.priority {
            builder.push(", priority = ").push_bind(priority);
        }
        if let Some(severity) = changes.severity {
            builder.push(", severity = ").push_bind(severity);
        }
        if let Some(location) = changes.location {
            builder.push(", location = ").push_bind(location);
        }
        if let Some(latitude) = changes.latitude {
            builder.push(", latitude = ").push_bind(latitude);
        }
        if let Some(longitude) = changes.longitude {
            builder.push(", longitude = ").push_bind(longitude);
        }
        if let Some(status) = changes.status {
            builder.push(", status = ").push_bind(status);
        }
        if let Some(assignee_id) = changes.assignee_id {
            builder.push(", assignee_id = ").push_bind(assignee_id);
        }
        // Resolution is stamped with the database clock, like created_at.
        if changes.resolved_at.is_some() {
            builder.push(", resolved_at = NOW()");
        }
        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(format!(" RETURNING {ISSUE_COLUMNS}"));

        let issue = builder
            .build_query_as::<Issue>()
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate_one(issue).await
    }

    async fn change_status(
        &self,
        id: Uuid,
        actor_id: Uuid,
        transition: &StatusTransition,
    ) -> RepoResult<Option<IssueView>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE issues SET status = $2, \
             resolved_at = CASE WHEN $3 THEN NOW() ELSE resolved_at END, updated_at = NOW() \
             WHERE id = $1 RETURNING {ISSUE_COLUMNS}"
        );
        let Some(issue) = sqlx::query_as::<_, Issue>(&sql)
            .bind(id)
            .bind(transition.status)
            .bind(transition.resolved_at.is_some())
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        insert_history(&mut tx, id, transition.status, actor_id, &transition.comment).await?;
        tx.commit().await?;

        self.hydrate_one(Some(issue)).await
    }

    async fn assign_issue(
        &self,
        id: Uuid,
        actor_id: Uuid,
        assignee: &User,
    ) -> RepoResult<Option<IssueView>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE issues SET assignee_id = $2, status = 'ASSIGNED', updated_at = NOW() \
             WHERE id = $1 RETURNING {ISSUE_COLUMNS}"
        );
        let Some(issue) = sqlx::query_as::<_, Issue>(&sql)
            .bind(id)
            .bind(assignee.id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        insert_history(
            &mut tx,
            id,
            IssueStatus::Assigned,
            actor_id,
            &assignment_comment(assignee),
        )
        .await?;
        tx.commit().await?;

        self.hydrate_one(Some(issue)).await
    }

    async fn delete_issue(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM issues WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_comment(&self, comment: NewComment) -> RepoResult<Comment> {
        let row = sqlx::query_as::<_, CommentRow>(
            r#"
            WITH c AS (
                INSERT INTO issue_comments (id, issue_id, author_id, content, is_internal)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, issue_id, author_id, content, is_internal, created_at
            )
            SELECT c.id, c.issue_id, c.content, c.is_internal, c.created_at,
                   u.id AS author_id, u.name AS author_name, u.email AS author_email, u.role AS author_role
              FROM c
              JOIN users u ON u.id = c.author_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(comment.issue_id)
        .bind(comment.author_id)
        .bind(&comment.content)
        .bind(comment.is_internal)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn status_history(&self, issue_id: Uuid) -> RepoResult<Vec<StatusHistoryEntry>> {
        Ok(sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT h.id, h.issue_id, h.status, h.comment, h.created_at,
                   u.id AS changed_by_id, u.name AS changed_by_name, u.email AS changed_by_email
              FROM issue_status_history h
              JOIN users u ON u.id = h.changed_by_id
             WHERE h.issue_id = $1
             ORDER BY h.created_at ASC
            "#,
        )
        .bind(issue_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StatusHistoryEntry::from)
        .collect())
    }

    // --- Attachments ---

    async fn create_attachment(&self, new: NewAttachment) -> RepoResult<Attachment> {
        let sql = format!(
            "INSERT INTO issue_attachments \
                (id, issue_id, filename, original_name, mime_type, size, url, type) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {ATTACHMENT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Attachment>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.issue_id)
            .bind(&new.filename)
            .bind(&new.original_name)
            .bind(&new.mime_type)
            .bind(new.size)
            .bind(&new.url)
            .bind(new.kind)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn find_attachment(&self, id: Uuid) -> RepoResult<Option<Attachment>> {
        let sql = format!("SELECT {ATTACHMENT_COLUMNS} FROM issue_attachments WHERE id = $1");
        Ok(sqlx::query_as::<_, Attachment>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_attachments(&self, issue_id: Uuid) -> RepoResult<Vec<Attachment>> {
        let sql = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM issue_attachments \
             WHERE issue_id = $1 ORDER BY created_at ASC"
        );
        Ok(sqlx::query_as::<_, Attachment>(&sql)
            .bind(issue_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn delete_attachment(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM issue_attachments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Analytics ---

    async fn issue_totals(&self) -> RepoResult<IssueTotals> {
        Ok(sqlx::query_as::<_, IssueTotals>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status IN ('SUBMITTED', 'ACKNOWLEDGED', 'ASSIGNED', 'IN_PROGRESS')) AS "open"
              FROM issues
            "#,
        )
        .fetch_one(&self.pool)
        .await?)
    }

    async fn issue_facts(&self, window: DateWindow) -> RepoResult<Vec<IssueFacts>> {
        let sql = format!(
            "{FACT_SELECT} WHERE i.created_at >= $1 AND ($2::timestamptz IS NULL OR i.created_at <= $2)"
        );
        Ok(sqlx::query_as::<_, IssueFacts>(&sql)
            .bind(window.from)
            .bind(window.to)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn resolved_facts(&self, since: DateTime<Utc>) -> RepoResult<Vec<IssueFacts>> {
        let sql = format!("{FACT_SELECT} WHERE i.status = 'RESOLVED' AND i.resolved_at >= $1");
        Ok(sqlx::query_as::<_, IssueFacts>(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?)
    }
}

/// Appends one audit row inside the caller's transaction. History is never updated or deleted.
async fn insert_history(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    issue_id: Uuid,
    status: IssueStatus,
    changed_by_id: Uuid,
    comment: &str,
) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO issue_status_history (id, issue_id, status, changed_by_id, comment, created_at) \
         VALUES ($1, $2, $3, $4, $5, NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(issue_id)
    .bind(status)
    .bind(changed_by_id)
    .bind(comment)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
