use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};
use uuid::Uuid;

use super::{RepoResult, Repository, RepositoryError};
use crate::{
    analytics::DateWindow,
    lifecycle::{CREATION_COMMENT, IssueChanges, StatusTransition, assignment_comment},
    models::{
        Attachment, Comment, CommentAuthor, Issue, IssueBrief, IssueCounts, IssueDetail,
        IssueFacts, IssueStatus, IssueTotals, IssueView, NewAttachment, NewComment, NewIssue,
        NewUser, StatusHistoryEntry, User, UserChanges, UserDetail, UserStats, UserSummary,
        UserWithCounts,
    },
    query::{IssueFilter, UserFilter},
};

#[derive(Debug, Clone)]
struct CommentRecord {
    id: Uuid,
    issue_id: Uuid,
    author_id: Uuid,
    content: String,
    is_internal: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct HistoryRecord {
    id: Uuid,
    issue_id: Uuid,
    status: IssueStatus,
    changed_by_id: Uuid,
    comment: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Store {
    users: HashMap<Uuid, User>,
    issues: HashMap<Uuid, Issue>,
    comments: Vec<CommentRecord>,
    attachments: Vec<Attachment>,
    history: Vec<HistoryRecord>,
    last_tick: Option<DateTime<Utc>>,
}

impl Store {
    /// Strictly increasing clock, so insertion order and timestamp order always agree.
    fn tick(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_tick {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_tick = Some(now);
        now
    }

    fn summary(&self, id: Uuid) -> Option<UserSummary> {
        self.users.get(&id).map(UserSummary::from)
    }

    fn view(&self, issue: &Issue) -> IssueView {
        IssueView {
            issue: issue.clone(),
            reporter: self.summary(issue.reporter_id).unwrap_or_default(),
            assignee: issue.assignee_id.and_then(|id| self.summary(id)),
            attachments: self
                .attachments
                .iter()
                .filter(|a| a.issue_id == issue.id)
                .cloned()
                .collect(),
            comment_count: self.comments.iter().filter(|c| c.issue_id == issue.id).count() as i64,
        }
    }

    fn comment(&self, record: &CommentRecord) -> Comment {
        let author = self.users.get(&record.author_id);
        Comment {
            id: record.id,
            issue_id: record.issue_id,
            content: record.content.clone(),
            is_internal: record.is_internal,
            created_at: record.created_at,
            author: CommentAuthor {
                id: record.author_id,
                name: author.and_then(|u| u.name.clone()),
                email: author.map(|u| u.email.clone()).unwrap_or_default(),
                role: author.map(|u| u.role).unwrap_or_default(),
            },
        }
    }

    fn history_entries(&self, issue_id: Uuid) -> Vec<StatusHistoryEntry> {
        self.history
            .iter()
            .filter(|h| h.issue_id == issue_id)
            .map(|h| StatusHistoryEntry {
                id: h.id,
                issue_id: h.issue_id,
                status: h.status,
                comment: h.comment.clone(),
                created_at: h.created_at,
                changed_by: self.summary(h.changed_by_id).unwrap_or_default(),
            })
            .collect()
    }

    fn append_history(
        &mut self,
        issue_id: Uuid,
        status: IssueStatus,
        changed_by_id: Uuid,
        comment: &str,
    ) {
        let created_at = self.tick();
        self.history.push(HistoryRecord {
            id: Uuid::new_v4(),
            issue_id,
            status,
            changed_by_id,
            comment: Some(comment.to_string()),
            created_at,
        });
    }

    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.users
            .values()
            .any(|u| Some(u.id) != except && u.email.eq_ignore_ascii_case(email))
    }

    fn counts(&self, user_id: Uuid) -> IssueCounts {
        IssueCounts {
            reported_issues: self.issues.values().filter(|i| i.reporter_id == user_id).count() as i64,
            assigned_issues: self
                .issues
                .values()
                .filter(|i| i.assignee_id == Some(user_id))
                .count() as i64,
        }
    }

    fn briefs(&self, pred: impl Fn(&Issue) -> bool) -> Vec<IssueBrief> {
        let mut issues: Vec<&Issue> = self.issues.values().filter(|i| pred(i)).collect();
        issues.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        issues
            .into_iter()
            .take(10)
            .map(|i| IssueBrief {
                id: i.id,
                title: i.title.clone(),
                status: i.status,
                priority: i.priority,
                created_at: i.created_at,
            })
            .collect()
    }

    fn facts(&self, issue: &Issue) -> IssueFacts {
        let first_response_at = self
            .history
            .iter()
            .filter(|h| h.issue_id == issue.id && IssueStatus::FIRST_RESPONSE.contains(&h.status))
            .map(|h| h.created_at)
            .min();

        IssueFacts {
            category: issue.category,
            status: issue.status,
            priority: issue.priority,
            created_at: issue.created_at,
            resolved_at: issue.resolved_at,
            first_response_at,
        }
    }
}

/// InMemoryRepository
///
/// A process-local implementation of `Repository` with the same observable semantics as
/// `PostgresRepository`: unique emails, restrictive user references, cascading issue
/// deletes and atomic status/history writes (one lock covers each operation).
#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Store>> {
        self.store.lock().map_err(|_| RepositoryError::Poisoned)
    }

    /// Overrides an issue's creation time. Lets tests place issues in past reporting windows.
    pub fn backdate_issue(&self, id: Uuid, created_at: DateTime<Utc>) -> RepoResult<bool> {
        let mut store = self.lock()?;
        Ok(match store.issues.get_mut(&id) {
            Some(issue) => {
                issue.created_at = created_at;
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    // --- Users ---

    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        let mut store = self.lock()?;
        if store.email_taken(&new.email, None) {
            return Err(RepositoryError::Conflict(format!("email {} exists", new.email)));
        }
        let now = store.tick();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            name: new.name,
            role: new.role,
            created_at: now,
            updated_at: now,
        };
        store.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> RepoResult<Option<User>> {
        let mut store = self.lock()?;
        if let Some(email) = &changes.email {
            if store.email_taken(email, Some(id)) {
                return Err(RepositoryError::Conflict(format!("email {email} exists")));
            }
        }
        let now = store.tick();
        let Some(user) = store.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            user.name = Some(name);
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(role) = changes.role {
            user.role = role;
        }
        user.updated_at = now;
        Ok(Some(user.clone()))
    }

    async fn set_password(&self, id: Uuid, password_hash: &str) -> RepoResult<bool> {
        let mut store = self.lock()?;
        let now = store.tick();
        Ok(match store.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                user.updated_at = now;
                true
            }
            None => false,
        })
    }

    async fn list_users(&self, filter: &UserFilter) -> RepoResult<(Vec<UserWithCounts>, i64)> {
        let store = self.lock()?;
        let mut users: Vec<&User> = store.users.values().filter(|u| filter.matches(u)).collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = users.len() as i64;
        let page = users
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .map(|u| UserWithCounts {
                user: u.clone().into(),
                issue_counts: store.counts(u.id),
            })
            .collect();
        Ok((page, total))
    }

    async fn user_detail(&self, id: Uuid) -> RepoResult<Option<UserDetail>> {
        let store = self.lock()?;
        let Some(user) = store.users.get(&id) else {
            return Ok(None);
        };
        Ok(Some(UserDetail {
            user: user.clone().into(),
            reported_issues: store.briefs(|i| i.reporter_id == id),
            assigned_issues: store.briefs(|i| i.assignee_id == Some(id)),
            issue_counts: store.counts(id),
        }))
    }

    async fn count_user_issues(&self, id: Uuid) -> RepoResult<i64> {
        let store = self.lock()?;
        Ok(store
            .issues
            .values()
            .filter(|i| i.reporter_id == id || i.assignee_id == Some(id))
            .count() as i64)
    }

    async fn delete_user(&self, id: Uuid) -> RepoResult<bool> {
        let mut store = self.lock()?;
        let referenced = store
            .issues
            .values()
            .any(|i| i.reporter_id == id || i.assignee_id == Some(id))
            || store.comments.iter().any(|c| c.author_id == id)
            || store.history.iter().any(|h| h.changed_by_id == id);
        if referenced {
            return Err(RepositoryError::Referenced(format!("user {id}")));
        }
        Ok(store.users.remove(&id).is_some())
    }

    async fn user_stats(&self, id: Uuid, since: DateTime<Utc>) -> RepoResult<UserStats> {
        let store = self.lock()?;
        let mut stats = UserStats::default();
        for issue in store.issues.values() {
            let resolved = issue.status == IssueStatus::Resolved;
            let recent = issue.created_at >= since;
            if issue.reporter_id == id {
                stats.total_reported += 1;
                stats.reported_this_month += i64::from(recent);
                stats.resolved_as_reporter += i64::from(resolved);
            }
            if issue.assignee_id == Some(id) {
                stats.total_assigned += 1;
                stats.assigned_this_month += i64::from(recent);
                stats.resolved_as_assignee += i64::from(resolved);
            }
        }
        Ok(stats)
    }

    // --- Issues ---

    async fn create_issue(&self, new: NewIssue) -> RepoResult<IssueView> {
        let mut store = self.lock()?;
        if !store.users.contains_key(&new.reporter_id) {
            return Err(RepositoryError::Referenced(format!("user {}", new.reporter_id)));
        }
        let now = store.tick();
        let issue = Issue {
            id: Uuid::new_v4(),
            title: new.title,
            description: new.description,
            category: new.category,
            priority: new.priority,
            severity: new.severity,
            status: IssueStatus::Submitted,
            location: new.location,
            latitude: new.latitude,
            longitude: new.longitude,
            reporter_id: new.reporter_id,
            assignee_id: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };
        store.issues.insert(issue.id, issue.clone());
        store.append_history(issue.id, IssueStatus::Submitted, new.reporter_id, CREATION_COMMENT);
        Ok(store.view(&issue))
    }

    async fn find_issue(&self, id: Uuid) -> RepoResult<Option<Issue>> {
        Ok(self.lock()?.issues.get(&id).cloned())
    }

    async fn issue_view(&self, id: Uuid) -> RepoResult<Option<IssueView>> {
        let store = self.lock()?;
        Ok(store.issues.get(&id).map(|issue| store.view(issue)))
    }

    async fn issue_detail(
        &self,
        id: Uuid,
        include_internal: bool,
    ) -> RepoResult<Option<IssueDetail>> {
        let store = self.lock()?;
        let Some(issue) = store.issues.get(&id) else {
            return Ok(None);
        };
        let comments = store
            .comments
            .iter()
            .filter(|c| c.issue_id == id && (include_internal || !c.is_internal))
            .map(|c| store.comment(c))
            .collect();

        Ok(Some(IssueDetail {
            view: store.view(issue),
            comments,
            status_history: store.history_entries(id),
        }))
    }

    async fn list_issues(&self, filter: &IssueFilter) -> RepoResult<(Vec<IssueView>, i64)> {
        let store = self.lock()?;
        let mut issues: Vec<&Issue> = store.issues.values().filter(|i| filter.matches(i)).collect();
        issues.sort_by(|a, b| filter.compare(a, b).then(a.id.cmp(&b.id)));

        let total = issues.len() as i64;
        let page = issues
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .map(|i| store.view(i))
            .collect();
        Ok((page, total))
    }

    async fn update_issue(&self, id: Uuid, changes: IssueChanges) -> RepoResult<Option<IssueView>> {
        let mut store = self.lock()?;
        if let Some(assignee_id) = changes.assignee_id {
            if !store.users.contains_key(&assignee_id) {
                return Err(RepositoryError::Referenced(format!("user {assignee_id}")));
            }
        }
        let now = store.tick();
        let Some(issue) = store.issues.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(title) = changes.title {
            issue.title = title;
        }
        if let Some(description) = changes.description {
            issue.description = description;
        }
        if let Some(category) = changes.category {
            issue.category = category;
        }
        if let Some(priority) = changes.priority {
            issue.priority = priority;
        }
        if let Some(severity) = changes.severity {
            issue.severity = severity;
        }
        if let Some(location) = changes.location {
            issue.location = location;
        }
        if let Some(latitude) = changes.latitude {
            issue.latitude = Some(latitude);
        }
        if let Some(longitude) = changes.longitude {
            issue.longitude = Some(longitude);
        }
        if let Some(status) = changes.status {
            issue.status = status;
        }
        if let Some(assignee_id) = changes.assignee_id {
            issue.assignee_id = Some(assignee_id);
        }
        if let Some(resolved_at) = changes.resolved_at {
            issue.resolved_at = Some(resolved_at);
        }
        issue.updated_at = now;

        let issue = issue.clone();
        Ok(Some(store.view(&issue)))
    }

    async fn change_status(
        &self,
        id: Uuid,
        actor_id: Uuid,
        transition: &StatusTransition,
    ) -> RepoResult<Option<IssueView>> {
        let mut store = self.lock()?;
        let now = store.tick();
        let Some(issue) = store.issues.get_mut(&id) else {
            return Ok(None);
        };
        issue.status = transition.status;
        if let Some(resolved_at) = transition.resolved_at {
            issue.resolved_at = Some(resolved_at);
        }
        issue.updated_at = now;
        let issue = issue.clone();

        store.append_history(id, transition.status, actor_id, &transition.comment);
        Ok(Some(store.view(&issue)))
    }

    async fn assign_issue(
        &self,
        id: Uuid,
        actor_id: Uuid,
        assignee: &User,
    ) -> RepoResult<Option<IssueView>> {
        let mut store = self.lock()?;
        if !store.users.contains_key(&assignee.id) {
            return Err(RepositoryError::Referenced(format!("user {}", assignee.id)));
        }
        let now = store.tick();
        let Some(issue) = store.issues.get_mut(&id) else {
            return Ok(None);
        };
        issue.assignee_id = Some(assignee.id);
        issue.status = IssueStatus::Assigned;
        issue.updated_at = now;
        let issue = issue.clone();

        store.append_history(id, IssueStatus::Assigned, actor_id, &assignment_comment(assignee));
        Ok(Some(store.view(&issue)))
    }

    async fn delete_issue(&self, id: Uuid) -> RepoResult<bool> {
        let mut store = self.lock()?;
        if store.issues.remove(&id).is_none() {
            return Ok(false);
        }
        store.comments.retain(|c| c.issue_id != id);
        store.attachments.retain(|a| a.issue_id != id);
        store.history.retain(|h| h.issue_id != id);
        Ok(true)
    }

    async fn add_comment(&self, new: NewComment) -> RepoResult<Comment> {
        let mut store = self.lock()?;
        if !store.issues.contains_key(&new.issue_id) {
            return Err(RepositoryError::Referenced(format!("issue {}", new.issue_id)));
        }
        let created_at = store.tick();
        let record = CommentRecord {
            id: Uuid::new_v4(),
            issue_id: new.issue_id,
            author_id: new.author_id,
            content: new.content,
            is_internal: new.is_internal,
            created_at,
        };
        let comment = store.comment(&record);
        store.comments.push(record);
        Ok(comment)
    }

    async fn status_history(&self, issue_id: Uuid) -> RepoResult<Vec<StatusHistoryEntry>> {
        Ok(self.lock()?.history_entries(issue_id))
    }

    // --- Attachments ---

    async fn create_attachment(&self, new: NewAttachment) -> RepoResult<Attachment> {
        let mut store = self.lock()?;
        if !store.issues.contains_key(&new.issue_id) {
            return Err(RepositoryError::Referenced(format!("issue {}", new.issue_id)));
        }
        let created_at = store.tick();
        let attachment = Attachment {
            id: Uuid::new_v4(),
            issue_id: new.issue_id,
            filename: new.filename,
            original_name: new.original_name,
            mime_type: new.mime_type,
            size: new.size,
            url: new.url,
            kind: new.kind,
            created_at,
        };
        store.attachments.push(attachment.clone());
        Ok(attachment)
    }

    async fn find_attachment(&self, id: Uuid) -> RepoResult<Option<Attachment>> {
        Ok(self.lock()?.attachments.iter().find(|a| a.id == id).cloned())
    }

    async fn list_attachments(&self, issue_id: Uuid) -> RepoResult<Vec<Attachment>> {
        Ok(self
            .lock()?
            .attachments
            .iter()
            .filter(|a| a.issue_id == issue_id)
            .cloned()
            .collect())
    }

    async fn delete_attachment(&self, id: Uuid) -> RepoResult<bool> {
        let mut store = self.lock()?;
        let before = store.attachments.len();
        store.attachments.retain(|a| a.id != id);
        Ok(store.attachments.len() != before)
    }

    // --- Analytics ---

    async fn issue_totals(&self) -> RepoResult<IssueTotals> {
        let store = self.lock()?;
        Ok(IssueTotals {
            total: store.issues.len() as i64,
            open: store.issues.values().filter(|i| i.status.is_open()).count() as i64,
        })
    }

    async fn issue_facts(&self, window: DateWindow) -> RepoResult<Vec<IssueFacts>> {
        let store = self.lock()?;
        Ok(store
            .issues
            .values()
            .filter(|i| window.contains(i.created_at))
            .map(|i| store.facts(i))
            .collect())
    }

    async fn resolved_facts(&self, since: DateTime<Utc>) -> RepoResult<Vec<IssueFacts>> {
        let store = self.lock()?;
        Ok(store
            .issues
            .values()
            .filter(|i| {
                i.status == IssueStatus::Resolved && i.resolved_at.is_some_and(|at| at >= since)
            })
            .map(|i| store.facts(i))
            .collect())
    }
}
