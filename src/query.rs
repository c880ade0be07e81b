use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    models::{Issue, IssueCategory, IssuePriority, IssueStatus, Role, User},
};

/// Largest page a client may request. Larger values are rejected, never clamped.
pub const MAX_PAGE_SIZE: u32 = 100;

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    10
}

/// SortField
///
/// Whitelist of sortable issue columns accepted in `sortBy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Priority,
    Status,
}

impl SortField {
    /// The SQL column backing this field. Only ever one of the fixed literals below.
    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Priority => "priority",
            SortField::Status => "status",
        }
    }

    fn compare(&self, a: &Issue, b: &Issue) -> Ordering {
        match self {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::Priority => a.priority.cmp(&b.priority),
            SortField::Status => a.status.cmp(&b.status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// IssueQuery
///
/// Raw query-string parameters of `GET /issues`.
#[derive(Debug, Clone, Deserialize, Validate, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct IssueQuery {
    #[serde(default = "default_page")]
    #[validate(range(min = 1, message = "Page must be at least 1"))]
    pub page: u32,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: u32,
    pub status: Option<IssueStatus>,
    pub priority: Option<IssuePriority>,
    pub category: Option<IssueCategory>,
    pub search: Option<String>,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl Default for IssueQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
            status: None,
            priority: None,
            category: None,
            search: None,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

/// IssueFilter
///
/// A validated, role-scoped list request ready to hand to the repository.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueFilter {
    /// When set, only issues reported by this user are visible.
    pub reporter_id: Option<Uuid>,
    pub status: Option<IssueStatus>,
    pub priority: Option<IssuePriority>,
    pub category: Option<IssueCategory>,
    /// Lower-cased, trimmed search term. Blank terms are dropped.
    pub search: Option<String>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub page: u32,
    pub limit: u32,
}

impl IssueFilter {
    /// for_caller
    ///
    /// Builds the filter for `caller`. Citizens are pinned to their own reports; nothing in
    /// the query string can widen that scope.
    pub fn for_caller(query: IssueQuery, caller: &AuthUser) -> Self {
        let reporter_id = match caller.role {
            Role::Citizen => Some(caller.id),
            Role::Admin => None,
        };

        Self {
            reporter_id,
            status: query.status,
            priority: query.priority,
            category: query.category,
            search: normalize_search(query.search),
            sort_by: query.sort_by,
            sort_order: query.sort_order,
            page: query.page.max(1),
            limit: query.limit.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// The N most recently created issues across all reporters.
    pub fn recent(limit: u32) -> Self {
        Self {
            reporter_id: None,
            status: None,
            priority: None,
            category: None,
            search: None,
            sort_by: SortField::CreatedAt,
            sort_order: SortOrder::Desc,
            page: 1,
            limit,
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }

    /// In-process evaluation of the filter (used by the in-memory store).
    pub fn matches(&self, issue: &Issue) -> bool {
        if self.reporter_id.is_some_and(|id| id != issue.reporter_id) {
            return false;
        }
        if self.status.is_some_and(|s| s != issue.status) {
            return false;
        }
        if self.priority.is_some_and(|p| p != issue.priority) {
            return false;
        }
        if self.category.is_some_and(|c| c != issue.category) {
            return false;
        }
        match &self.search {
            Some(term) => [
                issue.title.to_lowercase(),
                issue.description.to_lowercase(),
                issue.location.to_lowercase(),
                issue.id.to_string(),
            ]
            .iter()
            .any(|field| field.contains(term.as_str())),
            None => true,
        }
    }

    /// Orders two issues according to `sort_by` / `sort_order`.
    pub fn compare(&self, a: &Issue, b: &Issue) -> Ordering {
        let ord = self.sort_by.compare(a, b);
        match self.sort_order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    }
}

/// `ILIKE` pattern matching `term` as a literal substring. Pair it with `ESCAPE '\'`.
pub fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn normalize_search(search: Option<String>) -> Option<String> {
    search
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

/// Pagination
///
/// Page metadata returned next to every paginated list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub pages: i64,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: i64) -> Self {
        let per_page = i64::from(limit.max(1));
        Self {
            page,
            limit,
            total,
            pages: (total + per_page - 1) / per_page,
        }
    }
}

/// UserQuery
///
/// Query-string parameters of the admin `GET /users` listing.
#[derive(Debug, Clone, Deserialize, Validate, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct UserQuery {
    #[serde(default = "default_page")]
    #[validate(range(min = 1, message = "Page must be at least 1"))]
    pub page: u32,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: u32,
    pub role: Option<Role>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub search: Option<String>,
    pub page: u32,
    pub limit: u32,
}

impl From<UserQuery> for UserFilter {
    fn from(query: UserQuery) -> Self {
        Self {
            role: query.role,
            search: normalize_search(query.search),
            page: query.page.max(1),
            limit: query.limit.clamp(1, MAX_PAGE_SIZE),
        }
    }
}

impl UserFilter {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }

    /// Role equality plus case-insensitive substring match on name or email.
    pub fn matches(&self, user: &User) -> bool {
        if self.role.is_some_and(|r| r != user.role) {
            return false;
        }
        match &self.search {
            Some(term) => {
                user.email.to_lowercase().contains(term.as_str())
                    || user
                        .name
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(term.as_str()))
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: Role) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            email: "caller@example.com".to_string(),
            role,
            name: None,
        }
    }

    #[test]
    fn citizen_filter_is_pinned_to_caller() {
        let citizen = caller(Role::Citizen);
        let filter = IssueFilter::for_caller(IssueQuery::default(), &citizen);
        assert_eq!(filter.reporter_id, Some(citizen.id));

        let admin = caller(Role::Admin);
        let filter = IssueFilter::for_caller(IssueQuery::default(), &admin);
        assert_eq!(filter.reporter_id, None);
    }

    #[test]
    fn blank_search_is_ignored() {
        let query = IssueQuery {
            search: Some("   ".to_string()),
            ..IssueQuery::default()
        };
        let filter = IssueFilter::for_caller(query, &caller(Role::Admin));
        assert!(filter.search.is_none());
    }

    #[test]
    fn search_matches_any_text_column_or_id() {
        let issue = Issue {
            id: Uuid::new_v4(),
            title: "Broken lamp".to_string(),
            description: "Dark corner at night".to_string(),
            location: "Elm Street".to_string(),
            ..Issue::default()
        };
        let mut filter = IssueFilter::recent(10);

        filter.search = Some("elm".to_string());
        assert!(filter.matches(&issue));
        filter.search = Some("night".to_string());
        assert!(filter.matches(&issue));
        filter.search = Some(issue.id.to_string()[..8].to_string());
        assert!(filter.matches(&issue));
        filter.search = Some("pothole".to_string());
        assert!(!filter.matches(&issue));
    }

    #[test]
    fn like_wildcards_in_search_terms_are_escaped() {
        assert_eq!(contains_pattern("lamp"), "%lamp%");
        assert_eq!(contains_pattern("100%"), "%100\\%%");
        assert_eq!(contains_pattern("a_b"), "%a\\_b%");
        assert_eq!(contains_pattern(r"c:\x"), r"%c:\\x%");
    }

    #[test]
    fn pagination_rounds_pages_up() {
        assert_eq!(Pagination::new(2, 10, 25).pages, 3);
        assert_eq!(Pagination::new(1, 10, 20).pages, 2);
        assert_eq!(Pagination::new(1, 10, 0).pages, 0);
    }

    #[test]
    fn offset_follows_page_and_limit() {
        let mut filter = IssueFilter::recent(10);
        filter.page = 3;
        assert_eq!(filter.offset(), 20);
    }
}
