use axum::{Json, extract::State};
use chrono::{Duration, Utc};

use crate::{
    AppState,
    analytics::{
        self, AnalyticsQuery, CategoriesResponse, DateWindow, MONTH_DAYS, OverviewResponse,
        PerformanceResponse, PrioritiesResponse, RecentIssuesResponse, StatusesResponse,
        TrendsResponse,
    },
    auth::{AdminOnly, Authorized},
    error::ApiError,
    extract::ValidQuery,
    query::IssueFilter,
};

/// Size of the "recent issues" dashboard list.
const RECENT_LIMIT: u32 = 10;

/// overview
///
/// [Admin Route] Headline KPIs: totals, open count, resolutions over the last 30 days
/// with the change against the 30 days before, average resolution time, SLA compliance
/// and first-response time.
#[utoipa::path(
    get,
    path = "/api/analytics/overview",
    responses(
        (status = 200, description = "Overview KPIs", body = OverviewResponse),
        (status = 403, description = "Insufficient permissions")
    )
)]
pub async fn overview(
    _admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
) -> Result<Json<OverviewResponse>, ApiError> {
    let now = Utc::now();
    let totals = state.repo.issue_totals().await?;
    let resolved = state
        .repo
        .resolved_facts(now - Duration::days(2 * MONTH_DAYS))
        .await?;

    Ok(Json(OverviewResponse {
        stats: analytics::overview(totals, &resolved, now),
    }))
}

#[utoipa::path(
    get,
    path = "/api/analytics/categories",
    params(AnalyticsQuery),
    responses((status = 200, description = "Issues per category", body = CategoriesResponse))
)]
pub async fn categories(
    _admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<AnalyticsQuery>,
) -> Result<Json<CategoriesResponse>, ApiError> {
    let facts = state.repo.issue_facts(query.window(Utc::now())).await?;
    Ok(Json(CategoriesResponse {
        categories: analytics::category_breakdown(&facts),
    }))
}

#[utoipa::path(
    get,
    path = "/api/analytics/status",
    params(AnalyticsQuery),
    responses((status = 200, description = "Issues per status", body = StatusesResponse))
)]
pub async fn statuses(
    _admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<AnalyticsQuery>,
) -> Result<Json<StatusesResponse>, ApiError> {
    let facts = state.repo.issue_facts(query.window(Utc::now())).await?;
    Ok(Json(StatusesResponse {
        statuses: analytics::status_breakdown(&facts),
    }))
}

#[utoipa::path(
    get,
    path = "/api/analytics/priority",
    params(AnalyticsQuery),
    responses((status = 200, description = "Issues per priority", body = PrioritiesResponse))
)]
pub async fn priorities(
    _admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<AnalyticsQuery>,
) -> Result<Json<PrioritiesResponse>, ApiError> {
    let facts = state.repo.issue_facts(query.window(Utc::now())).await?;
    Ok(Json(PrioritiesResponse {
        priorities: analytics::priority_breakdown(&facts),
    }))
}

/// trends
///
/// [Admin Route] Issues created per calendar month inside the requested window.
#[utoipa::path(
    get,
    path = "/api/analytics/trends",
    params(AnalyticsQuery),
    responses((status = 200, description = "Monthly counts, oldest first", body = TrendsResponse))
)]
pub async fn trends(
    _admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<AnalyticsQuery>,
) -> Result<Json<TrendsResponse>, ApiError> {
    let facts = state.repo.issue_facts(query.window(Utc::now())).await?;
    Ok(Json(TrendsResponse {
        trends: analytics::monthly_trends(&facts),
    }))
}

/// performance
///
/// [Admin Route] First-response hours, resolution rate and SLA compliance for issues
/// reported in the last 30 days.
#[utoipa::path(
    get,
    path = "/api/analytics/performance",
    responses((status = 200, description = "Operational metrics", body = PerformanceResponse))
)]
pub async fn performance(
    _admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
) -> Result<Json<PerformanceResponse>, ApiError> {
    let window = DateWindow::last_days(MONTH_DAYS, Utc::now());
    let facts = state.repo.issue_facts(window).await?;

    Ok(Json(PerformanceResponse {
        metrics: analytics::performance(&facts),
    }))
}

#[utoipa::path(
    get,
    path = "/api/analytics/recent",
    responses((status = 200, description = "Latest reports", body = RecentIssuesResponse))
)]
pub async fn recent(
    _admin: Authorized<AdminOnly>,
    State(state): State<AppState>,
) -> Result<Json<RecentIssuesResponse>, ApiError> {
    let (recent_issues, _) = state
        .repo
        .list_issues(&IssueFilter::recent(RECENT_LIMIT))
        .await?;

    Ok(Json(RecentIssuesResponse { recent_issues }))
}
