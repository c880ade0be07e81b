//! Dashboard aggregation. Repositories hand over plain `IssueFacts`; everything here is a
//! pure function of those facts and a reference instant, so it is tested without a database.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::models::{
    IssueCategory, IssueFacts, IssuePriority, IssueStatus, IssueTotals, IssueView,
};

/// Resolution deadline used for SLA compliance.
pub const SLA_DAYS: i64 = 7;

/// Width of the "this month" window used by the overview and performance KPIs.
pub const MONTH_DAYS: i64 = 30;

/// Period
///
/// Relative reporting window selected with `?period=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub enum Period {
    #[serde(rename = "7days")]
    Week,
    #[default]
    #[serde(rename = "30days")]
    Month,
    #[serde(rename = "90days")]
    Quarter,
    #[serde(rename = "1year")]
    Year,
}

impl Period {
    pub fn days(&self) -> i64 {
        match self {
            Period::Week => 7,
            Period::Month => 30,
            Period::Quarter => 90,
            Period::Year => 365,
        }
    }
}

/// AnalyticsQuery
///
/// `startDate` and `endDate` (RFC 3339) win over `period` when both are present.
#[derive(Debug, Clone, Default, Deserialize, Validate, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
#[validate(schema(function = "validate_range"))]
pub struct AnalyticsQuery {
    #[serde(default)]
    pub period: Period,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

fn validate_range(query: &AnalyticsQuery) -> Result<(), ValidationError> {
    match (query.start_date, query.end_date) {
        (Some(start), Some(end)) if start > end => {
            let mut err = ValidationError::new("date_range");
            err.message = Some("startDate must not be after endDate".into());
            Err(err)
        }
        _ => Ok(()),
    }
}

/// DateWindow
///
/// Inclusive `created_at` bounds for a breakdown query. `to == None` means "up to now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: DateTime<Utc>,
    pub to: Option<DateTime<Utc>>,
}

impl DateWindow {
    pub fn last_days(days: i64, now: DateTime<Utc>) -> Self {
        Self {
            from: now - Duration::days(days),
            to: None,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && self.to.is_none_or(|to| at <= to)
    }
}

impl AnalyticsQuery {
    pub fn window(&self, now: DateTime<Utc>) -> DateWindow {
        match (self.start_date, self.end_date) {
            (Some(from), Some(to)) => DateWindow { from, to: Some(to) },
            _ => DateWindow::last_days(self.period.days(), now),
        }
    }
}

// --- Output shapes ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CategoryShare {
    pub category: IssueCategory,
    pub count: i64,
    pub percentage: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct StatusShare {
    pub status: IssueStatus,
    pub count: i64,
    pub percentage: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PriorityShare {
    pub priority: IssuePriority,
    pub count: i64,
    pub percentage: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TrendPoint {
    /// Calendar month, `YYYY-MM`.
    pub month: String,
    pub count: i64,
}

/// OverviewStats
///
/// Headline KPIs. Durations are in days except `avg_first_response_time` (hours);
/// all fractional values are rounded to one decimal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OverviewStats {
    pub total_issues: i64,
    pub open_issues: i64,
    pub resolved_this_month: i64,
    pub avg_resolution_time: f64,
    pub resolved_change: f64,
    pub sla_compliance: f64,
    pub avg_first_response_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PerformanceMetrics {
    /// Average hours from report to the first ACKNOWLEDGED/ASSIGNED entry.
    pub first_response_time: f64,
    pub resolution_rate: f64,
    pub sla_compliance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct OverviewResponse {
    pub stats: OverviewStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CategoriesResponse {
    pub categories: Vec<CategoryShare>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct StatusesResponse {
    pub statuses: Vec<StatusShare>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PrioritiesResponse {
    pub priorities: Vec<PriorityShare>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TrendsResponse {
    pub trends: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PerformanceResponse {
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RecentIssuesResponse {
    pub recent_issues: Vec<IssueView>,
}

// --- Aggregation ---

/// Integer share of `count` in `total`, 0 when the total is empty.
pub fn percentage(count: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    ((count as f64 / total as f64) * 100.0).round() as i64
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn average(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 86_400.0
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 3_600.0
}

/// Groups facts by `key` and returns `(key, count, percentage)` in key order.
fn breakdown<K: Ord + Copy>(facts: &[IssueFacts], key: impl Fn(&IssueFacts) -> K) -> Vec<(K, i64, i64)> {
    let mut counts: BTreeMap<K, i64> = BTreeMap::new();
    for fact in facts {
        *counts.entry(key(fact)).or_default() += 1;
    }
    let total = facts.len() as i64;
    counts
        .into_iter()
        .map(|(k, count)| (k, count, percentage(count, total)))
        .collect()
}

pub fn category_breakdown(facts: &[IssueFacts]) -> Vec<CategoryShare> {
    breakdown(facts, |f| f.category)
        .into_iter()
        .map(|(category, count, percentage)| CategoryShare { category, count, percentage })
        .collect()
}

pub fn status_breakdown(facts: &[IssueFacts]) -> Vec<StatusShare> {
    breakdown(facts, |f| f.status)
        .into_iter()
        .map(|(status, count, percentage)| StatusShare { status, count, percentage })
        .collect()
}

pub fn priority_breakdown(facts: &[IssueFacts]) -> Vec<PriorityShare> {
    breakdown(facts, |f| f.priority)
        .into_iter()
        .map(|(priority, count, percentage)| PriorityShare { priority, count, percentage })
        .collect()
}

/// Issue counts per creation month, oldest month first.
pub fn monthly_trends(facts: &[IssueFacts]) -> Vec<TrendPoint> {
    let mut months: BTreeMap<String, i64> = BTreeMap::new();
    for fact in facts {
        *months.entry(fact.created_at.format("%Y-%m").to_string()).or_default() += 1;
    }
    months
        .into_iter()
        .map(|(month, count)| TrendPoint { month, count })
        .collect()
}

fn is_resolved(fact: &IssueFacts) -> bool {
    fact.status == IssueStatus::Resolved && fact.resolved_at.is_some()
}

fn sla_compliance(resolved: &[&IssueFacts]) -> f64 {
    if resolved.is_empty() {
        return 0.0;
    }
    let within = resolved
        .iter()
        .filter(|f| {
            f.resolved_at
                .is_some_and(|at| days_between(f.created_at, at) <= SLA_DAYS as f64)
        })
        .count();
    within as f64 / resolved.len() as f64 * 100.0
}

fn avg_first_response_hours<'a>(facts: impl IntoIterator<Item = &'a IssueFacts>) -> f64 {
    average(
        facts
            .into_iter()
            .filter_map(|f| f.first_response_at.map(|at| hours_between(f.created_at, at))),
    )
}

/// overview
///
/// `resolved` must contain every RESOLVED issue with `resolved_at` in the last two months.
/// The most recent 30 days are "this month", the 30 days before that "last month".
pub fn overview(totals: IssueTotals, resolved: &[IssueFacts], now: DateTime<Utc>) -> OverviewStats {
    let this_month_start = now - Duration::days(MONTH_DAYS);
    let last_month_start = now - Duration::days(2 * MONTH_DAYS);

    let (this_month, last_month): (Vec<&IssueFacts>, Vec<&IssueFacts>) = resolved
        .iter()
        .filter(|f| is_resolved(f))
        .filter(|f| f.resolved_at.is_some_and(|at| at >= last_month_start))
        .partition(|f| f.resolved_at.is_some_and(|at| at >= this_month_start));

    let resolved_this_month = this_month.len() as i64;
    let resolved_last_month = last_month.len() as i64;

    let resolved_change = match (resolved_last_month, resolved_this_month) {
        (0, 0) => 0.0,
        (0, _) => 100.0,
        (last, current) => (current - last) as f64 / last as f64 * 100.0,
    };

    let avg_resolution = average(
        this_month
            .iter()
            .filter_map(|f| f.resolved_at.map(|at| days_between(f.created_at, at))),
    );

    OverviewStats {
        total_issues: totals.total,
        open_issues: totals.open,
        resolved_this_month,
        avg_resolution_time: round1(avg_resolution),
        resolved_change: round1(resolved_change),
        sla_compliance: round1(sla_compliance(&this_month)),
        avg_first_response_time: round1(avg_first_response_hours(this_month.iter().copied())),
    }
}

/// performance
///
/// Operational metrics over `created`, the issues reported in the last 30 days.
pub fn performance(created: &[IssueFacts]) -> PerformanceMetrics {
    let resolved: Vec<&IssueFacts> = created.iter().filter(|f| is_resolved(f)).collect();
    let resolution_rate = if created.is_empty() {
        0.0
    } else {
        resolved.len() as f64 / created.len() as f64 * 100.0
    };

    PerformanceMetrics {
        first_response_time: round1(avg_first_response_hours(created)),
        resolution_rate: round1(resolution_rate),
        sla_compliance: round1(sla_compliance(&resolved)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fact(created: DateTime<Utc>) -> IssueFacts {
        IssueFacts {
            category: IssueCategory::Pothole,
            status: IssueStatus::Submitted,
            priority: IssuePriority::Medium,
            created_at: created,
            resolved_at: None,
            first_response_at: None,
        }
    }

    fn resolved_after(created: DateTime<Utc>, days: i64) -> IssueFacts {
        IssueFacts {
            status: IssueStatus::Resolved,
            resolved_at: Some(created + Duration::days(days)),
            ..fact(created)
        }
    }

    #[test]
    fn percentages_are_rounded_integers() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(0, 0), 0);
    }

    #[test]
    fn category_breakdown_counts_each_category() {
        let now = Utc::now();
        let mut facts = vec![fact(now), fact(now), fact(now)];
        facts[2].category = IssueCategory::StreetLight;

        let shares = category_breakdown(&facts);
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[0].category, IssueCategory::Pothole);
        assert_eq!(shares[0].count, 2);
        assert_eq!(shares[0].percentage, 67);
        assert_eq!(shares[1].percentage, 33);
    }

    #[test]
    fn trends_are_grouped_by_month_ascending() {
        let jan = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
        let mar = Utc.with_ymd_and_hms(2025, 3, 2, 10, 0, 0).unwrap();
        let trends = monthly_trends(&[fact(mar), fact(jan), fact(jan)]);
        assert_eq!(
            trends,
            vec![
                TrendPoint { month: "2025-01".into(), count: 2 },
                TrendPoint { month: "2025-03".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn overview_compares_resolution_month_over_month() {
        let now = Utc::now();
        let totals = IssueTotals { total: 10, open: 4 };
        let resolved = vec![
            resolved_after(now - Duration::days(12), 2),
            resolved_after(now - Duration::days(20), 10),
            resolved_after(now - Duration::days(50), 5),
        ];

        let stats = overview(totals, &resolved, now);
        assert_eq!(stats.total_issues, 10);
        assert_eq!(stats.open_issues, 4);
        assert_eq!(stats.resolved_this_month, 2);
        assert_eq!(stats.resolved_change, 100.0);
        assert_eq!(stats.avg_resolution_time, 6.0);
        assert_eq!(stats.sla_compliance, 50.0);
    }

    #[test]
    fn overview_change_edge_cases() {
        let now = Utc::now();
        let none = overview(IssueTotals::default(), &[], now);
        assert_eq!(none.resolved_change, 0.0);

        let only_this_month = vec![resolved_after(now - Duration::days(3), 1)];
        let stats = overview(IssueTotals::default(), &only_this_month, now);
        assert_eq!(stats.resolved_change, 100.0);
    }

    #[test]
    fn performance_uses_first_response_and_sla() {
        let now = Utc::now();
        let created = now - Duration::days(10);
        let mut responded = fact(created);
        responded.first_response_at = Some(created + Duration::hours(5));
        let facts = vec![responded, resolved_after(created, 9), resolved_after(created, 1)];

        let metrics = performance(&facts);
        assert_eq!(metrics.first_response_time, 5.0);
        assert_eq!(metrics.resolution_rate, 66.7);
        assert_eq!(metrics.sla_compliance, 50.0);
    }

    #[test]
    fn explicit_dates_override_period() {
        let now = Utc::now();
        let start = now - Duration::days(400);
        let query = AnalyticsQuery {
            period: Period::Week,
            start_date: Some(start),
            end_date: Some(now),
        };
        assert_eq!(query.window(now), DateWindow { from: start, to: Some(now) });

        let query = AnalyticsQuery::default();
        assert_eq!(query.window(now).from, now - Duration::days(30));
    }
}
