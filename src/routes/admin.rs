use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch},
};

/// Admin Router Module
///
/// Triage, account management and dashboards. Mounted behind the same authentication
/// layer as the authenticated routes; every handler additionally takes
/// `Authorized<AdminOnly>`, so a citizen token gets 403.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // --- Issue triage (both write a status-history row) ---
        .route("/issues/{id}/status", patch(handlers::issues::update_status))
        .route("/issues/{id}/assign", patch(handlers::issues::assign_issue))
        // --- Accounts ---
        .route("/users", get(handlers::users::list_users))
        .route(
            "/users/{id}",
            get(handlers::users::get_user)
                .put(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )
        .route("/users/{id}/stats", get(handlers::users::user_stats))
        // --- Dashboards ---
        .route("/analytics/overview", get(handlers::analytics::overview))
        .route("/analytics/categories", get(handlers::analytics::categories))
        .route("/analytics/status", get(handlers::analytics::statuses))
        .route("/analytics/priority", get(handlers::analytics::priorities))
        .route("/analytics/trends", get(handlers::analytics::trends))
        .route("/analytics/performance", get(handlers::analytics::performance))
        .route("/analytics/recent", get(handlers::analytics::recent))
}
