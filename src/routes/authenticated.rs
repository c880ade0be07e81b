use crate::{AppState, config::AppConfig, handlers, handlers::uploads::MAX_FILES_PER_UPLOAD};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};

/// Slack on top of the file payload for multipart boundaries and the `issueId` field.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Authenticated Router Module
///
/// Routes open to every signed-in account. Ownership rules (a citizen only sees and edits
/// the issues they reported) are enforced inside the handlers.
pub fn authenticated_routes(config: &AppConfig) -> Router<AppState> {
    Router::<AppState>::new()
        // --- Account ---
        .route(
            "/auth/me",
            get(handlers::auth::get_me).put(handlers::auth::update_me),
        )
        .route("/auth/change-password", put(handlers::auth::change_password))
        .route("/auth/logout", post(handlers::auth::logout))
        // --- Issues ---
        // GET /issues is pinned to the caller's own reports for citizens.
        .route(
            "/issues",
            get(handlers::issues::list_issues).post(handlers::issues::create_issue),
        )
        // DELETE is admin-only; the handler's `Authorized<AdminOnly>` rejects citizens.
        .route(
            "/issues/{id}",
            get(handlers::issues::get_issue)
                .put(handlers::issues::update_issue)
                .delete(handlers::issues::delete_issue),
        )
        .route("/issues/{id}/comments", post(handlers::issues::add_comment))
        // --- Media ---
        // The body limit covers the largest legal multi-file request; per-file size is
        // checked while streaming each part.
        .route(
            "/upload/single",
            post(handlers::uploads::upload_single).layer(DefaultBodyLimit::max(
                config.max_file_size + MULTIPART_OVERHEAD,
            )),
        )
        .route(
            "/upload/multiple",
            post(handlers::uploads::upload_multiple).layer(DefaultBodyLimit::max(
                config.max_file_size * MAX_FILES_PER_UPLOAD + MULTIPART_OVERHEAD,
            )),
        )
        .route("/upload/{id}", delete(handlers::uploads::delete_attachment))
}
