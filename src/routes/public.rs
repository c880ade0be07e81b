use crate::{AppState, handlers};
use axum::{Router, routing::post};

/// Public Router Module
///
/// The only unauthenticated endpoints under `/api`: account creation and login. Both
/// return a signed bearer token. `/health` is mounted at the root by `create_router`.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // POST /auth/register
        // Creates a CITIZEN (or explicitly requested role) account.
        .route("/auth/register", post(handlers::auth::register))
        // POST /auth/login
        // Email + password, optionally checked against a declared role.
        .route("/auth/login", post(handlers::auth::login))
}
