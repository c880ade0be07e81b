use axum::{
    Router,
    extract::FromRef,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::get,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Domain logic with no I/O: lifecycle rules, filtering and dashboard aggregation.
pub mod analytics;
pub mod lifecycle;
pub mod query;

// Application services and HTTP plumbing.
pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod storage;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::ApiError;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use storage::{LocalDiskStorage, MockStorageService, StorageState};

/// ApiDoc
///
/// OpenAPI document for every route and schema, served at `/api-docs/openapi.json`
/// and browsable through Swagger UI at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::auth::register, handlers::auth::login, handlers::auth::get_me,
        handlers::auth::update_me, handlers::auth::change_password, handlers::auth::logout,
        handlers::issues::list_issues, handlers::issues::get_issue, handlers::issues::create_issue,
        handlers::issues::update_issue, handlers::issues::update_status,
        handlers::issues::assign_issue, handlers::issues::add_comment,
        handlers::issues::delete_issue,
        handlers::uploads::upload_single, handlers::uploads::upload_multiple,
        handlers::uploads::delete_attachment,
        handlers::users::list_users, handlers::users::get_user, handlers::users::update_user,
        handlers::users::delete_user, handlers::users::user_stats,
        handlers::analytics::overview, handlers::analytics::categories,
        handlers::analytics::statuses, handlers::analytics::priorities,
        handlers::analytics::trends, handlers::analytics::performance,
        handlers::analytics::recent,
    ),
    components(
        schemas(
            models::Role, models::IssueStatus, models::IssuePriority, models::IssueCategory,
            models::AttachmentKind, models::UserProfile, models::UserSummary, models::Issue,
            models::Attachment, models::CommentAuthor, models::Comment,
            models::StatusHistoryEntry, models::IssueView, models::IssueDetail,
            models::IssueBrief, models::IssueCounts, models::UserWithCounts, models::UserDetail,
            models::UserStats, models::RegisterRequest, models::LoginRequest,
            models::UpdateProfileRequest, models::ChangePasswordRequest,
            models::CreateIssueRequest, models::UpdateIssueRequest, models::UpdateStatusRequest,
            models::AssignIssueRequest, models::CreateCommentRequest, models::UpdateUserRequest,
            models::MessageResponse, models::AuthResponse, models::UserResponse,
            models::IssueResponse, models::IssueDetailResponse, models::IssueListResponse,
            models::CommentResponse, models::UploadResponse, models::UserListResponse,
            models::UserDetailResponse, models::UserStatsResponse, models::HealthResponse,
            query::Pagination, query::SortField, query::SortOrder,
            analytics::Period, analytics::CategoryShare, analytics::StatusShare,
            analytics::PriorityShare, analytics::TrendPoint, analytics::OverviewStats,
            analytics::PerformanceMetrics, analytics::OverviewResponse,
            analytics::CategoriesResponse, analytics::StatusesResponse,
            analytics::PrioritiesResponse, analytics::TrendsResponse,
            analytics::PerformanceResponse, analytics::RecentIssuesResponse,
            error::FieldError,
        )
    ),
    tags(
        (name = "civic-issues", description = "Municipal issue reporting and triage API")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// The single shared container for the application's services and configuration,
/// cloned cheaply into every request.
#[derive(Clone)]
pub struct AppState {
    /// Persistence: Postgres in production, the in-memory store in tests.
    pub repo: RepositoryState,
    /// Media store: local disk in production, the mock in tests.
    pub storage: StorageState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

// Let handlers and extractors pull a single component out of `AppState`.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// cors_layer
///
/// `*` allows any origin without credentials. A concrete origin is matched exactly and
/// may send credentials. An unparsable origin allows none.
fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);
    }

    let allow_origin = match origin.parse::<HeaderValue>() {
        Ok(value) => AllowOrigin::exact(value),
        Err(e) => {
            tracing::error!(error = %e, origin, "invalid FRONTEND_URL, cross-origin requests disabled");
            AllowOrigin::list(Vec::<HeaderValue>::new())
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// create_router
///
/// Assembles the whole HTTP surface:
/// - `/health` at the root,
/// - the JSON API under `/api`, where everything except register/login sits behind
///   `auth_middleware`,
/// - uploaded media under `/uploads`,
/// - Swagger UI, and a JSON 404 for anything else.
pub fn create_router(state: AppState) -> Router {
    let expose_error_detail = state.config.env != config::Env::Production;
    let cors = cors_layer(&state.config.cors_origin);
    let x_request_id = HeaderName::from_static("x-request-id");

    // Admin routes share the authentication layer; the admin role itself is checked by
    // the handlers' `Authorized<AdminOnly>` extractor.
    let protected = authenticated::authenticated_routes(&state.config)
        .merge(admin::admin_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let api = public::public_routes().merge(protected);

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .nest_service("/uploads", ServeDir::new(&state.config.upload_dir))
        .fallback(handlers::route_not_found)
        .with_state(state);

    // Outside production, 500 bodies also carry the underlying error text.
    let base_router = if expose_error_detail {
        base_router.layer(middleware::from_fn(error::expose_internal_detail))
    } else {
        base_router
    };

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Opens one span per request carrying the method, URI and `x-request-id`, so every log
/// line of a request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
