use axum::{
    Json,
    extract::Request,
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::repository::RepositoryError;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// InternalErrorDetail
///
/// The underlying text of an `ApiError::Internal`. It rides along as a response
/// extension and only reaches the body through `expose_internal_detail`.
#[derive(Debug, Clone)]
pub struct InternalErrorDetail(pub String);

/// FieldError
///
/// One entry of the structured `details` array attached to validation failures.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// ApiError
///
/// The single error type returned by every handler and extractor. Each variant maps to
/// exactly one HTTP status; the body is always `{"error": ...}` JSON.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<FieldError>,
    },
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }

    /// A validation failure without field-level detail (e.g. an unparsable body).
    pub fn invalid(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ErrorBody {
    fn internal(detail: Option<String>) -> Self {
        Self {
            error: INTERNAL_ERROR_MESSAGE.to_string(),
            details: None,
            detail,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Validation { message, details } => ErrorBody {
                error: message,
                details: Some(details),
                detail: None,
            },
            ApiError::Internal(detail) => {
                tracing::error!(%detail, "request failed with an internal error");
                let mut response = (status, Json(ErrorBody::internal(None))).into_response();
                response.extensions_mut().insert(InternalErrorDetail(detail));
                return response;
            }
            other => ErrorBody {
                error: other.to_string(),
                details: None,
                detail: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// expose_internal_detail
///
/// Middleware for non-production routers: rewrites the body of a 500 produced by
/// `ApiError::Internal` so it carries the underlying error text as `detail`.
pub async fn expose_internal_detail(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let Some(InternalErrorDetail(detail)) =
        response.extensions().get::<InternalErrorDetail>().cloned()
    else {
        return response;
    };

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    let body = Json(ErrorBody::internal(Some(detail))).into_response().into_body();
    Response::from_parts(parts, body)
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let mut details: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                let field = field.to_string();
                errs.iter().map(move |e| FieldError {
                    field: field.clone(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value ({})", e.code)),
                })
            })
            .collect();
        // HashMap iteration order is unstable; keep responses deterministic.
        details.sort_by(|a, b| a.field.cmp(&b.field));

        ApiError::Validation {
            message: "Validation error".to_string(),
            details,
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(_) => {
                ApiError::BadRequest("A record with this information already exists".to_string())
            }
            RepositoryError::Referenced(_) => ApiError::BadRequest(
                "Record is still referenced by other data".to_string(),
            ),
            RepositoryError::Database(e) => ApiError::internal(e),
            RepositoryError::Poisoned => ApiError::internal("in-memory store lock poisoned"),
        }
    }
}
