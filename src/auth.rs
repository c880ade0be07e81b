use std::{marker::PhantomData, ops::Deref, time::Duration};

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::ApiError,
    models::{Role, User},
    repository::RepositoryState,
};

/// Claims
///
/// Payload of every bearer token. Signed with HS256 using the configured secret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject (sub): the user's id.
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    /// Expiration Time (exp), seconds since the epoch.
    pub exp: usize,
    /// Issued At (iat), seconds since the epoch.
    pub iat: usize,
}

/// issue_token
///
/// Signs a token for `user` valid for `ttl`.
pub fn issue_token(user: &User, secret: &str, ttl: Duration) -> Result<String, ApiError> {
    let now = Utc::now().timestamp().max(0) as usize;
    let exp = usize::try_from(ttl.as_secs())
        .ok()
        .and_then(|ttl| now.checked_add(ttl))
        .ok_or_else(|| ApiError::internal("token lifetime overflows the expiry claim"))?;
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        role: user.role,
        iat: now,
        exp,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(ApiError::internal)
}

/// decode_token
///
/// Verifies signature and expiry and returns the claims.
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    // Tokens are checked to the second; no grace period.
    validation.leeway = 0;

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
}

/// hash_password
///
/// bcrypt is CPU-bound, so hashing runs on the blocking pool instead of a runtime worker.
pub async fn hash_password(password: String, cost: u32) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::internal)
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::internal)
}

/// AuthUser
///
/// The resolved identity of an authenticated request. The user row is re-read on every
/// request, so role changes and deletions take effect before the token expires.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub name: Option<String>,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            name: user.name.clone(),
        }
    }
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// resolve
    ///
    /// Bearer-token authentication:
    /// - header missing or not `Bearer <token>` → 401 "Access token required"
    /// - bad signature, malformed or expired token → 403 "Invalid or expired token"
    /// - token for a user that no longer exists → 401 "User not found"
    pub async fn resolve(
        parts: &Parts,
        repo: &RepositoryState,
        config: &AppConfig,
    ) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Access token required".to_string()))?;

        let claims = decode_token(token, &config.jwt_secret).map_err(|e| {
            tracing::debug!(error = %e, "rejected bearer token");
            ApiError::Forbidden("Invalid or expired token".to_string())
        })?;

        let user = repo
            .get_user(claims.sub)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;

        Ok(AuthUser::from(&user))
    }
}

/// AuthUser Extractor Implementation
///
/// Reuses the identity stored by `auth_middleware` when present, otherwise authenticates
/// the request itself. Rejects with an `ApiError` (401/403).
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);
        Self::resolve(parts, &repo, &config).await
    }
}

/// auth_middleware
///
/// Guards every protected route: resolves the caller once and stores the `AuthUser` in
/// the request extensions for the handler's extractors.
pub async fn auth_middleware(
    State(repo): State<RepositoryState>,
    State(config): State<AppConfig>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();
    let user = AuthUser::resolve(&parts, &repo, &config).await?;
    parts.extensions.insert(user);

    Ok(next.run(Request::from_parts(parts, body)).await)
}

// --- Declarative role gating ---

/// RolePolicy
///
/// The set of roles a route accepts. Implemented by zero-sized marker types.
pub trait RolePolicy: Send + Sync + 'static {
    const ALLOWED: &'static [Role];
}

/// Admin-only routes.
#[derive(Debug)]
pub struct AdminOnly;

impl RolePolicy for AdminOnly {
    const ALLOWED: &'static [Role] = &[Role::Admin];
}

/// Any authenticated account.
#[derive(Debug)]
pub struct AnyRole;

impl RolePolicy for AnyRole {
    const ALLOWED: &'static [Role] = &[Role::Citizen, Role::Admin];
}

/// Authorized
///
/// An `AuthUser` whose role is permitted by policy `P`. Taking `Authorized<AdminOnly>` as a
/// handler argument is the route's role declaration; anyone else gets 403.
#[derive(Debug)]
pub struct Authorized<P: RolePolicy> {
    pub user: AuthUser,
    _policy: PhantomData<P>,
}

impl<P: RolePolicy> Authorized<P> {
    pub fn check(user: AuthUser) -> Result<Self, ApiError> {
        if !P::ALLOWED.contains(&user.role) {
            return Err(ApiError::Forbidden("Insufficient permissions".to_string()));
        }
        Ok(Self {
            user,
            _policy: PhantomData,
        })
    }
}

impl<P: RolePolicy> Deref for Authorized<P> {
    type Target = AuthUser;

    fn deref(&self) -> &AuthUser {
        &self.user
    }
}

impl<S, P> FromRequestParts<S> for Authorized<P>
where
    S: Send + Sync,
    P: RolePolicy,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        Self::check(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            email: "someone@example.com".to_string(),
            role,
            ..User::default()
        }
    }

    #[test]
    fn token_roundtrip_preserves_identity() {
        let u = user(Role::Admin);
        let token = issue_token(&u, "secret", Duration::from_secs(60)).unwrap();
        let claims = decode_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, u.id);
        assert_eq!(claims.email, u.email);
        assert_eq!(claims.role, Role::Admin);
    }

    #[test]
    fn token_lifetime_overflow_is_an_error() {
        let result = issue_token(&user(Role::Citizen), "secret", Duration::from_secs(u64::MAX));
        assert!(matches!(result, Err(ApiError::Internal(_))));
    }

    #[test]
    fn token_with_wrong_secret_is_rejected() {
        let token = issue_token(&user(Role::Citizen), "secret", Duration::from_secs(60)).unwrap();
        assert!(decode_token(&token, "other").is_err());
    }

    #[test]
    fn admin_policy_rejects_citizens() {
        let citizen = AuthUser::from(&user(Role::Citizen));
        let err = Authorized::<AdminOnly>::check(citizen.clone()).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert!(Authorized::<AnyRole>::check(citizen).is_ok());
    }
}
