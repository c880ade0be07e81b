use axum::{Json, extract::State, http::StatusCode};

use crate::{
    AppState,
    auth::{AuthUser, hash_password, issue_token, verify_password},
    error::ApiError,
    extract::ValidJson,
    models::{
        AuthResponse, ChangePasswordRequest, LoginRequest, MessageResponse, NewUser,
        RegisterRequest, UpdateProfileRequest, UserChanges, UserProfile, UserResponse,
    },
};

/// Emails are compared and stored lower-cased.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// register
///
/// [Public Route] Creates an account and returns a signed token for it.
/// The role defaults to `CITIZEN`; a duplicate email is a 400.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = AuthResponse),
        (status = 400, description = "Validation error or email taken")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let email = normalize_email(&req.email);
    if state.repo.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::BadRequest(
            "User with this email already exists".to_string(),
        ));
    }

    let password_hash = hash_password(req.password, state.config.bcrypt_cost).await?;
    let user = state
        .repo
        .create_user(NewUser {
            email,
            password_hash,
            name: req.name,
            role: req.role.unwrap_or_default(),
        })
        .await?;

    let token = issue_token(&user, &state.config.jwt_secret, state.config.jwt_ttl)?;
    tracing::info!(user_id = %user.id, role = ?user.role, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully".to_string(),
            user: user.into(),
            token,
        }),
    ))
}

/// login
///
/// [Public Route] Exchanges email + password for a token. When the client declares a
/// `role`, it must match the account's role. Every mismatch is a 401.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid credentials or role")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid credentials".to_string());

    let user = state
        .repo
        .find_user_by_email(&normalize_email(&req.email))
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(req.password, user.password_hash.clone()).await? {
        return Err(invalid());
    }

    if req.role.is_some_and(|role| role != user.role) {
        return Err(ApiError::Unauthorized(
            "Invalid role for this account".to_string(),
        ));
    }

    let token = issue_token(&user, &state.config.jwt_secret, state.config.jwt_ttl)?;

    Ok(Json(AuthResponse {
        message: "Login successful".to_string(),
        user: user.into(),
        token,
    }))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses((status = 200, description = "Current profile", body = UserResponse))
)]
pub async fn get_me(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UserResponse>, ApiError> {
    let profile = state
        .repo
        .get_user(user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(UserResponse {
        message: None,
        user: UserProfile::from(profile),
    }))
}

/// update_me
///
/// [Authenticated Route] Updates the caller's own name and/or email.
#[utoipa::path(
    put,
    path = "/api/auth/me",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserResponse),
        (status = 400, description = "Validation error or email taken")
    )
)]
pub async fn update_me(
    user: AuthUser,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let email = req.email.as_deref().map(normalize_email);
    if let Some(email) = &email {
        if let Some(existing) = state.repo.find_user_by_email(email).await? {
            if existing.id != user.id {
                return Err(ApiError::BadRequest("Email already taken".to_string()));
            }
        }
    }

    let updated = state
        .repo
        .update_user(
            user.id,
            UserChanges {
                name: req.name,
                email,
                role: None,
            },
        )
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(UserResponse {
        message: Some("Profile updated successfully".to_string()),
        user: updated.into(),
    }))
}

/// change_password
///
/// [Authenticated Route] Requires the current password; a wrong one is a 401.
#[utoipa::path(
    put,
    path = "/api/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 401, description = "Current password is incorrect")
    )
)]
pub async fn change_password(
    user: AuthUser,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let account = state
        .repo
        .get_user(user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if !verify_password(req.current_password, account.password_hash).await? {
        return Err(ApiError::Unauthorized(
            "Current password is incorrect".to_string(),
        ));
    }

    let password_hash = hash_password(req.new_password, state.config.bcrypt_cost).await?;
    state.repo.set_password(user.id, &password_hash).await?;
    tracing::info!(user_id = %user.id, "password changed");

    Ok(Json(MessageResponse::new("Password changed successfully")))
}

/// logout
///
/// [Authenticated Route] Tokens are stateless; the client simply discards its copy.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses((status = 200, description = "Logged out", body = MessageResponse))
)]
pub async fn logout(_user: AuthUser) -> Json<MessageResponse> {
    Json(MessageResponse::new("Logout successful"))
}
