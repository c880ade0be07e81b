mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use civic_issues::{
    auth::{Claims, decode_token, issue_token},
    models::{Role, User},
    repository::Repository,
};
use common::{PASSWORD, TestApp};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

// --- Registration ---

#[tokio::test]
async fn test_register_token_matches_persisted_user() {
    let app = TestApp::new();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "email": "New.Person@Example.com",
                "password": "secret1",
                "name": "New Person"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "User registered successfully");
    assert_eq!(body["user"]["role"], "CITIZEN");
    assert!(body["user"].get("passwordHash").is_none());

    let claims = decode_token(body["token"].as_str().unwrap(), &app.config.jwt_secret).unwrap();
    let stored = app
        .repo
        .find_user_by_email("new.person@example.com")
        .await
        .unwrap()
        .expect("user persisted");

    assert_eq!(claims.sub, stored.id);
    assert_eq!(claims.email, stored.email);
    assert_eq!(claims.role, stored.role);
    assert_eq!(stored.email, "new.person@example.com");
}

#[tokio::test]
async fn test_register_honours_requested_role() {
    let app = TestApp::new();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": "ops@example.com", "password": "secret1", "role": "ADMIN" })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["role"], "ADMIN");
}

#[tokio::test]
async fn test_register_duplicate_email_is_rejected() {
    let app = TestApp::new();
    app.citizen().await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": "CITIZEN@example.com", "password": "secret1" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "User with this email already exists");
}

#[tokio::test]
async fn test_register_validation_reports_fields() {
    let app = TestApp::new();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": "not-an-email", "password": "123", "name": "X" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation error");
    let fields: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["email", "name", "password"]);
}

#[tokio::test]
async fn test_register_malformed_json_is_bad_request() {
    let app = TestApp::new();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": "a@b.com" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

// --- Login ---

#[tokio::test]
async fn test_login_success_with_matching_role() {
    let app = TestApp::new();
    let (admin, _) = app.admin().await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "admin@example.com", "password": PASSWORD, "role": "ADMIN" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful");
    let claims = decode_token(body["token"].as_str().unwrap(), &app.config.jwt_secret).unwrap();
    assert_eq!(claims.sub, admin.id);
}

#[tokio::test]
async fn test_login_any_single_mismatch_is_unauthorized() {
    let app = TestApp::new();
    app.citizen().await;

    let cases = [
        json!({ "email": "citizen@example.com", "password": "wrong-password" }),
        json!({ "email": "nobody@example.com", "password": PASSWORD }),
        json!({ "email": "citizen@example.com", "password": PASSWORD, "role": "ADMIN" }),
    ];

    for payload in cases {
        let (status, _) = app
            .request(Method::POST, "/api/auth/login", None, Some(payload.clone()))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "payload {payload}");
    }

    let (_, body) = app
        .request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "citizen@example.com", "password": PASSWORD, "role": "ADMIN" })),
        )
        .await;
    assert_eq!(body["error"], "Invalid role for this account");
}

// --- Bearer token resolution ---

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = TestApp::new();

    let (status, body) = app.request(Method::GET, "/api/auth/me", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Access token required");
}

#[tokio::test]
async fn test_invalid_token_is_forbidden() {
    let app = TestApp::new();

    let (status, body) = app.get("/api/auth/me", "not.a.jwt").await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Invalid or expired token");
}

#[tokio::test]
async fn test_expired_token_is_forbidden() {
    let app = TestApp::new();
    let (user, _) = app.citizen().await;

    let now = Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        role: user.role,
        iat: now - 7200,
        exp: now - 3600,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(app.config.jwt_secret.as_bytes()),
    )
    .unwrap();

    let (status, _) = app.get("/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_forbidden() {
    let app = TestApp::new();
    let (user, _) = app.citizen().await;
    let token = issue_token(&user, "some-other-secret", Duration::from_secs(60)).unwrap();

    let (status, _) = app.get("/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_token_for_unknown_user_is_unauthorized() {
    let app = TestApp::new();
    let ghost = User {
        id: Uuid::new_v4(),
        email: "ghost@example.com".to_string(),
        role: Role::Admin,
        ..User::default()
    };
    let token = issue_token(&ghost, &app.config.jwt_secret, app.config.jwt_ttl).unwrap();

    let (status, body) = app.get("/api/auth/me", &token).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "User not found");
}

#[tokio::test]
async fn test_role_change_applies_to_existing_token() {
    let app = TestApp::new();
    let (admin, admin_token) = app.admin().await;
    let (citizen, citizen_token) = app.citizen().await;

    let (status, _) = app.get("/api/users", &citizen_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/api/users/{}", citizen.id),
            Some(&admin_token),
            Some(json!({ "role": "ADMIN" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get("/api/users", &citizen_token).await;
    assert_eq!(status, StatusCode::OK, "role is re-read from the store on every request");
    assert_ne!(admin.id, citizen.id);
}

#[tokio::test]
async fn test_citizen_on_admin_route_is_forbidden() {
    let app = TestApp::new();
    let (_, token) = app.citizen().await;

    let (status, body) = app.get("/api/analytics/overview", &token).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Insufficient permissions");
}

// --- Profile management ---

#[tokio::test]
async fn test_get_and_update_profile() {
    let app = TestApp::new();
    let (user, token) = app.citizen().await;

    let (status, body) = app.get("/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], user.id.to_string());

    let (status, body) = app
        .request(
            Method::PUT,
            "/api/auth/me",
            Some(&token),
            Some(json!({ "name": "Renamed Citizen", "email": "Renamed@Example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Profile updated successfully");
    assert_eq!(body["user"]["name"], "Renamed Citizen");
    assert_eq!(body["user"]["email"], "renamed@example.com");
}

#[tokio::test]
async fn test_update_profile_email_taken() {
    let app = TestApp::new();
    app.admin().await;
    let (_, token) = app.citizen().await;

    let (status, body) = app
        .request(
            Method::PUT,
            "/api/auth/me",
            Some(&token),
            Some(json!({ "email": "admin@example.com" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Email already taken");
}

#[tokio::test]
async fn test_change_password_flow() {
    let app = TestApp::new();
    let (_, token) = app.citizen().await;

    let (status, body) = app
        .request(
            Method::PUT,
            "/api/auth/change-password",
            Some(&token),
            Some(json!({ "currentPassword": "wrong-one", "newPassword": "brand-new" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Current password is incorrect");

    let (status, _) = app
        .request(
            Method::PUT,
            "/api/auth/change-password",
            Some(&token),
            Some(json!({ "currentPassword": PASSWORD, "newPassword": "brand-new" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "citizen@example.com", "password": "brand-new" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "citizen@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_is_stateless() {
    let app = TestApp::new();
    let (_, token) = app.citizen().await;

    let (status, body) = app
        .request(Method::POST, "/api/auth/logout", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logout successful");

    // No revocation list: the token keeps working until it expires.
    let (status, _) = app.get("/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::OK);
}
