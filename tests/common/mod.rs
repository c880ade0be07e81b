//! Shared fixtures for the router-level tests: an app wired to the in-memory repository
//! and the mock media store, plus request helpers.
#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use civic_issues::{
    AppConfig, AppState, InMemoryRepository, MockStorageService, create_router,
    auth::{hash_password, issue_token},
    models::{NewUser, Role, User},
    repository::{Repository, RepositoryState},
    storage::StorageState,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::util::ServiceExt;

pub const PASSWORD: &str = "password123";
pub const BOUNDARY: &str = "----civic-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub repo: Arc<InMemoryRepository>,
    pub storage: MockStorageService,
    pub config: AppConfig,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self::with_parts(config, MockStorageService::new())
    }

    pub fn with_parts(config: AppConfig, storage: MockStorageService) -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let state = AppState {
            repo: repo.clone() as RepositoryState,
            storage: Arc::new(storage.clone()) as StorageState,
            config: config.clone(),
        };

        Self {
            router: create_router(state),
            repo,
            storage,
            config,
        }
    }

    /// Inserts an account directly and returns it with a valid bearer token.
    pub async fn seed_user(&self, email: &str, role: Role) -> (User, String) {
        let password_hash = hash_password(PASSWORD.to_string(), self.config.bcrypt_cost)
            .await
            .unwrap();
        let user = self
            .repo
            .create_user(NewUser {
                email: email.to_string(),
                password_hash,
                name: Some(format!("{email} name")),
                role,
            })
            .await
            .unwrap();
        let token = issue_token(&user, &self.config.jwt_secret, self.config.jwt_ttl).unwrap();
        (user, token)
    }

    pub async fn citizen(&self) -> (User, String) {
        self.seed_user("citizen@example.com", Role::Citizen).await
    }

    pub async fn admin(&self) -> (User, String) {
        self.seed_user("admin@example.com", Role::Admin).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    /// JSON request with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(token), None).await
    }

    /// Files an issue through the API and returns its id.
    pub async fn create_issue(&self, token: &str, title: &str) -> String {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/issues",
                Some(token),
                Some(issue_payload(title)),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create issue failed: {body}");
        body["issue"]["id"].as_str().unwrap().to_string()
    }

    pub async fn upload(&self, path: &str, token: &str, parts: &[Part<'_>]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        self.send(request).await
    }
}

pub fn issue_payload(title: &str) -> Value {
    json!({
        "title": title,
        "description": "Deep pothole in the right lane",
        "category": "POTHOLE",
        "location": "Main Street 12",
        "latitude": 52.52,
        "longitude": 13.40
    })
}

/// One multipart section.
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        field: &'a str,
        filename: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File {
                field,
                filename,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// A small valid PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]));
    let mut buffer = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
    buffer.into_inner()
}
