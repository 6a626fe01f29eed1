//! Test helpers for identity-service integration tests.
//!
//! Every test gets its own in-memory store, a fixed clock and a seeded
//! system administrator, and drives the router with `oneshot` requests.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use identity_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, IdentityConfig, JwtConfig, PasswordHashingConfig, SeedConfig,
        StoreBackend,
    },
    models::{
        Contact, ContactKind, Credential, MfaMode, Role, User, UserSchoolMembership, UserStatus,
        UserType,
    },
    services::{Clock, FixedClock},
    store::{IdentityStore, InMemoryStore},
    utils::{Password, PasswordHasher},
    AppState,
};
use secrecy::SecretString;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const ADMIN_EMAIL: &str = "admin@platform.local";
pub const ADMIN_PASSWORD: &str = "Admin123!";
pub const TEST_JWT_SECRET: &str = "integration-test-secret-key-0123456789abcdef";
pub const TEST_ISSUER: &str = "identity-service";
pub const TEST_AUDIENCE: &str = "platform-clients";

/// Cheap Argon2 parameters; production cost would make the suite crawl.
pub fn test_hashing_config() -> PasswordHashingConfig {
    PasswordHashingConfig {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "identity-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        store: StoreBackend::Memory,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        jwt: JwtConfig {
            secret_key: SecretString::new(TEST_JWT_SECRET.to_string()),
            issuer: TEST_ISSUER.to_string(),
            audience: TEST_AUDIENCE.to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 30,
        },
        password_hashing: test_hashing_config(),
        seed: SeedConfig {
            admin_email: ADMIN_EMAIL.to_string(),
            admin_temp_password: SecretString::new(ADMIN_PASSWORD.to_string()),
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<FixedClock>,
    pub admin_id: Uuid,
}

impl TestApp {
    /// Seeded application over a fresh in-memory store.
    pub async fn spawn() -> Self {
        let mut app = Self::spawn_unseeded();
        let report = app
            .state
            .seeder
            .seed_all(&app.state.config.seed)
            .await
            .expect("Failed to seed");
        app.admin_id = report.system_admin_id.expect("Admin should be created");
        app
    }

    /// Application with empty catalogs and no admin; `admin_id` is nil.
    pub fn spawn_unseeded() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 10, 8, 12, 0, 0).unwrap(),
        ));

        let state = AppState::new(
            test_config(),
            store.clone() as Arc<dyn IdentityStore>,
            clock.clone() as Arc<dyn Clock>,
        )
        .expect("Failed to build application state");

        Self {
            router: build_router(state.clone()),
            state,
            store,
            clock,
            admin_id: Uuid::nil(),
        }
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.post_json_as(uri, body, "integration-test").await
    }

    /// POST with a chosen `User-Agent` header.
    pub async fn post_json_as(&self, uri: &str, body: Value, user_agent: &str) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::USER_AGENT, user_agent)
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        read_response(response).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        read_response(response).await
    }

    /// Body-less request with an optional bearer token.
    pub async fn send_authorized(
        &self,
        method: &str,
        uri: &str,
        access_token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = access_token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = self
            .router
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();

        read_response(response).await
    }

    pub async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.post_json(
            "/api/auth/login",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> (StatusCode, Value) {
        self.post_json(
            "/api/auth/refresh",
            serde_json::json!({ "refreshToken": refresh_token }),
        )
        .await
    }

    pub async fn logout(&self, refresh_token: &str) -> (StatusCode, Value) {
        self.post_json(
            "/api/auth/logout",
            serde_json::json!({ "refreshToken": refresh_token }),
        )
        .await
    }

    /// Admin login that must succeed; returns the response body.
    pub async fn login_admin(&self) -> Value {
        let (status, body) = self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
        assert_eq!(status, StatusCode::OK, "admin login failed: {}", body);
        body
    }

    /// Create a user with a primary email, a password and, when given,
    /// a membership in `role_code`.
    pub async fn create_user(
        &self,
        user_type: UserType,
        email: &str,
        password: &str,
        status: UserStatus,
        membership: Option<(&str, Option<Uuid>)>,
    ) -> Uuid {
        let now = self.clock.now();
        let mut user = User::new(user_type, now);
        match status {
            UserStatus::Pending => {}
            UserStatus::Active => {
                user.activate(now);
            }
            UserStatus::Disabled => {
                user.activate(now);
                user.disable(now).expect("user type cannot be disabled");
            }
            UserStatus::Locked => {
                user.activate(now);
                user.lock(now);
            }
        }
        self.store.insert_user(&user).await.unwrap();

        let contact = Contact::new(user.user_id, ContactKind::Email, email, true, now).unwrap();
        self.store.insert_contact(&contact).await.unwrap();

        let hasher = PasswordHasher::new(&test_hashing_config()).unwrap();
        let hash = hasher.hash_password(&Password::from(password)).unwrap();
        let credential = Credential::new(user.user_id, hash, MfaMode::None, false, now).unwrap();
        self.store.insert_credential(&credential).await.unwrap();

        if let Some((role_code, school_id)) = membership {
            let role = self.role(role_code).await;
            let membership = UserSchoolMembership::new(user.user_id, school_id, role.role_id, now);
            self.store.insert_membership(&membership).await.unwrap();
        }

        user.user_id
    }

    pub async fn role(&self, role_code: &str) -> Role {
        self.store
            .find_role_by_code(role_code)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("role {} should be seeded", role_code))
    }
}

async fn read_response(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}
