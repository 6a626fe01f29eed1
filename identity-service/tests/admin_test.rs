mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{TestApp, ADMIN_EMAIL};
use identity_service::models::{UserStatus, UserType};
use identity_service::services::IdentityEvent;
use identity_service::store::IdentityStore;
use uuid::Uuid;

fn access_token_of(body: &serde_json::Value) -> String {
    body["accessToken"].as_str().unwrap().to_string()
}

async fn teacher(app: &TestApp) -> (Uuid, String) {
    let user_id = app
        .create_user(
            UserType::Teacher,
            "teacher@school.test",
            "Teacher123!",
            UserStatus::Active,
            Some(("Teacher", None)),
        )
        .await;
    let (status, body) = app.login("teacher@school.test", "Teacher123!").await;
    assert_eq!(status, StatusCode::OK);
    (user_id, access_token_of(&body))
}

#[tokio::test]
async fn test_me_requires_bearer_token() {
    let app = TestApp::spawn().await;

    let (status, body) = app.send_authorized("GET", "/api/auth/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid access token");

    let (status, body) = app
        .send_authorized("GET", "/api/auth/me", Some("not-a-jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid access token");
}

#[tokio::test]
async fn test_me_returns_token_identity() {
    let app = TestApp::spawn().await;
    let token = access_token_of(&app.login_admin().await);

    let (status, body) = app.send_authorized("GET", "/api/auth/me", Some(&token)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], app.admin_id.to_string());
    assert_eq!(body["userType"], "SystemAdmin");
    assert_eq!(body["email"], ADMIN_EMAIL);
    assert!(body["permissions"]
        .as_array()
        .unwrap()
        .contains(&serde_json::json!("user.manage")));
}

#[tokio::test]
async fn test_expired_access_token_is_rejected() {
    let app = TestApp::spawn().await;
    let token = access_token_of(&app.login_admin().await);

    app.clock.advance(Duration::minutes(15));

    let (status, _) = app.send_authorized("GET", "/api/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let app = TestApp::spawn().await;
    let login = app.login_admin().await;
    let refresh_token = login["refreshToken"].as_str().unwrap();

    let (status, _) = app
        .send_authorized("GET", "/api/auth/me", Some(refresh_token))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_require_user_manage() {
    let app = TestApp::spawn().await;
    let (teacher_id, teacher_token) = teacher(&app).await;
    let uri = format!("/api/admin/users/{}/lock", teacher_id);

    let (status, _) = app.send_authorized("POST", &uri, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.send_authorized("POST", &uri, Some(&teacher_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Missing permission user.manage");

    let user = app.store.find_user_by_id(teacher_id).await.unwrap().unwrap();
    assert_eq!(user.status, UserStatus::Active);
}

#[tokio::test]
async fn test_admin_locks_and_unlocks_user() {
    let app = TestApp::spawn().await;
    let (teacher_id, _) = teacher(&app).await;
    let admin_token = access_token_of(&app.login_admin().await);
    let mut events = app.state.events.subscribe();

    let (status, body) = app
        .send_authorized(
            "POST",
            &format!("/api/admin/users/{}/lock", teacher_id),
            Some(&admin_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], teacher_id.to_string());
    assert_eq!(body["status"], "locked");

    match events.try_recv() {
        Ok(IdentityEvent::UserStatusChanged { user_id, from, to, .. }) => {
            assert_eq!(user_id, teacher_id);
            assert_eq!(from, UserStatus::Active);
            assert_eq!(to, UserStatus::Locked);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let (status, _) = app.login("teacher@school.test", "Teacher123!").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send_authorized(
            "POST",
            &format!("/api/admin/users/{}/unlock", teacher_id),
            Some(&admin_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");

    let (status, _) = app.login("teacher@school.test", "Teacher123!").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_status_errors() {
    let app = TestApp::spawn().await;
    let admin_token = access_token_of(&app.login_admin().await);

    let (status, _) = app
        .send_authorized(
            "POST",
            &format!("/api/admin/users/{}/lock", Uuid::new_v4()),
            Some(&admin_token),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send_authorized(
            "POST",
            &format!("/api/admin/users/{}/disable", app.admin_id),
            Some(&admin_token),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send_authorized(
            "POST",
            &format!("/api/admin/users/{}/unlock", app.admin_id),
            Some(&admin_token),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
