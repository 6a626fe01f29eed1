//! Authentication handlers: login, token refresh, logout and the current caller.

use axum::{
    extract::{ConnectInfo, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use std::net::SocketAddr;

use crate::{
    dtos::{
        auth::{
            CurrentUserResponse, LoginRequest, LoginResponse, LogoutRequest, RefreshRequest,
            TokenResponse,
        },
        ErrorResponse,
    },
    middleware::AuthUser,
    services::{LoginCommand, RefreshCommand},
    utils::{Password, ValidatedJson},
    AppState,
};

/// Caller address, when the server was started with connect info.
fn client_ip(connect_info: Option<ConnectInfo<SocketAddr>>) -> Option<String> {
    connect_info.map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .auth_service
        .login(LoginCommand {
            email: req.email,
            password: Password::new(req.password),
            ip_address: client_ip(connect_info),
            user_agent: user_agent(&headers),
        })
        .await?;

    Ok((StatusCode::OK, Json(LoginResponse::from(session))))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Tokens rotated", body = TokenResponse),
        (status = 401, description = "Invalid refresh token", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state
        .auth_service
        .refresh(RefreshCommand {
            refresh_token: req.refresh_token,
            ip_address: client_ip(connect_info),
            user_agent: user_agent(&headers),
        })
        .await?;

    Ok((StatusCode::OK, Json(TokenResponse::from(tokens))))
}

/// Revoke a refresh token
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Logged out"),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn logout(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.logout(&req.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The authenticated caller
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Caller identity", body = CurrentUserResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Authentication"
)]
pub async fn me(AuthUser(claims): AuthUser) -> Json<CurrentUserResponse> {
    Json(CurrentUserResponse::from(claims))
}
