//! Account administration. Every route requires the `user.manage` permission.

use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{auth::UserStatusResponse, ErrorResponse},
    middleware::AuthUser,
    AppState,
};

pub const USER_MANAGE_PERMISSION: &str = "user.manage";

/// Activate a pending or disabled user
#[utoipa::path(
    post,
    path = "/api/admin/users/{user_id}/activate",
    params(("user_id" = Uuid, Path, description = "User to activate")),
    responses(
        (status = 200, description = "User status", body = UserStatusResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 403, description = "Missing permission", body = ErrorResponse),
        (status = 404, description = "Unknown user", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Administration"
)]
pub async fn activate_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserStatusResponse>, AppError> {
    caller.require_permission(USER_MANAGE_PERMISSION)?;
    let user = state.account_service.activate(user_id).await?;
    Ok(Json(user.into()))
}

/// Disable a user. System administrators cannot be disabled.
#[utoipa::path(
    post,
    path = "/api/admin/users/{user_id}/disable",
    params(("user_id" = Uuid, Path, description = "User to disable")),
    responses(
        (status = 200, description = "User status", body = UserStatusResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 403, description = "Missing permission", body = ErrorResponse),
        (status = 404, description = "Unknown user", body = ErrorResponse),
        (status = 409, description = "User cannot be disabled", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Administration"
)]
pub async fn disable_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserStatusResponse>, AppError> {
    caller.require_permission(USER_MANAGE_PERMISSION)?;
    let user = state.account_service.disable(user_id).await?;
    Ok(Json(user.into()))
}

/// Lock a user
#[utoipa::path(
    post,
    path = "/api/admin/users/{user_id}/lock",
    params(("user_id" = Uuid, Path, description = "User to lock")),
    responses(
        (status = 200, description = "User status", body = UserStatusResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 403, description = "Missing permission", body = ErrorResponse),
        (status = 404, description = "Unknown user", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Administration"
)]
pub async fn lock_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserStatusResponse>, AppError> {
    caller.require_permission(USER_MANAGE_PERMISSION)?;
    let user = state.account_service.lock(user_id).await?;
    Ok(Json(user.into()))
}

/// Unlock a locked user
#[utoipa::path(
    post,
    path = "/api/admin/users/{user_id}/unlock",
    params(("user_id" = Uuid, Path, description = "User to unlock")),
    responses(
        (status = 200, description = "User status", body = UserStatusResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 403, description = "Missing permission", body = ErrorResponse),
        (status = 404, description = "Unknown user", body = ErrorResponse),
        (status = 409, description = "User is not locked", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Administration"
)]
pub async fn unlock_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserStatusResponse>, AppError> {
    caller.require_permission(USER_MANAGE_PERMISSION)?;
    let user = state.account_service.unlock(user_id).await?;
    Ok(Json(user.into()))
}
