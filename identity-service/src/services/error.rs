use service_core::error::AppError;
use std::fmt;
use thiserror::Error;

use crate::models::{ModelError, UserStatus};
use crate::store::StoreError;

/// Message returned for every failed login, whatever step rejected it.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid email or password";
pub const INVALID_REFRESH_TOKEN_MESSAGE: &str = "Invalid refresh token";
pub const INVALID_ACCESS_TOKEN_MESSAGE: &str = "Invalid access token";

/// Which check rejected an authentication attempt.
///
/// Only ever logged. Callers outside the service see a single generic
/// message per flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    ContactNotFound,
    UserNotFound,
    UserInactive(UserStatus),
    CredentialNotFound,
    PasswordMismatch,
    AccessTokenInvalid,
    RefreshTokenUnknown,
    RefreshTokenInactive,
    RefreshTokenReused,
}

impl AuthFailure {
    /// Step name used in audit logs.
    pub fn step(&self) -> &'static str {
        match self {
            AuthFailure::ContactNotFound => "contact_lookup",
            AuthFailure::UserNotFound => "user_lookup",
            AuthFailure::UserInactive(_) => "status_check",
            AuthFailure::CredentialNotFound => "credential_lookup",
            AuthFailure::PasswordMismatch => "password_verification",
            AuthFailure::AccessTokenInvalid => "access_token_validation",
            AuthFailure::RefreshTokenUnknown
            | AuthFailure::RefreshTokenInactive
            | AuthFailure::RefreshTokenReused => "refresh_token_lookup",
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self {
            AuthFailure::AccessTokenInvalid => INVALID_ACCESS_TOKEN_MESSAGE,
            AuthFailure::RefreshTokenUnknown
            | AuthFailure::RefreshTokenInactive
            | AuthFailure::RefreshTokenReused => INVALID_REFRESH_TOKEN_MESSAGE,
            AuthFailure::ContactNotFound
            | AuthFailure::UserNotFound
            | AuthFailure::UserInactive(_)
            | AuthFailure::CredentialNotFound
            | AuthFailure::PasswordMismatch => INVALID_CREDENTIALS_MESSAGE,
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::ContactNotFound => write!(f, "no email contact matches"),
            AuthFailure::UserNotFound => write!(f, "contact references a missing user"),
            AuthFailure::UserInactive(status) => write!(f, "user status is {}", status),
            AuthFailure::CredentialNotFound => write!(f, "user has no credential"),
            AuthFailure::PasswordMismatch => write!(f, "password does not match"),
            AuthFailure::AccessTokenInvalid => write!(f, "access token rejected"),
            AuthFailure::RefreshTokenUnknown => write!(f, "refresh token not found"),
            AuthFailure::RefreshTokenInactive => write!(f, "refresh token expired or revoked"),
            AuthFailure::RefreshTokenReused => write!(f, "refresh token was already rotated"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(AuthFailure),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn auth_failure(&self) -> Option<AuthFailure> {
        match self {
            ServiceError::AuthenticationFailed(failure) => Some(*failure),
            _ => None,
        }
    }
}

impl From<AuthFailure> for ServiceError {
    fn from(failure: AuthFailure) -> Self {
        ServiceError::AuthenticationFailed(failure)
    }
}

impl From<ModelError> for ServiceError {
    fn from(err: ModelError) -> Self {
        if err.is_state_conflict() {
            ServiceError::StateConflict(err.to_string())
        } else {
            ServiceError::InvalidArgument(err.to_string())
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(e) => ServiceError::DependencyUnavailable(e),
            StoreError::Conflict(msg) => ServiceError::StateConflict(msg),
            StoreError::Corrupt(msg) => {
                ServiceError::Internal(anyhow::anyhow!("Corrupt record: {}", msg))
            }
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::AuthenticationFailed(failure) => {
                AppError::AuthError(anyhow::anyhow!(failure.public_message()))
            }
            ServiceError::InvalidArgument(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::NotFound(e) => AppError::NotFound(anyhow::anyhow!(e)),
            ServiceError::StateConflict(e) => AppError::Conflict(anyhow::anyhow!(e)),
            ServiceError::DependencyUnavailable(e) => AppError::DatabaseError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
