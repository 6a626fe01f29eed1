use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::User;
use crate::services::{AccessTokenClaims, LoginSession, SessionUser, TokenPair, EMAIL_CLAIM};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "admin@platform.local")]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(example = "ChangeMe123!", min_length = 8)]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    #[schema(example = "q1w2e3r4...")]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    #[schema(example = "q1w2e3r4...")]
    pub refresh_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = 900)]
    pub expires_in: i64,
    #[schema(example = "Bearer")]
    pub token_type: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: Uuid,
    #[schema(example = "SystemAdmin")]
    pub user_type: String,
    #[schema(example = "admin@platform.local")]
    pub email: String,
    pub permissions: Vec<String>,
    pub must_change_password: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenResponse,
    pub user: UserInfo,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_in: pair.expires_in,
            token_type: pair.token_type.to_string(),
        }
    }
}

impl From<SessionUser> for UserInfo {
    fn from(user: SessionUser) -> Self {
        Self {
            user_id: user.user_id,
            user_type: user.user_type.as_str().to_string(),
            email: user.email,
            permissions: user.permissions,
            must_change_password: user.must_change_password,
        }
    }
}

impl From<LoginSession> for LoginResponse {
    fn from(session: LoginSession) -> Self {
        Self {
            tokens: session.tokens.into(),
            user: session.user.into(),
        }
    }
}

/// The caller as described by its access token.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUserResponse {
    pub user_id: String,
    #[schema(example = "Teacher")]
    pub user_type: String,
    pub email: Option<String>,
    pub permissions: Vec<String>,
}

impl From<AccessTokenClaims> for CurrentUserResponse {
    fn from(claims: AccessTokenClaims) -> Self {
        Self {
            permissions: claims.permissions(),
            email: claims.additional.get(EMAIL_CLAIM).cloned(),
            user_id: claims.sub,
            user_type: claims.user_type,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusResponse {
    pub user_id: Uuid,
    #[schema(example = "Teacher")]
    pub user_type: String,
    #[schema(example = "locked")]
    pub status: String,
}

impl From<User> for UserStatusResponse {
    fn from(user: User) -> Self {
        Self {
            user_id: user.user_id,
            user_type: user.user_type.as_str().to_string(),
            status: user.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    #[schema(example = "identity-service")]
    pub service: String,
    pub version: String,
}
