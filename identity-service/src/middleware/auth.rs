//! Bearer authentication for protected routes.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::{
    services::{AccessTokenClaims, AuthFailure, ServiceError},
    AppState,
};

/// Validate the `Authorization: Bearer` access token and store its claims
/// in the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let Some(token) = token else {
        tracing::warn!(uri = %req.uri(), "Missing bearer token");
        return Err(ServiceError::from(AuthFailure::AccessTokenInvalid).into());
    };

    let claims = state.tokens.validate_access_token(token).map_err(|e| {
        tracing::warn!(uri = %req.uri(), error = %e, "Rejected access token");
        AppError::from(e)
    })?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Claims of the authenticated caller.
pub struct AuthUser(pub AccessTokenClaims);

impl AuthUser {
    /// Fails with 403 unless the token grants `code`.
    pub fn require_permission(&self, code: &str) -> Result<(), AppError> {
        if self.0.permissions().iter().any(|granted| granted == code) {
            return Ok(());
        }

        tracing::warn!(
            user_id = %self.0.sub,
            required_permission = code,
            "Insufficient permissions"
        );
        Err(AppError::Forbidden(anyhow::anyhow!(
            "Missing permission {}",
            code
        )))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts
            .extensions
            .get::<AccessTokenClaims>()
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "Auth claims missing from request extensions"
                ))
            })?;

        Ok(AuthUser(claims.clone()))
    }
}
