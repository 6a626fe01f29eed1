pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    extract::State,
    http::Request,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::config::IdentityConfig;
use crate::dtos::auth::HealthResponse;
use crate::services::{
    AccountService, AuthService, Clock, EventBus, PermissionResolver, Seeder, ServiceError,
    TokenService,
};
use crate::store::IdentityStore;
use crate::utils::PasswordHasher;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::login,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::me,
        handlers::admin::activate_user,
        handlers::admin::disable_user,
        handlers::admin::lock_user,
        handlers::admin::unlock_user,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::UserInfo,
            dtos::auth::RefreshRequest,
            dtos::auth::LogoutRequest,
            dtos::auth::TokenResponse,
            dtos::auth::HealthResponse,
            dtos::auth::CurrentUserResponse,
            dtos::auth::UserStatusResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Login and token lifecycle"),
        (name = "Administration", description = "User status administration"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<IdentityConfig>,
    pub store: Arc<dyn IdentityStore>,
    pub auth_service: AuthService,
    pub account_service: AccountService,
    pub permissions: PermissionResolver,
    pub tokens: TokenService,
    pub seeder: Seeder,
    pub events: EventBus,
}

impl AppState {
    /// Wire every service over one store and one clock.
    pub fn new(
        config: IdentityConfig,
        store: Arc<dyn IdentityStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        let events = EventBus::default();
        let hasher = PasswordHasher::new(&config.password_hashing)?;
        let tokens = TokenService::new(&config.jwt, store.clone(), clock.clone())?;

        let auth_service = AuthService::new(
            store.clone(),
            hasher.clone(),
            tokens.clone(),
            events.clone(),
            clock.clone(),
        );
        let account_service = AccountService::new(store.clone(), events.clone(), clock.clone());
        let seeder = Seeder::new(store.clone(), hasher, events.clone(), clock);

        Ok(Self {
            config: Arc::new(config),
            permissions: PermissionResolver::new(store.clone()),
            store,
            auth_service,
            account_service,
            tokens,
            seeder,
            events,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let authenticated_routes = Router::new()
        .route("/me", get(handlers::auth::me))
        .route_layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    let auth_routes = Router::new()
        .route("/login", post(handlers::auth::login))
        .route("/refresh", post(handlers::auth::refresh))
        .route("/logout", post(handlers::auth::logout))
        .merge(authenticated_routes);

    let admin_routes = Router::new()
        .route("/users/:user_id/activate", post(handlers::admin::activate_user))
        .route("/users/:user_id/disable", post(handlers::admin::disable_user))
        .route("/users/:user_id/lock", post(handlers::admin::lock_user))
        .route("/users/:user_id/unlock", post(handlers::admin::unlock_user))
        .route_layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .nest("/api/auth", auth_routes)
        .nest("/api/admin", admin_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");

            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
            )
        }))
        // Outermost, so the trace span already sees the request id
        .layer(from_fn(request_id_middleware))
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Store unavailable")
    ),
    tag = "Observability"
)]
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::from(ServiceError::from(e))
    })?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: state.config.service_version.clone(),
    }))
}
