use identity_service::{
    build_router,
    config::{IdentityConfig, StoreBackend},
    db,
    services::{spawn_audit_log, SystemClock},
    store::{IdentityStore, InMemoryStore, PgStore},
    AppState,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::Instrument;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        store = ?config.store,
        "Starting identity service"
    );

    let store: Arc<dyn IdentityStore> = match config.store {
        StoreBackend::Postgres => {
            let pool = db::create_pool(&config.database)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
            db::run_migrations(&pool)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; all state is lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );

    let state = AppState::new(config, store, Arc::new(SystemClock))?;

    let audit_log = spawn_audit_log(&state.events);

    // Catalogs and the bootstrap administrator must exist before traffic
    state.seeder.seed_all(&state.config.seed).await?;

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    async move {
        tracing::info!(address = %addr, "Listening");
        service_core::axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
    .instrument(service_span)
    .await?;

    audit_log.abort();

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
