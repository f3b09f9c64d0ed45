use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use storyreel_events::ProgressHub;
use storyreel_worker::{PipelineEngine, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storyreel_api::config::ServerConfig;
use storyreel_api::router::build_app_router;
use storyreel_api::services;
use storyreel_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "storyreel_api=debug,storyreel_worker=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let worker_config = WorkerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Persistence ---
    let backends = services::http_backends();
    let (pipeline_services, pool) = match &config.database_url {
        Some(database_url) => {
            let pool = storyreel_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            storyreel_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            storyreel_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            let pipeline_services =
                services::postgres_services(pool.clone(), &config.providers, backends)
                    .await
                    .expect("Failed to register configured providers");
            (pipeline_services, Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            (services::memory_services(&config.providers, backends), None)
        }
    };

    // --- Engine ---
    let engine = PipelineEngine::new(pipeline_services, ProgressHub::default(), &worker_config);
    tracing::info!(
        image_max_concurrent = worker_config.processor.image_max_concurrent,
        video_max_concurrent = worker_config.processor.video_max_concurrent,
        max_retries = worker_config.max_retries,
        "Pipeline engine ready"
    );

    let state = AppState {
        engine: engine.clone(),
        pool,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config).expect("Invalid CORS_ORIGINS");

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown ---
    tracing::info!("Server stopped accepting connections, draining progress publishers");
    let drain = async {
        while engine.hub().active_publishers() > 0 {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(config.shutdown_timeout_secs), drain)
        .await
        .is_err()
    {
        tracing::warn!(
            active = engine.hub().active_publishers(),
            "Shutdown timeout reached with work still running"
        );
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
