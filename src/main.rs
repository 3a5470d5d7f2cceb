use axum::routing::get;
use axum::Router;
use status_relay::relay::RelayManager;
use status_relay::{db, AppConfig, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "status_relay=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting status relay");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    config.validate().expect("Configuration validation failed");
    let config = Arc::new(config);

    info!("Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    // Run migrations
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    // Build the relay: hydrate the destination registry from persisted
    // records, then start the poll scheduler.
    let manager = RelayManager::new(pool.clone(), config.clone());
    manager.hydrate().await.expect("Failed to hydrate registry");
    manager.spawn_scheduler();

    // Create app state
    let state = AppState::new(pool, config.clone(), manager);

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/hooks", get(status_relay::http::routes::list_destinations))
        .route(
            "/hooks/{id}/{token}",
            get(status_relay::http::routes::hook_probe)
                .post(status_relay::http::routes::receive_push),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> (axum::http::StatusCode, axum::Json<serde_json::Value>) {
    use axum::http::StatusCode;
    use axum::Json;

    let db_healthy = db::health_check(&state.pool).await;

    if db_healthy {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "database": "connected",
                "version": env!("CARGO_PKG_VERSION"),
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unhealthy",
                "database": "disconnected",
                "version": env!("CARGO_PKG_VERSION"),
            })),
        )
    }
}
