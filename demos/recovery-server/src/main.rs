use axum::{Router, extract::Path, http::StatusCode, routing::get};
use salvage::prelude::*;
use tower_http::trace::TraceLayer;

async fn hello() -> &'static str {
    "hello"
}

async fn find_user(Path(id): Path<u32>) -> String {
    if id != 1 {
        raise(StatusCode::NOT_FOUND, format!("user {id} not found"));
    }
    "user 1".to_string()
}

async fn divide(Path((a, b)): Path<(i32, i32)>) -> String {
    (a / b).to_string()
}

async fn upstream() -> String {
    tokio::task::yield_now().await;
    let error = anyhow::anyhow!("connection refused").context("calling billing service");
    std::panic::panic_any(error)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("Received Ctrl+C signal");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = RecoveryConfig::from_config_service(&ConfigService::from_env())?;
    tracing::info!(?config, "Recovery configured");

    let recovery = Recovery::builder().config(config).build()?;

    let app = Router::new()
        .route("/", get(hello))
        .route("/users/{id}", get(find_user))
        .route("/divide/{a}/{b}", get(divide))
        .route("/upstream", get(upstream))
        .layer(RecoveryLayer::new(recovery))
        .layer(TraceLayer::new_for_http());

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("{}:{}", host, port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
