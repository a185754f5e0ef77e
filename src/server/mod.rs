/// HTTP API
///
/// A JSON API over the same engine and library the desktop app uses, plus
/// the output folder served under `/images`.
pub mod handlers;
pub mod types;

use axum::routing::{get, post};
use axum::Router;
use std::io;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

use crate::context::AppContext;

pub fn router(ctx: AppContext) -> Router {
    let images = ServeDir::new(ctx.paths.output_dir());

    Router::new()
        .route("/api/status", get(handlers::status))
        .route("/api/generate", post(handlers::generate))
        .route("/api/gallery", get(handlers::gallery))
        .route("/api/models", get(handlers::models))
        .route("/api/rescan", post(handlers::rescan))
        .nest_service("/images", images)
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Serve until Ctrl-C
pub async fn serve(ctx: AppContext, host: &str, port: u16) -> io::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    info!("🌐 API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Server shutting down...");
}
