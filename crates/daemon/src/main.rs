use anyhow::Context;
use axum::{response::Json, routing::get, Router};
use registry::JobRegistry;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod jobs;
mod media;
#[cfg(test)]
mod testing;

use config::Config;
use media::{ytdlp::YtDlp, Extractor};

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    std::fs::create_dir_all(&config.download_dir)
        .with_context(|| format!("cannot create download dir {:?}", config.download_dir))?;
    info!("Artifacts will be written to {:?}", config.download_dir);
    if config.cookies.is_some() {
        info!("Cookie material configured for yt-dlp");
    }

    let extractor: Arc<dyn Extractor> = Arc::new(
        YtDlp::new(&config.ytdlp_path, &config.download_dir)
            .with_ffmpeg_location(config.ffmpeg_location.clone())
            .with_cookies(config.cookies.clone()),
    );

    let registry = Arc::new(JobRegistry::new());
    let runner = Arc::new(
        jobs::JobRunner::new(registry, extractor.clone())
            .with_max_active_jobs(config.max_active_jobs),
    );
    if let Some(limit) = config.max_active_jobs {
        info!("Admitting at most {} active jobs", limit);
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false);

    let app = Router::new()
        .route("/health", get(health))
        .merge(api::router(runner, extractor))
        .layer(cors);

    info!("Starting mediafetchd on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("cannot bind {}", config.addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
