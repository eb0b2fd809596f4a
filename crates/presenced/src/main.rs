use std::sync::Arc;

use anyhow::{Context, Result};
use presence_core::{EmbeddingStore, OnnxEmbedder};
use presenced::attendance::AttendanceLog;
use presenced::config::Config;
use presenced::engine::spawn_engine;
use presenced::http::{build_router, serve, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("presenced starting");

    let config = Config::from_env().context("load configuration")?;
    tracing::info!(
        bind = %config.bind,
        db_dir = %config.db_dir.display(),
        log_dir = %config.log_dir.display(),
        model_dir = %config.model_dir.display(),
        comparison = ?config.comparison,
        "configuration loaded"
    );

    let store = Arc::new(
        EmbeddingStore::open(&config.db_dir)
            .with_context(|| format!("open embedding store {}", config.db_dir.display()))?,
    );
    let attendance = Arc::new(
        AttendanceLog::open(&config.log_dir)
            .with_context(|| format!("open attendance log dir {}", config.log_dir.display()))?,
    );
    tracing::info!(enrolled = store.len()?, "embedding store ready");

    // Fail fast if the models are missing.
    let embedder = OnnxEmbedder::load(&config.model_dir, config.comparison)
        .with_context(|| format!("load face models from {}", config.model_dir.display()))?;
    let engine = spawn_engine(Box::new(embedder), store.clone(), config.queue_depth)?;

    let app = build_router(
        AppState {
            engine,
            store,
            attendance,
        },
        config.max_upload_bytes,
    );
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;

    tracing::info!("presenced ready");

    serve(listener, app, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("presenced shutting down");
    })
    .await?;

    Ok(())
}
