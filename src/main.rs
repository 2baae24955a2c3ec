use anyhow::Result;
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::{AppConfig, BackendKind};
use services::{
    cache_orchestrator::CacheOrchestrator,
    gateway::ObjectStoreGateway,
    local_backend::LocalBackend,
    memory_backend::MemoryBackend,
    navigator::Navigator,
    s3_backend::S3Backend,
    store::ObjectStoreBackend,
    transcoder::{ImageTranscoder, ThumbnailConfig},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting libression with config: {:?}", cfg);

    // --- Handle migration mode ---
    if migrate {
        if cfg.backend != BackendKind::Local {
            anyhow::bail!("--migrate only applies to the local backend");
        }
        LocalBackend::open(&cfg.database_url, &cfg.storage_dir)
            .await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize store + core services ---
    let backend = build_backend(&cfg).await?;
    tracing::info!("Using {} backend", backend.name());
    let gateway = ObjectStoreGateway::new(backend, cfg.list_page_size);

    let transcoder = Arc::new(ImageTranscoder::new(ThumbnailConfig {
        fixed_height: cfg.thumbnail_height,
        ..Default::default()
    }));
    let orchestrator = CacheOrchestrator::new(
        gateway.clone(),
        transcoder,
        cfg.source_bucket.clone(),
        cfg.cache_bucket.clone(),
        cfg.cache_suffix.clone(),
    );
    let navigator = Navigator::new(
        gateway,
        orchestrator,
        cfg.source_bucket.clone(),
        cfg.cache_bucket.clone(),
        cfg.store.region.clone(),
        cfg.max_concurrency,
    );
    navigator.init_buckets().await?;

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(navigator);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_backend(cfg: &AppConfig) -> Result<Arc<dyn ObjectStoreBackend>> {
    let backend: Arc<dyn ObjectStoreBackend> = match cfg.backend {
        BackendKind::Local => {
            let local = LocalBackend::open(&cfg.database_url, &cfg.storage_dir)
                .await?;
            Arc::new(local)
        }
        BackendKind::S3 => Arc::new(S3Backend::connect(&cfg.store).await),
        BackendKind::Memory => {
            tracing::warn!("memory backend selected; all objects are lost on exit");
            Arc::new(MemoryBackend::new())
        }
    };
    Ok(backend)
}
