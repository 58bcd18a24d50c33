use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use twin_core::{spawn_engine, FaceEmbedder, Settings};
use twin_pipeline::MatchOptions;
use twin_store::{QdrantStore, VectorStore};

mod error;
mod photos;
mod routes;

#[derive(Parser)]
#[command(name = "twind", about = "CelebTwin web server", version)]
struct Args {
    /// TOML config file (defaults to $TWIN_CONFIG, then built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the Qdrant Cloud endpoint instead of the local one
    #[arg(long)]
    use_qdrant_cloud: bool,

    /// Listen address, overriding `bind_addr`
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }
    tracing::info!(?settings, "twind starting");

    let endpoint = settings.endpoint(args.use_qdrant_cloud)?;
    let store = QdrantStore::new(&endpoint, settings.request_timeout_secs)?;

    match store.collection_info(&settings.collection_name).await {
        Ok(Some(info)) => tracing::info!(
            collection = %info.name,
            points = info.points_count,
            dimensions = info.dimensions,
            "catalog ready"
        ),
        Ok(None) => tracing::warn!(
            collection = %settings.collection_name,
            "collection missing; run `twin ingest` before matching"
        ),
        Err(e) => tracing::warn!(url = %store.base_url(), error = %e, "vector database not reachable yet"),
    }

    let embedder = FaceEmbedder::load(&settings).context("loading face models")?;
    let engine = spawn_engine(embedder)?;

    let state = routes::AppState::new(
        store,
        engine,
        MatchOptions::from_settings(&settings),
        settings.celebrities_dir(),
    );
    let app = routes::router(state);

    let addr = settings.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "twind ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("twind shutting down");
        })
        .await?;

    Ok(())
}
