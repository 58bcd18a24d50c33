use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use twin_core::{spawn_engine, EngineHandle, FaceEmbedder, Settings};
use twin_pipeline::{
    find_matches, run_ingest, DatasetSource, FolderDataset, HubDataset, IngestOptions, MatchOptions,
    DEFAULT_SAMPLE_SIZE, DEFAULT_SEED,
};
use twin_store::{MemoryStore, QdrantStore, VectorStore};

#[derive(Parser)]
#[command(name = "twin", about = "CelebTwin catalog and matching CLI", version)]
struct Cli {
    /// TOML config file (defaults to $TWIN_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Hugging Face dataset named by `dataset_name`
    Hub,
    /// Local image folder laid out as <label>/<image>
    Folder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Qdrant,
    /// In-process store; nothing is persisted (dry run)
    Memory,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a sample of the celebrity dataset and upsert it into the catalog
    Ingest {
        /// Use the Qdrant Cloud endpoint instead of the local one
        #[arg(long)]
        use_qdrant_cloud: bool,

        #[arg(long, value_enum, default_value_t = SourceKind::Hub)]
        source: SourceKind,

        /// Image folder for `--source folder`
        #[arg(long, required_if_eq("source", "folder"))]
        path: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
        sample_size: usize,

        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        #[arg(long, value_enum, default_value_t = StoreKind::Qdrant)]
        store: StoreKind,
    },
    /// Find the celebrities closest to a photo
    Match {
        photo: PathBuf,

        /// Number of matches to print (defaults to `top_k`)
        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        use_qdrant_cloud: bool,
    },
    /// Print collection status as JSON
    Info {
        #[arg(long)]
        use_qdrant_cloud: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    match cli.command {
        Commands::Ingest { use_qdrant_cloud, source, path, sample_size, seed, store } => {
            let mut options = IngestOptions::from_settings(&settings)?;
            options.sample_size = sample_size;
            options.seed = seed;

            let engine = load_engine(&settings)?;
            match store {
                StoreKind::Qdrant => {
                    let store = qdrant(&settings, use_qdrant_cloud)?;
                    ingest_from(&settings, source, path.as_deref(), &store, &engine, &options).await
                }
                StoreKind::Memory => {
                    let store = MemoryStore::new();
                    ingest_from(&settings, source, path.as_deref(), &store, &engine, &options).await
                }
            }
        }
        Commands::Match { photo, top_k, use_qdrant_cloud } => {
            let bytes = std::fs::read(&photo).with_context(|| format!("reading {}", photo.display()))?;
            let mut options = MatchOptions::from_settings(&settings);
            if let Some(k) = top_k {
                options.top_k = k.max(1);
            }

            let store = qdrant(&settings, use_qdrant_cloud)?;
            let engine = load_engine(&settings)?;
            let matches = find_matches(&store, &engine, &options, bytes).await?;

            if matches.is_empty() {
                println!("No celebrity matches found!");
                return Ok(());
            }
            println!("Your Celebrity Twin is {}!", matches[0].label);
            for (rank, m) in matches.iter().enumerate() {
                println!("{:>2}. {:<32} {:.4}", rank + 1, m.label, m.score);
            }
            Ok(())
        }
        Commands::Info { use_qdrant_cloud } => {
            let store = qdrant(&settings, use_qdrant_cloud)?;
            let info = store.collection_info(&settings.collection_name).await?;
            let report = match info {
                Some(info) => serde_json::json!({
                    "url": store.base_url(),
                    "collection": info.name,
                    "exists": true,
                    "dimensions": info.dimensions,
                    "distance": info.distance,
                    "points": info.points_count,
                    "expected_dimensions": settings.vector_dimensions,
                }),
                None => serde_json::json!({
                    "url": store.base_url(),
                    "collection": settings.collection_name,
                    "exists": false,
                }),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn qdrant(settings: &Settings, use_cloud: bool) -> Result<QdrantStore> {
    let endpoint = settings.endpoint(use_cloud)?;
    Ok(QdrantStore::new(&endpoint, settings.request_timeout_secs)?)
}

fn load_engine(settings: &Settings) -> Result<EngineHandle> {
    let embedder = FaceEmbedder::load(settings).context("loading face models")?;
    Ok(spawn_engine(embedder)?)
}

async fn ingest_from<S: VectorStore>(
    settings: &Settings,
    source: SourceKind,
    path: Option<&Path>,
    store: &S,
    engine: &EngineHandle,
    options: &IngestOptions,
) -> Result<()> {
    match (source, path) {
        (SourceKind::Hub, _) => {
            let dataset = HubDataset::new(settings.dataset_name.clone(), settings.request_timeout_secs)?;
            ingest(&dataset, store, engine, options).await
        }
        (SourceKind::Folder, Some(path)) => ingest(&FolderDataset::new(path), store, engine, options).await,
        (SourceKind::Folder, None) => bail!("--source folder needs --path"),
    }
}

async fn ingest<D: DatasetSource, S: VectorStore>(
    dataset: &D,
    store: &S,
    engine: &EngineHandle,
    options: &IngestOptions,
) -> Result<()> {
    let report = run_ingest(dataset, store, engine, options).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.upserted == 0 && report.total > 0 {
        bail!("no embeddings were stored");
    }
    Ok(())
}
