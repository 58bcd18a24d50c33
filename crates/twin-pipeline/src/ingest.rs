//! The one ingestion pipeline: list → sample → ensure collection → embed →
//! batched upsert with retry.

use crate::dataset::{sample, DatasetError, DatasetSource, DEFAULT_SAMPLE_SIZE, DEFAULT_SEED};
use serde::Serialize;
use thiserror::Error;
use twin_core::{EmbedError, EngineError, EngineHandle, Settings, ARCFACE_EMBEDDING_DIM, ARCFACE_MODEL_VERSION};
use twin_store::{point_id, upsert_with_retry, FacePayload, Point, RetryPolicy, StoreError, VectorStore};

const PROGRESS_EVERY: usize = 100;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("dataset: {0}")]
    Dataset(#[from] DatasetError),
    #[error("vector store: {0}")]
    Store(#[from] StoreError),
    #[error("inference engine stopped")]
    EngineStopped,
    #[error("collection is configured for {configured}-dim vectors but the model produces {produced}")]
    DimensionMismatch { configured: usize, produced: usize },
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub collection: String,
    pub dimensions: usize,
    pub sample_size: usize,
    pub seed: u64,
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// Recorded in payloads when the engine does not report one.
    pub model_version: String,
}

impl IngestOptions {
    /// Options for the ArcFace engine; refuses a `vector_dimensions` the model cannot fill.
    pub fn from_settings(settings: &Settings) -> Result<Self, IngestError> {
        if settings.vector_dimensions != ARCFACE_EMBEDDING_DIM {
            return Err(IngestError::DimensionMismatch {
                configured: settings.vector_dimensions,
                produced: ARCFACE_EMBEDDING_DIM,
            });
        }
        Ok(Self {
            collection: settings.collection_name.clone(),
            dimensions: settings.vector_dimensions,
            sample_size: DEFAULT_SAMPLE_SIZE,
            seed: DEFAULT_SEED,
            batch_size: settings.upsert_batch_size.max(1),
            retry: RetryPolicy::new(settings.upsert_max_retries, settings.upsert_backoff_ms),
            model_version: ARCFACE_MODEL_VERSION.to_string(),
        })
    }
}

/// What happened to every sampled row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Rows selected by sampling.
    pub total: usize,
    pub embedded: usize,
    pub skipped_no_face: usize,
    /// Download, decode or inference failures.
    pub failed_embed: usize,
    pub upserted: usize,
    /// Points in batches that failed after every retry.
    pub failed_upsert: usize,
    pub collection_created: bool,
}

struct Batcher<'a, S> {
    store: &'a S,
    options: &'a IngestOptions,
    pending: Vec<Point>,
}

impl<S: VectorStore> Batcher<'_, S> {
    async fn push(&mut self, point: Point, report: &mut IngestReport) {
        self.pending.push(point);
        if self.pending.len() >= self.options.batch_size {
            self.flush(report).await;
        }
    }

    async fn flush(&mut self, report: &mut IngestReport) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        match upsert_with_retry(self.store, &self.options.retry, &self.options.collection, &batch).await {
            Ok(()) => report.upserted += batch.len(),
            Err(e) => {
                tracing::error!(
                    collection = %self.options.collection,
                    points = batch.len(),
                    error = %e,
                    "batch upsert failed after retries"
                );
                report.failed_upsert += batch.len();
            }
        }
    }
}

/// Run one ingestion.
///
/// Per-row problems (no face, bad download, failed batch) are counted in the
/// report; only an unreadable dataset, an unusable collection or a dead
/// engine abort the run.
pub async fn run_ingest<D, S>(
    source: &D,
    store: &S,
    engine: &EngineHandle,
    options: &IngestOptions,
) -> Result<IngestReport, IngestError>
where
    D: DatasetSource,
    S: VectorStore,
{
    let entries = source.list().await?;
    let listed = entries.len();
    let selected = sample(entries, options.sample_size, options.seed);
    tracing::info!(
        dataset = source.name(),
        listed,
        sampled = selected.len(),
        seed = options.seed,
        "sampled dataset"
    );

    let mut report = IngestReport {
        total: selected.len(),
        collection_created: store.ensure_collection(&options.collection, options.dimensions).await?,
        ..Default::default()
    };

    let mut batcher = Batcher {
        store,
        options,
        pending: Vec::with_capacity(options.batch_size),
    };

    for (n, entry) in selected.iter().enumerate() {
        if n > 0 && n % PROGRESS_EVERY == 0 {
            tracing::info!(
                processed = n,
                total = report.total,
                embedded = report.embedded,
                skipped_no_face = report.skipped_no_face,
                "ingest progress"
            );
        }

        let row = match source.fetch(entry).await {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(index = entry.index, label = %entry.label, error = %e, "failed to fetch image");
                report.failed_embed += 1;
                continue;
            }
        };

        let id = point_id(&row.label, &row.bytes);
        let face = match engine.embed(row.bytes).await {
            Ok(face) => face,
            Err(EngineError::ChannelClosed) => return Err(IngestError::EngineStopped),
            Err(EngineError::Embed(EmbedError::NoFaceDetected)) => {
                tracing::debug!(index = row.index, label = %row.label, "no face detected, skipping");
                report.skipped_no_face += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(index = row.index, label = %row.label, error = %e, "failed to embed image");
                report.failed_embed += 1;
                continue;
            }
        };
        // The first embedding settles whether the collection can hold them at all.
        if report.embedded == 0 && face.embedding.values.len() != options.dimensions {
            return Err(IngestError::DimensionMismatch {
                configured: options.dimensions,
                produced: face.embedding.values.len(),
            });
        }
        report.embedded += 1;

        let model_version = face
            .embedding
            .model_version
            .unwrap_or_else(|| options.model_version.clone());
        let point = Point {
            id,
            vector: face.embedding.values,
            payload: FacePayload::new(row.label, model_version, row.origin),
        };
        batcher.push(point, &mut report).await;
    }
    batcher.flush(&mut report).await;

    tracing::info!(
        collection = %options.collection,
        total = report.total,
        embedded = report.embedded,
        skipped_no_face = report.skipped_no_face,
        failed_embed = report.failed_embed,
        upserted = report.upserted,
        failed_upsert = report.failed_upsert,
        "ingest finished"
    );
    Ok(report)
}
