//! Photo → closest celebrities. Shared by the web server and the CLI.

use thiserror::Error;
use twin_core::{EngineError, EngineHandle, FaceMatch, Settings, ARCFACE_MODEL_VERSION};
use twin_store::{PayloadFilter, SearchQuery, StoreError, VectorStore};

#[derive(Error, Debug)]
pub enum MatchError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct MatchOptions {
    pub collection: String,
    pub top_k: usize,
    /// Hits below this cosine similarity are dropped. No floor when unset.
    pub min_score: Option<f32>,
    /// Used when the engine does not tag its embeddings.
    pub model_version: String,
}

impl MatchOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            collection: settings.collection_name.clone(),
            top_k: settings.top_k.max(1),
            min_score: settings.min_score,
            model_version: ARCFACE_MODEL_VERSION.to_string(),
        }
    }
}

/// Embed the strongest face in `photo` and return the nearest catalog
/// entries, best first. Only vectors from the same model and schema are
/// considered; an empty result means nothing compatible was close enough.
pub async fn find_matches<S: VectorStore>(
    store: &S,
    engine: &EngineHandle,
    options: &MatchOptions,
    photo: Vec<u8>,
) -> Result<Vec<FaceMatch>, MatchError> {
    let face = engine.embed(photo).await?;
    let model_version = face
        .embedding
        .model_version
        .unwrap_or_else(|| options.model_version.clone());

    let query = SearchQuery {
        vector: face.embedding.values,
        limit: options.top_k,
        filter: PayloadFilter::compatible_with(model_version),
        score_threshold: options.min_score,
    };
    let hits = store.search(&options.collection, &query).await?;

    tracing::debug!(
        collection = %options.collection,
        hits = hits.len(),
        best = hits.first().map(|h| h.score),
        "catalog search"
    );

    Ok(hits
        .into_iter()
        .map(|h| FaceMatch { label: h.payload.label, score: h.score, point_id: h.id })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use twin_core::{spawn_engine, BoundingBox, EmbedError, Embedding, FaceEmbed, FaceEmbedding};
    use twin_store::{FacePayload, MemoryStore, Point};

    struct ColourEmbedder;

    impl FaceEmbed for ColourEmbedder {
        fn embed_image(&mut self, image: &RgbImage) -> Result<FaceEmbedding, EmbedError> {
            let p = image.get_pixel(0, 0);
            if p.0 == [0, 0, 0] {
                return Err(EmbedError::NoFaceDetected);
            }
            Ok(FaceEmbedding {
                face: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 2.0,
                    height: 2.0,
                    confidence: 0.9,
                    landmarks: None,
                },
                embedding: Embedding::new(vec![p[0] as f32, p[1] as f32, p[2] as f32], "stub-v1"),
            })
        }
    }

    fn png(colour: [u8; 3]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        RgbImage::from_pixel(2, 2, Rgb(colour)).write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    async fn catalog() -> MemoryStore {
        let store = MemoryStore::new();
        store.ensure_collection("celebrities", 3).await.unwrap();
        let point = |id: &str, label: &str, v: Vec<f32>, model: &str| Point {
            id: id.into(),
            vector: v,
            payload: FacePayload::new(label, model, "test"),
        };
        store
            .upsert(
                "celebrities",
                &[
                    point("1", "Brad Pitt", vec![1.0, 0.0, 0.0], "stub-v1"),
                    point("2", "Angelina Jolie", vec![0.0, 1.0, 0.0], "stub-v1"),
                    point("3", "Old Brad", vec![1.0, 0.0, 0.0], "stub-v0"),
                ],
            )
            .await
            .unwrap();
        store
    }

    fn options(top_k: usize, min_score: Option<f32>) -> MatchOptions {
        MatchOptions {
            collection: "celebrities".into(),
            top_k,
            min_score,
            model_version: ARCFACE_MODEL_VERSION.into(),
        }
    }

    #[tokio::test]
    async fn best_match_first_and_other_models_ignored() {
        let store = catalog().await;
        let engine = spawn_engine(ColourEmbedder).unwrap();

        let matches = find_matches(&store, &engine, &options(5, None), png([250, 20, 0])).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].label, "Brad Pitt");
        assert_eq!(matches[0].point_id, "1");
        assert!(matches[0].score > matches[1].score);
    }

    #[tokio::test]
    async fn min_score_can_empty_the_result() {
        let store = catalog().await;
        let engine = spawn_engine(ColourEmbedder).unwrap();

        let matches = find_matches(&store, &engine, &options(5, Some(0.99)), png([10, 10, 250])).await.unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn no_face_is_reported() {
        let store = catalog().await;
        let engine = spawn_engine(ColourEmbedder).unwrap();

        let err = find_matches(&store, &engine, &options(1, None), png([0, 0, 0])).await.unwrap_err();
        assert!(matches!(err, MatchError::Engine(EngineError::Embed(EmbedError::NoFaceDetected))));
    }
}
