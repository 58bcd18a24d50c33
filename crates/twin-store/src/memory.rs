//! In-process vector store with exact cosine search.

use crate::error::StoreError;
use crate::schema::{
    validate_collection_name, validate_vector, CollectionInfo, Distance, Point, ScoredPoint, SearchQuery,
};
use crate::store::VectorStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use twin_core::types::cosine_similarity;

struct Collection {
    dimensions: usize,
    points: BTreeMap<String, Point>,
}

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, name: &str, dimensions: usize) -> Result<bool, StoreError> {
        validate_collection_name(name)?;
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = collections.get(name) {
            if existing.dimensions != dimensions {
                return Err(StoreError::DimensionMismatch {
                    collection: name.to_string(),
                    expected: dimensions,
                    actual: existing.dimensions,
                });
            }
            return Ok(false);
        }

        collections.insert(
            name.to_string(),
            Collection { dimensions, points: BTreeMap::new() },
        );
        tracing::info!(collection = name, dimensions, "created in-memory collection");
        Ok(true)
    }

    async fn upsert(&self, name: &str, points: &[Point]) -> Result<(), StoreError> {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;

        for point in points {
            validate_vector(&point.vector, Some(collection.dimensions))?;
        }
        for point in points {
            collection.points.insert(point.id.clone(), point.clone());
        }
        Ok(())
    }

    async fn search(&self, name: &str, query: &SearchQuery) -> Result<Vec<ScoredPoint>, StoreError> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let collection = collections
            .get(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;

        validate_vector(&query.vector, Some(collection.dimensions))?;
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<ScoredPoint> = collection
            .points
            .values()
            .filter(|p| query.filter.matches(&p.payload))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(&query.vector, &p.vector),
                payload: p.payload.clone(),
            })
            .filter(|hit| query.score_threshold.map_or(true, |t| hit.score >= t))
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        Ok(collections.get(name).map(|c| CollectionInfo {
            name: name.to_string(),
            dimensions: c.dimensions,
            distance: Distance::Cosine,
            points_count: c.points.len() as u64,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FacePayload, PayloadFilter};

    fn point(id: &str, label: &str, vector: Vec<f32>) -> Point {
        Point {
            id: id.into(),
            vector,
            payload: FacePayload::new(label, "w600k_r50", "test"),
        }
    }

    fn query(vector: Vec<f32>, limit: usize) -> SearchQuery {
        SearchQuery {
            vector,
            limit,
            filter: PayloadFilter::compatible_with("w600k_r50"),
            score_threshold: None,
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.ensure_collection("celebrities", 3).await.unwrap();
        store
            .upsert(
                "celebrities",
                &[
                    point("1", "Brad Pitt", vec![1.0, 0.0, 0.0]),
                    point("2", "Angelina Jolie", vec![0.0, 1.0, 0.0]),
                    point("3", "Keanu Reeves", vec![0.7, 0.7, 0.0]),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn ensure_collection_is_idempotent() {
        let store = MemoryStore::new();
        assert!(store.ensure_collection("celebrities", 512).await.unwrap());
        assert!(!store.ensure_collection("celebrities", 512).await.unwrap());
    }

    #[tokio::test]
    async fn ensure_collection_rejects_dimension_change() {
        let store = MemoryStore::new();
        store.ensure_collection("celebrities", 512).await.unwrap();
        let err = store.ensure_collection("celebrities", 128).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 128, actual: 512, .. }));
    }

    #[tokio::test]
    async fn search_orders_by_similarity() {
        let store = seeded().await;
        let hits = store.search("celebrities", &query(vec![0.9, 0.1, 0.0], 3)).await.unwrap();
        let labels: Vec<_> = hits.iter().map(|h| h.payload.label.as_str()).collect();
        assert_eq!(labels, vec!["Brad Pitt", "Keanu Reeves", "Angelina Jolie"]);
        assert!(hits[0].score >= hits[1].score && hits[1].score >= hits[2].score);
    }

    #[tokio::test]
    async fn search_respects_limit_and_threshold() {
        let store = seeded().await;
        let top1 = store.search("celebrities", &query(vec![0.0, 1.0, 0.0], 1)).await.unwrap();
        assert_eq!(top1.len(), 1);
        assert_eq!(top1[0].payload.label, "Angelina Jolie");

        let mut q = query(vec![1.0, 0.0, 0.0], 10);
        q.score_threshold = Some(0.5);
        let hits = store.search("celebrities", &q).await.unwrap();
        assert_eq!(hits.len(), 2);

        assert!(store.search("celebrities", &query(vec![1.0, 0.0, 0.0], 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_skips_other_model_versions() {
        let store = seeded().await;
        let mut legacy = point("4", "Old Model", vec![1.0, 0.0, 0.0]);
        legacy.payload.model_version = "vggface2".into();
        store.upsert("celebrities", &[legacy]).await.unwrap();

        let hits = store.search("celebrities", &query(vec![1.0, 0.0, 0.0], 10)).await.unwrap();
        assert!(hits.iter().all(|h| h.payload.label != "Old Model"));
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = seeded().await;
        store
            .upsert("celebrities", &[point("1", "Brad Pitt (2)", vec![0.0, 0.0, 1.0])])
            .await
            .unwrap();
        let info = store.collection_info("celebrities").await.unwrap().unwrap();
        assert_eq!(info.points_count, 3);

        let hits = store.search("celebrities", &query(vec![0.0, 0.0, 1.0], 1)).await.unwrap();
        assert_eq!(hits[0].payload.label, "Brad Pitt (2)");
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension_atomically() {
        let store = seeded().await;
        let err = store
            .upsert(
                "celebrities",
                &[point("9", "Fine", vec![1.0, 0.0, 0.0]), point("10", "Bad", vec![1.0])],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidVector(_)));
        let info = store.collection_info("celebrities").await.unwrap().unwrap();
        assert_eq!(info.points_count, 3);
    }

    #[tokio::test]
    async fn missing_collection() {
        let store = MemoryStore::new();
        assert!(store.collection_info("nope").await.unwrap().is_none());
        let err = store.search("nope", &query(vec![1.0], 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound(_)));
    }
}
