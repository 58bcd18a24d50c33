use crate::error::StoreError;
use crate::schema::{CollectionInfo, Point, ScoredPoint, SearchQuery};
use std::future::Future;

/// A vector database holding celebrity face embeddings.
///
/// All collections are cosine-distance; a collection of the wrong shape is an
/// error rather than something to write into.
pub trait VectorStore: Send + Sync {
    /// Create `name` with `dimensions`-sized cosine vectors if it is missing.
    ///
    /// Returns `true` when the collection was created by this call.
    fn ensure_collection(
        &self,
        name: &str,
        dimensions: usize,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Insert or replace points by ID.
    fn upsert(&self, name: &str, points: &[Point]) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Top-`limit` points by cosine similarity, best first.
    fn search(
        &self,
        name: &str,
        query: &SearchQuery,
    ) -> impl Future<Output = Result<Vec<ScoredPoint>, StoreError>> + Send;

    /// `None` when the collection does not exist.
    fn collection_info(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<CollectionInfo>, StoreError>> + Send;
}
