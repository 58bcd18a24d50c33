//! twin-store — where CelebTwin keeps its celebrity face vectors.
//!
//! [`VectorStore`] is the seam; [`QdrantStore`] talks to a local or cloud
//! Qdrant over REST and [`MemoryStore`] keeps everything in process for tests
//! and dry runs.

pub mod error;
pub mod memory;
pub mod qdrant;
pub mod retry;
pub mod schema;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use qdrant::QdrantStore;
pub use retry::{with_backoff, RetryPolicy};
pub use schema::{
    point_id, CollectionInfo, Distance, FacePayload, PayloadFilter, Point, ScoredPoint,
    SearchQuery, SCHEMA_VERSION,
};
pub use store::VectorStore;

/// Upsert one batch, retrying transient failures per `policy`.
pub async fn upsert_with_retry<S: VectorStore>(
    store: &S,
    policy: &RetryPolicy,
    collection: &str,
    points: &[Point],
) -> Result<(), StoreError> {
    with_backoff(policy, "upsert", || store.upsert(collection, points)).await
}
