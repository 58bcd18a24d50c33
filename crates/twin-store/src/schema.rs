//! What a stored celebrity face looks like inside the vector database.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bumped whenever the stored embedding format changes (preprocessing,
/// normalisation, payload layout). Searches only consider points carrying
/// the current value.
pub const SCHEMA_VERSION: u32 = 1;

/// Metadata stored next to every vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacePayload {
    pub label: String,
    pub model_version: String,
    pub schema_version: u32,
    /// Where the image came from (dataset name + row, or a file path).
    pub source: String,
    /// RFC 3339 timestamp of ingestion.
    pub ingested_at: String,
}

impl FacePayload {
    pub fn new(label: impl Into<String>, model_version: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            model_version: model_version.into(),
            schema_version: SCHEMA_VERSION,
            source: source.into(),
            ingested_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A vector ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: FacePayload,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: FacePayload,
}

/// Exact-match constraints on the payload; every set field must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadFilter {
    pub model_version: Option<String>,
    pub schema_version: Option<u32>,
    pub label: Option<String>,
}

impl PayloadFilter {
    /// Only vectors produced by `model_version` under the current schema.
    pub fn compatible_with(model_version: impl Into<String>) -> Self {
        Self {
            model_version: Some(model_version.into()),
            schema_version: Some(SCHEMA_VERSION),
            label: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.model_version.is_none() && self.schema_version.is_none() && self.label.is_none()
    }

    pub fn matches(&self, payload: &FacePayload) -> bool {
        self.model_version.as_ref().map_or(true, |v| *v == payload.model_version)
            && self.schema_version.map_or(true, |v| v == payload.schema_version)
            && self.label.as_ref().map_or(true, |v| *v == payload.label)
    }
}

/// Nearest-neighbour query.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub vector: Vec<f32>,
    pub limit: usize,
    pub filter: PayloadFilter,
    pub score_threshold: Option<f32>,
}

/// Distance metric of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
    Euclid,
    Dot,
    Manhattan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub dimensions: usize,
    pub distance: Distance,
    pub points_count: u64,
}

/// Content-addressed point ID: the same labelled image always maps to the same ID,
/// so re-ingesting a dataset overwrites instead of duplicating.
pub fn point_id(label: &str, image_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(label.as_bytes());
    hasher.update([0u8]);
    hasher.update(image_bytes);
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
}

/// Reject vectors the database would refuse or that would poison cosine search.
pub fn validate_vector(vector: &[f32], expected_dim: Option<usize>) -> Result<(), crate::StoreError> {
    if vector.is_empty() {
        return Err(crate::StoreError::InvalidVector("empty vector".into()));
    }
    if let Some(dim) = expected_dim {
        if vector.len() != dim {
            return Err(crate::StoreError::InvalidVector(format!(
                "expected {dim} dimensions, got {}",
                vector.len()
            )));
        }
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(crate::StoreError::InvalidVector("non-finite component".into()));
    }
    Ok(())
}

/// Collection names end up in URL paths.
pub fn validate_collection_name(name: &str) -> Result<(), crate::StoreError> {
    let ok = !name.is_empty()
        && name.len() <= 255
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(crate::StoreError::InvalidCollectionName(name.to_string()))
    }
}
