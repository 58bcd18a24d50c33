use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>, model_version: impl Into<String>) -> Self {
        Self {
            values,
            model_version: Some(model_version.into()),
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Returns 0.0 when either vector has zero norm.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        cosine_similarity(&self.values, &other.values)
    }

    /// Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Return a copy scaled to unit length. Zero vectors are returned unchanged.
    pub fn l2_normalized(&self) -> Embedding {
        Embedding {
            values: l2_normalize(&self.values),
            model_version: self.model_version.clone(),
        }
    }
}

/// Cosine similarity of two raw vectors. Mismatched lengths compare the common prefix.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

pub fn l2_normalize(values: &[f32]) -> Vec<f32> {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter().map(|x| x / norm).collect()
    } else {
        values.to_vec()
    }
}

/// A detected face together with its embedding.
#[derive(Debug, Clone)]
pub struct FaceEmbedding {
    pub face: BoundingBox,
    pub embedding: Embedding,
}

/// One nearest-neighbour hit from the celebrity catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub label: String,
    /// Cosine similarity reported by the vector store.
    pub score: f32,
    pub point_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding { values: values.to_vec(), model_version: None }
    }

    #[test]
    fn similarity_reference_angles() {
        let cases: &[(&[f32], &[f32], f32)] = &[
            (&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0], 1.0),
            (&[1.0, 0.0], &[0.0, 1.0], 0.0),
            (&[1.0, 0.0], &[-1.0, 0.0], -1.0),
            (&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0], 1.0),
        ];
        for (a, b, want) in cases {
            let got = emb(a).similarity(&emb(b));
            assert!((got - want).abs() < 1e-6, "{a:?} vs {b:?}: {got}");
        }
    }

    #[test]
    fn similarity_with_zero_vector_is_zero() {
        assert_eq!(emb(&[0.0, 0.0]).similarity(&emb(&[1.0, 0.0])), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn euclidean_distance_345() {
        assert!((emb(&[0.0, 0.0]).euclidean_distance(&emb(&[3.0, 4.0])) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalized_keeps_version() {
        let e = Embedding::new(vec![3.0, 4.0], "w600k_r50").l2_normalized();
        assert!((e.values[0] - 0.6).abs() < 1e-6 && (e.values[1] - 0.8).abs() < 1e-6);
        assert_eq!(e.model_version.as_deref(), Some("w600k_r50"));
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
