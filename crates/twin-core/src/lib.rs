//! twin-core — face detection, embedding and shared settings for CelebTwin.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime on the CPU.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod engine;
pub mod recognizer;
pub mod settings;
pub mod types;

pub use detector::FaceDetector;
pub use embedder::{decode_image, EmbedError, FaceEmbed, FaceEmbedder};
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use recognizer::{FaceRecognizer, ARCFACE_EMBEDDING_DIM, ARCFACE_MODEL_VERSION};
pub use settings::{Endpoint, Settings, SettingsError};
pub use types::{BoundingBox, Embedding, FaceEmbedding, FaceMatch};
