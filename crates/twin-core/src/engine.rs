//! Inference engine: one OS thread owns the ONNX sessions, async callers talk
//! to it over a bounded channel.

use crate::embedder::{EmbedError, FaceEmbed};
use crate::types::FaceEmbedding;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const ENGINE_QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Embed {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<FaceEmbedding, EmbedError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode a photo and embed its strongest face.
    pub async fn embed(&self, bytes: Vec<u8>) -> Result<FaceEmbedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed { bytes, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The embedder is constructed by the caller (models loaded up front), so a
/// missing model fails before any request is accepted.
pub fn spawn_engine<E>(mut embedder: E) -> Result<EngineHandle, EngineError>
where
    E: FaceEmbed + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(ENGINE_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("twin-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Embed { bytes, reply } => {
                        let result = embedder.embed_bytes(&bytes);
                        if let Err(e) = &result {
                            tracing::debug!(error = %e, "embed request failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding};
    use image::RgbImage;

    /// Embeds the image width; images narrower than 2px have "no face".
    struct WidthEmbedder;

    impl FaceEmbed for WidthEmbedder {
        fn embed_image(&mut self, image: &RgbImage) -> Result<FaceEmbedding, EmbedError> {
            if image.width() < 2 {
                return Err(EmbedError::NoFaceDetected);
            }
            Ok(FaceEmbedding {
                face: BoundingBox {
                    x: 0.0, y: 0.0, width: 1.0, height: 1.0,
                    confidence: 0.99, landmarks: None,
                },
                embedding: Embedding::new(vec![image.width() as f32], "test"),
            })
        }
    }

    fn png(width: u32) -> Vec<u8> {
        let image = RgbImage::new(width, 3);
        let mut buf = std::io::Cursor::new(Vec::new());
        image.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn embed_round_trips_through_thread() {
        let engine = spawn_engine(WidthEmbedder).unwrap();
        let out = engine.embed(png(7)).await.unwrap();
        assert_eq!(out.embedding.values, vec![7.0]);
    }

    #[tokio::test]
    async fn no_face_reaches_caller() {
        let engine = spawn_engine(WidthEmbedder).unwrap();
        let err = engine.embed(png(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::Embed(EmbedError::NoFaceDetected)));
    }

    #[tokio::test]
    async fn garbage_bytes_are_invalid_image() {
        let engine = spawn_engine(WidthEmbedder).unwrap();
        let err = engine.embed(b"garbage".to_vec()).await.unwrap_err();
        assert!(matches!(err, EngineError::Embed(EmbedError::InvalidImage(_))));
    }

    #[tokio::test]
    async fn handles_are_cloneable_and_concurrent() {
        let engine = spawn_engine(WidthEmbedder).unwrap();
        let tasks: Vec<_> = (2..8u32)
            .map(|w| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.embed(png(w)).await.unwrap().embedding.values[0] })
            })
            .collect();

        let mut widths = Vec::new();
        for t in tasks {
            widths.push(t.await.unwrap());
        }
        assert_eq!(widths, vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }
}
