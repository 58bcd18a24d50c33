//! Photo → face embedding: decode, detect, pick the strongest face, embed.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::settings::Settings;
use crate::types::FaceEmbedding;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Anything that can turn a photo into a face embedding.
///
/// Implemented by [`FaceEmbedder`] for real inference; tests substitute
/// deterministic stand-ins.
pub trait FaceEmbed {
    fn embed_image(&mut self, image: &RgbImage) -> Result<FaceEmbedding, EmbedError>;

    /// Decode encoded photo bytes and embed the strongest face.
    fn embed_bytes(&mut self, bytes: &[u8]) -> Result<FaceEmbedding, EmbedError> {
        let image = decode_image(bytes)?;
        self.embed_image(&image)
    }
}

/// Decode JPEG/PNG/WebP/BMP bytes into an RGB image.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, EmbedError> {
    if bytes.is_empty() {
        return Err(EmbedError::InvalidImage("empty input".into()));
    }
    let image = image::load_from_memory(bytes).map_err(|e| EmbedError::InvalidImage(e.to_string()))?;
    Ok(image.to_rgb8())
}

/// SCRFD detector + ArcFace recognizer.
pub struct FaceEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceEmbedder {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }

    /// Load both ONNX models from the configured model directory.
    pub fn load(settings: &Settings) -> Result<Self, EmbedError> {
        let scrfd = settings.scrfd_model_path();
        let arcface = settings.arcface_model_path();

        let detector = FaceDetector::load(&scrfd)?;
        tracing::info!(path = %scrfd, "SCRFD detector loaded");

        let recognizer = FaceRecognizer::load(&arcface)?;
        tracing::info!(path = %arcface, "ArcFace recognizer loaded");

        Ok(Self::new(detector, recognizer))
    }
}

impl FaceEmbed for FaceEmbedder {
    fn embed_image(&mut self, image: &RgbImage) -> Result<FaceEmbedding, EmbedError> {
        let faces = self.detector.detect(image)?;
        let face = faces.into_iter().next().ok_or(EmbedError::NoFaceDetected)?;

        tracing::debug!(
            confidence = face.confidence,
            x = face.x,
            y = face.y,
            width = face.width,
            height = face.height,
            "embedding strongest face"
        );

        let embedding = self.recognizer.extract(image, &face)?;
        Ok(FaceEmbedding { face, embedding })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding};
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    struct MeanColour;

    impl FaceEmbed for MeanColour {
        fn embed_image(&mut self, image: &RgbImage) -> Result<FaceEmbedding, EmbedError> {
            let p = image.get_pixel(0, 0);
            Ok(FaceEmbedding {
                face: BoundingBox {
                    x: 0.0, y: 0.0,
                    width: image.width() as f32, height: image.height() as f32,
                    confidence: 1.0, landmarks: None,
                },
                embedding: Embedding::new(vec![p[0] as f32, p[1] as f32, p[2] as f32], "test"),
            })
        }
    }

    fn png_bytes(colour: [u8; 3]) -> Vec<u8> {
        let image = RgbImage::from_pixel(4, 4, Rgb(colour));
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn decode_png_to_rgb() {
        let image = decode_image(&png_bytes([10, 20, 30])).unwrap();
        assert_eq!(image.dimensions(), (4, 4));
        assert_eq!(*image.get_pixel(3, 3), Rgb([10, 20, 30]));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode_image(b"not an image"), Err(EmbedError::InvalidImage(_))));
        assert!(matches!(decode_image(&[]), Err(EmbedError::InvalidImage(_))));
    }

    #[test]
    fn embed_bytes_decodes_then_embeds() {
        let out = MeanColour.embed_bytes(&png_bytes([1, 2, 3])).unwrap();
        assert_eq!(out.embedding.values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn load_reports_missing_models() {
        let mut settings = Settings::default();
        settings.model_dir = "/nonexistent/celebtwin".into();
        let err = FaceEmbedder::load(&settings).err().unwrap();
        assert!(matches!(err, EmbedError::Detector(DetectorError::ModelNotFound(_))));
    }
}
