//! Embedding extraction seam.
//!
//! Reconciliation and matching only see [`FaceExtractor`]; the ONNX pipeline
//! (SCRFD detection → alignment → ArcFace) is one implementation of it.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Detection;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Finds faces in an image and produces one embedding per face.
pub trait FaceExtractor {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, ExtractError>;
}

/// SCRFD + ArcFace extractor backed by ONNX Runtime.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceExtractor for OnnxExtractor {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, ExtractError> {
        let faces = self.detector.detect(image)?;
        tracing::debug!(faces = faces.len(), "detected faces");

        faces
            .into_iter()
            .map(|region| {
                let embedding = self.recognizer.extract(image, &region)?;
                Ok(Detection { region, embedding })
            })
            .collect()
    }
}

impl<T: FaceExtractor + ?Sized> FaceExtractor for &mut T {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, ExtractError> {
        (**self).detect(image)
    }
}
