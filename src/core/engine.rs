use crate::common::{Config, Result};
use crate::core::detector::{FaceBox, FaceDetector};
use crate::core::recognizer::{Embedding, FaceRecognizer};
use image::DynamicImage;
use std::path::Path;
use std::sync::Mutex;

/// Detection and embedding, the two model calls everything else is built on.
pub trait FaceEngine: Send + Sync {
    /// Faces sorted by descending detector confidence, in image coordinates.
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>>;

    fn embed(&self, image: &DynamicImage, face: &FaceBox) -> Result<Embedding>;
}

/// ONNX Runtime backed engine. Sessions are serialized behind mutexes so the
/// camera thread and HTTP uploads can share one instance.
pub struct OnnxFaceEngine {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl OnnxFaceEngine {
    pub fn new(config: &Config, models_dir: &Path) -> Result<Self> {
        Ok(Self {
            detector: Mutex::new(FaceDetector::new(config, models_dir)?),
            recognizer: Mutex::new(FaceRecognizer::new(config, models_dir)?),
        })
    }
}

impl FaceEngine for OnnxFaceEngine {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let detector = self.detector.lock().map_err(|_| poisoned("detector"))?;
        detector.detect(image)
    }

    fn embed(&self, image: &DynamicImage, face: &FaceBox) -> Result<Embedding> {
        let recognizer = self.recognizer.lock().map_err(|_| poisoned("recognizer"))?;
        recognizer.get_embedding(image, face)
    }
}

fn poisoned(what: &str) -> crate::common::AttendanceError {
    crate::common::AttendanceError::Model(format!("{} lock poisoned", what))
}
