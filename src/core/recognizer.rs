use crate::common::config::{Config, RecognizerConfig};
use crate::common::Result;
use crate::core::detector::FaceBox;
use crate::core::onnx;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, Session, Value};
use std::path::Path;
use std::sync::Arc;

pub type Embedding = Vec<f32>;

/// Face embedding model (ArcFace-style ONNX export).
pub struct FaceRecognizer {
    session: Session,
    _environment: Arc<Environment>,
    config: RecognizerConfig,
}

impl FaceRecognizer {
    pub fn new(config: &Config, models_dir: &Path) -> Result<Self> {
        let model_path = onnx::resolve_model_path(&config.models.recognizer_path, models_dir);
        let (environment, session) = onnx::load_session(
            "face_recognizer",
            &model_path,
            config.performance.optimization_level,
        )?;

        Ok(Self {
            session,
            _environment: environment,
            config: config.recognizer.clone(),
        })
    }

    pub fn get_embedding(&self, image: &DynamicImage, face: &FaceBox) -> Result<Embedding> {
        let face_img = crop_face(image, face);
        let size = self.config.input_size;
        let resized = face_img.resize_exact(size, size, FilterType::Triangle);

        let input_array = preprocess_face(&resized, &self.config);
        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;

        let outputs = self.session.run(vec![input_tensor])?;
        let raw = outputs[0].try_extract::<f32>()?.view().to_owned().into_raw_vec();

        Ok(l2_normalize(raw))
    }
}

/// Crop with the box clamped to the image; a degenerate box yields a 1x1 crop.
pub fn crop_face(image: &DynamicImage, face: &FaceBox) -> DynamicImage {
    let max_x = image.width().saturating_sub(1) as f32;
    let max_y = image.height().saturating_sub(1) as f32;
    let x = face.x1.clamp(0.0, max_x) as u32;
    let y = face.y1.clamp(0.0, max_y) as u32;
    let width = ((face.x2 - face.x1).max(1.0) as u32).min(image.width() - x).max(1);
    let height = ((face.y2 - face.y1).max(1.0) as u32).min(image.height() - y).max(1);

    image.crop_imm(x, y, width, height)
}

fn preprocess_face(img: &DynamicImage, config: &RecognizerConfig) -> Array4<f32> {
    let size = config.input_size as usize;
    let norm = config.normalization_value;

    if config.grayscale {
        let gray = img.to_luma8();
        let mut array = Array4::<f32>::zeros((1, 1, size, size));
        for (x, y, pixel) in gray.enumerate_pixels() {
            array[[0, 0, y as usize, x as usize]] = (pixel[0] as f32 - norm) / norm;
        }
        array
    } else {
        let rgb = img.to_rgb8();
        let mut array = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                array[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - norm) / norm;
            }
        }
        array
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn l2_normalize(mut v: Embedding) -> Embedding {
    let norm = l2_norm(&v);
    if norm > 0.0 {
        for value in &mut v {
            *value /= norm;
        }
    }
    v
}

pub fn average_embeddings(embeddings: &[Embedding]) -> Embedding {
    let Some(first) = embeddings.first() else {
        return vec![];
    };

    let mut averaged = vec![0.0f32; first.len()];
    for embedding in embeddings {
        for (slot, &value) in averaged.iter_mut().zip(embedding) {
            *slot += value;
        }
    }

    let count = embeddings.len() as f32;
    for value in &mut averaged {
        *value /= count;
    }
    averaged
}
