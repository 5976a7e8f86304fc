use crate::common::config::{Config, DetectorConfig};
use crate::common::Result;
use crate::core::onnx;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, Session, Value};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Smallest box side (in model input pixels) kept after decoding
const MIN_BOX_SIDE: f32 = 10.0;

/// Scores below this are dropped before NMS
const PRE_NMS_FLOOR: f32 = 0.001;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
            confidence: self.confidence,
        }
    }
}

/// YOLOv8-face detector.
pub struct FaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    config: DetectorConfig,
}

impl FaceDetector {
    pub fn new(config: &Config, models_dir: &Path) -> Result<Self> {
        let model_path = onnx::resolve_model_path(&config.models.detector_path, models_dir);
        let (environment, session) = onnx::load_session(
            "face_detector",
            &model_path,
            config.performance.optimization_level,
        )?;

        Ok(Self {
            session,
            _environment: environment,
            config: config.detector.clone(),
        })
    }

    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;
        let input_w = self.config.input_width;
        let input_h = self.config.input_height;

        let img_array = if image.width() == input_w && image.height() == input_h {
            image_to_array(image)
        } else {
            let resized = image.resize_exact(input_w, input_h, FilterType::Nearest);
            image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let Some(first) = outputs.first() else {
            return Ok(Vec::new());
        };
        let output = first.try_extract::<f32>()?.view().to_owned();
        let shape = output.shape().to_vec();
        let data: Vec<f32> = output.iter().copied().collect();

        let candidates = decode_predictions(&data, &shape, input_w as f32, input_h as f32);
        let faces = filter_detections(candidates, &self.config);

        let scale_x = orig_width / input_w as f32;
        let scale_y = orig_height / input_h as f32;
        Ok(faces.iter().map(|f| f.scaled(scale_x, scale_y)).collect())
    }
}

fn image_to_array(img: &DynamicImage) -> Array4<f32> {
    let rgb = img.to_rgb8();
    let width = img.width() as usize;
    let height = img.height() as usize;
    let mut array = Array4::<f32>::zeros((1, 3, height, width));

    let norm_factor = 1.0 / 255.0;
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        array[[0, 0, y, x]] = pixel[0] as f32 * norm_factor;
        array[[0, 1, y, x]] = pixel[1] as f32 * norm_factor;
        array[[0, 2, y, x]] = pixel[2] as f32 * norm_factor;
    }

    array
}

/// Decode raw YOLO output into boxes in model input coordinates.
///
/// Accepts `[1, N, 5+]`, the transposed `[1, 5+, N]` layout, or a flat
/// `[N, 5+]`. Each prediction is `[cx, cy, w, h, score, ...]`; coordinates in
/// `[0, 1]` are treated as normalized.
pub fn decode_predictions(data: &[f32], shape: &[usize], input_w: f32, input_h: f32) -> Vec<FaceBox> {
    let (num_predictions, prediction_length, is_transposed) = match shape {
        [_, a, b] if b > a && *a <= 20 => (*b, *a, true),
        [_, a, b] => (*a, *b, false),
        [a, b] => (*a, *b, false),
        _ => {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Vec::new();
        }
    };

    if prediction_length < 5 || data.len() < num_predictions * prediction_length {
        tracing::warn!("Detector output too small for shape {:?}", shape);
        return Vec::new();
    }

    let at = |i: usize, field: usize| -> f32 {
        if is_transposed {
            data[field * num_predictions + i]
        } else {
            data[i * prediction_length + field]
        }
    };

    let mut faces = Vec::new();
    for i in 0..num_predictions {
        let confidence = at(i, 4);
        if confidence <= PRE_NMS_FLOOR {
            continue;
        }

        let (mut cx, mut cy, mut w, mut h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        if cx <= 1.0 && cy <= 1.0 && w <= 1.0 && h <= 1.0 {
            cx *= input_w;
            w *= input_w;
            cy *= input_h;
            h *= input_h;
        }

        let x1 = (cx - w / 2.0).max(0.0);
        let y1 = (cy - h / 2.0).max(0.0);
        let x2 = (cx + w / 2.0).min(input_w);
        let y2 = (cy + h / 2.0).min(input_h);

        if x2 - x1 > MIN_BOX_SIDE && y2 - y1 > MIN_BOX_SIDE {
            faces.push(FaceBox { x1, y1, x2, y2, confidence });
        }
    }

    faces
}

/// NMS over all candidates first, then the confidence cut, then the cap.
pub fn filter_detections(candidates: Vec<FaceBox>, config: &DetectorConfig) -> Vec<FaceBox> {
    let mut faces = non_max_suppression(candidates, config.iou_threshold);
    faces.retain(|f| f.confidence >= config.confidence_threshold);
    faces.truncate(config.max_faces);
    faces
}

/// Greedy NMS; the result is sorted by descending confidence.
pub fn non_max_suppression(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| intersection_over_union(kept, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

pub fn intersection_over_union(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> FaceBox {
        FaceBox { x1, y1, x2, y2, confidence }
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = face(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = face(20.0, 20.0, 30.0, 30.0, 0.9);
        assert!((intersection_over_union(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(intersection_over_union(&a, &b), 0.0);
    }

    #[test]
    fn nms_drops_overlapping_lower_scores() {
        let boxes = vec![
            face(0.0, 0.0, 100.0, 100.0, 0.6),
            face(5.0, 5.0, 105.0, 105.0, 0.9),
            face(200.0, 200.0, 300.0, 300.0, 0.7),
        ];
        let kept = non_max_suppression(boxes, 0.45);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn decodes_row_major_pixel_output() {
        // [1, 6, 5]: six predictions of [cx, cy, w, h, score]
        let mut data = vec![
            100.0, 100.0, 50.0, 60.0, 0.95,
            300.0, 300.0, 5.0, 5.0, 0.90,
        ];
        data.extend(std::iter::repeat(0.0).take(4 * 5));
        let faces = decode_predictions(&data, &[1, 6, 5], 640.0, 640.0);
        assert_eq!(faces.len(), 1, "tiny box is discarded");
        assert_eq!(faces[0], face(75.0, 70.0, 125.0, 130.0, 0.95));
    }

    #[test]
    fn decodes_transposed_normalized_output() {
        // [1, 5, 6]: fields are rows, predictions are columns
        let data = vec![
            0.5, 0.1, 0.9, 0.0, 0.0, 0.0,  // cx
            0.5, 0.1, 0.9, 0.0, 0.0, 0.0,  // cy
            0.25, 0.1, 0.1, 0.0, 0.0, 0.0, // w
            0.25, 0.1, 0.1, 0.0, 0.0, 0.0, // h
            0.8, 0.0, 0.6, 0.0, 0.0, 0.0,  // score
        ];
        let faces = decode_predictions(&data, &[1, 5, 6], 100.0, 100.0);
        assert_eq!(faces.len(), 1, "only the first prediction is scored and large enough");
        let f = &faces[0];
        assert!((f.x1 - 37.5).abs() < 1e-4 && (f.x2 - 62.5).abs() < 1e-4);
        assert!((f.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn rejects_unexpected_shapes() {
        assert!(decode_predictions(&[0.0; 4], &[4], 640.0, 640.0).is_empty());
        assert!(decode_predictions(&[0.0; 8], &[1, 2, 4], 640.0, 640.0).is_empty());
    }

    #[test]
    fn filter_applies_threshold_and_cap() {
        let config = DetectorConfig {
            confidence_threshold: 0.5,
            max_faces: 1,
            ..DetectorConfig::default()
        };
        let faces = filter_detections(
            vec![
                face(0.0, 0.0, 50.0, 50.0, 0.4),
                face(100.0, 0.0, 150.0, 50.0, 0.8),
                face(200.0, 0.0, 250.0, 50.0, 0.7),
            ],
            &config,
        );
        assert_eq!(faces.len(), 1);
        assert!((faces[0].confidence - 0.8).abs() < 1e-6);
    }
}
