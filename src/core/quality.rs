use crate::core::detector::FaceBox;
use image::DynamicImage;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct QualityMetrics {
    pub detection_confidence: f32,
    pub face_size_ratio: f32,
    pub face_centering_score: f32,
    pub brightness_score: f32,
    pub contrast_score: f32,
    pub overall_score: f32,
}

impl QualityMetrics {
    /// Score a detected face within a registration photo
    pub fn calculate(image: &DynamicImage, face: &FaceBox) -> Self {
        let detection_confidence = face.confidence.clamp(0.0, 1.0);

        let img_width = image.width().max(1) as f32;
        let img_height = image.height().max(1) as f32;
        let face_size_ratio = (face.area() / (img_width * img_height)).min(1.0);

        let face_center_x = (face.x1 + face.x2) / 2.0;
        let face_center_y = (face.y1 + face.y2) / 2.0;
        let img_center_x = img_width / 2.0;
        let img_center_y = img_height / 2.0;
        let x_offset = ((face_center_x - img_center_x).abs() / img_center_x).min(1.0);
        let y_offset = ((face_center_y - img_center_y).abs() / img_center_y).min(1.0);
        let face_centering_score = 1.0 - (x_offset + y_offset) / 2.0;

        let (brightness_score, contrast_score) = region_exposure(image, face);

        // ID photos are usually tightly cropped, so size is capped at 25% of frame
        let size_score = (face_size_ratio / 0.25).min(1.0);
        let overall_score = detection_confidence * 0.35
            + size_score * 0.2
            + face_centering_score * 0.15
            + brightness_score * 0.15
            + contrast_score * 0.15;

        QualityMetrics {
            detection_confidence,
            face_size_ratio,
            face_centering_score,
            brightness_score,
            contrast_score,
            overall_score,
        }
    }

    pub fn meets_minimum_requirements(&self, min_quality: f32) -> bool {
        self.overall_score >= min_quality
    }

    pub fn get_quality_assessment(&self) -> String {
        let quality_level = if self.overall_score >= 0.8 {
            "Excellent"
        } else if self.overall_score >= 0.7 {
            "Good"
        } else if self.overall_score >= 0.6 {
            "Acceptable"
        } else if self.overall_score >= 0.5 {
            "Poor"
        } else {
            "Very Poor"
        };

        format!("Quality: {} (score: {:.2})", quality_level, self.overall_score)
    }

    pub fn get_improvement_suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();

        if self.face_size_ratio < 0.02 {
            suggestions.push("Face is too small - use a closer photo".to_string());
        }
        if self.face_centering_score < 0.6 {
            suggestions.push("Face is far from the center of the photo".to_string());
        }
        if self.brightness_score < 0.5 {
            suggestions.push("Photo is too dark or overexposed".to_string());
        }
        if self.contrast_score < 0.3 {
            suggestions.push("Photo has very low contrast".to_string());
        }

        suggestions
    }
}

/// Pick the face that scores best, e.g. the subject of an ID photo rather
/// than someone in the background.
pub fn best_face(image: &DynamicImage, faces: &[FaceBox]) -> Option<(FaceBox, QualityMetrics)> {
    faces
        .iter()
        .map(|face| (face.clone(), QualityMetrics::calculate(image, face)))
        .max_by(|a, b| a.1.overall_score.total_cmp(&b.1.overall_score))
}

fn region_exposure(image: &DynamicImage, face: &FaceBox) -> (f32, f32) {
    let gray = image.to_luma8();

    let x1 = face.x1.max(0.0) as u32;
    let y1 = face.y1.max(0.0) as u32;
    let x2 = face.x2.min(gray.width() as f32) as u32;
    let y2 = face.y2.min(gray.height() as f32) as u32;

    if x2 <= x1 || y2 <= y1 {
        return (0.5, 0.5);
    }

    let mut sum = 0u64;
    let mut sum_sq = 0u64;
    let mut count = 0u64;
    for y in y1..y2 {
        for x in x1..x2 {
            let pixel = gray.get_pixel(x, y)[0] as u64;
            sum += pixel;
            sum_sq += pixel * pixel;
            count += 1;
        }
    }

    let mean = sum as f32 / count as f32;
    let variance = ((sum_sq as f32 / count as f32) - mean * mean).max(0.0);
    let std_dev = variance.sqrt();

    let brightness_score = 1.0 - ((mean - 127.5).abs() / 127.5).min(1.0);
    let contrast_score = (std_dev / 64.0).min(1.0);

    (brightness_score, contrast_score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn checkerboard(size: u32) -> DynamicImage {
        let img = GrayImage::from_fn(size, size, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 { Luma([64]) } else { Luma([192]) }
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn centered_well_lit_face_scores_high() {
        let image = checkerboard(200);
        let face = FaceBox { x1: 50.0, y1: 50.0, x2: 150.0, y2: 150.0, confidence: 0.95 };
        let q = QualityMetrics::calculate(&image, &face);
        assert!(q.face_centering_score > 0.99);
        assert!(q.brightness_score > 0.9);
        assert!(q.meets_minimum_requirements(0.7), "{}", q.get_quality_assessment());
        assert!(q.get_improvement_suggestions().is_empty());
    }

    #[test]
    fn dark_corner_face_scores_low() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 200, Luma([5])));
        let face = FaceBox { x1: 0.0, y1: 0.0, x2: 20.0, y2: 20.0, confidence: 0.3 };
        let q = QualityMetrics::calculate(&image, &face);
        assert!(!q.meets_minimum_requirements(0.5));
        assert!(!q.get_improvement_suggestions().is_empty());
    }

    #[test]
    fn best_face_prefers_the_subject() {
        let image = checkerboard(200);
        let faces = vec![
            FaceBox { x1: 0.0, y1: 0.0, x2: 20.0, y2: 20.0, confidence: 0.9 },
            FaceBox { x1: 60.0, y1: 60.0, x2: 140.0, y2: 140.0, confidence: 0.85 },
        ];
        let (face, _) = best_face(&image, &faces).unwrap();
        assert_eq!(face.x1, 60.0);
        assert!(best_face(&image, &[]).is_none());
    }
}
