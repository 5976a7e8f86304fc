#![allow(dead_code)]

use face_attendance::core::recognizer::l2_normalize;
use face_attendance::{AppState, AttendanceStore, Config, Embedding, FaceBox, FaceEngine};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;

/// Finds one face in the middle of any image that is not entirely black and
/// embeds it as the colour at its centre, so a photo's colour is its identity.
pub struct ColorEngine;

impl FaceEngine for ColorEngine {
    fn detect(&self, image: &DynamicImage) -> face_attendance::Result<Vec<FaceBox>> {
        if image.to_rgb8().pixels().all(|p| p.0 == [0, 0, 0]) {
            return Ok(Vec::new());
        }
        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok(vec![FaceBox {
            x1: w * 0.25,
            y1: h * 0.25,
            x2: w * 0.75,
            y2: h * 0.75,
            confidence: 0.98,
        }])
    }

    fn embed(&self, image: &DynamicImage, face: &FaceBox) -> face_attendance::Result<Embedding> {
        let rgb = image.to_rgb8();
        let cx = ((face.x1 + face.x2) / 2.0) as u32;
        let cy = ((face.y1 + face.y2) / 2.0) as u32;
        let p = rgb.get_pixel(cx.min(rgb.width() - 1), cy.min(rgb.height() - 1));
        Ok(l2_normalize(p.0.iter().map(|&c| c as f32 + 1.0).collect()))
    }
}

/// A photo with some texture so quality scoring sees contrast.
pub fn photo(color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(96, 96, |x, y| {
        if (x + y) % 2 == 0 {
            Rgb(color)
        } else {
            Rgb([color[0] / 2, color[1] / 2, color[2] / 2])
        }
    }))
}

pub fn png(image: &DynamicImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageOutputFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.enable_camera = false;
    config.registration.min_quality = 0.1;
    config.registration.store_photos = false;
    config.recognition.frame_scale = 1.0;
    config.recognition.process_every_n_frames = 1;
    config.matching.threshold = 0.99;
    config
}

pub fn test_state() -> AppState {
    let store = AttendanceStore::open_in_memory().expect("in-memory store");
    AppState::new(test_config(), store, Arc::new(ColorEngine), None).expect("state")
}
