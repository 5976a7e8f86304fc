use crate::core::detector::FaceBox;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

pub const RECOGNIZED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const BORDER: i32 = 3;
const LABEL_HEIGHT: u32 = 12;

/// Outline every face and put a label bar under it: green for a recognized
/// student, red otherwise.
pub fn annotate_faces<'a, I>(frame: &DynamicImage, faces: I) -> RgbImage
where
    I: IntoIterator<Item = (&'a FaceBox, bool)>,
{
    let mut img = frame.to_rgb8();

    for (face, recognized) in faces {
        let color = if recognized { RECOGNIZED_COLOR } else { UNKNOWN_COLOR };
        draw_thick_box(&mut img, face, color);
        draw_label_bar(&mut img, face, color);
    }

    img
}

fn draw_thick_box(img: &mut RgbImage, face: &FaceBox, color: Rgb<u8>) {
    let x1 = face.x1.max(0.0) as i32;
    let y1 = face.y1.max(0.0) as i32;
    let x2 = face.x2.min(img.width() as f32) as i32;
    let y2 = face.y2.min(img.height() as f32) as i32;

    for inset in 0..BORDER {
        let w = x2 - x1 - 2 * inset;
        let h = y2 - y1 - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(img, rect, color);
    }
}

fn draw_label_bar(img: &mut RgbImage, face: &FaceBox, color: Rgb<u8>) {
    let x1 = face.x1.max(0.0) as i32;
    let x2 = face.x2.min(img.width() as f32) as i32;
    let top = face.y2.max(0.0) as i32;
    if x2 <= x1 || top >= img.height() as i32 {
        return;
    }
    let rect = Rect::at(x1, top).of_size((x2 - x1) as u32, LABEL_HEIGHT);
    draw_filled_rect_mut(img, rect, color);
}
