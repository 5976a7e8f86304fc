pub mod v4l2;

pub use v4l2::{Camera, CameraInfo, CameraSession};

use crate::common::{AttendanceError, Result};
use image::DynamicImage;

/// Anything that yields frames one at a time. Implementations may block.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<DynamicImage>;
}

/// Replays a fixed list of frames in a loop.
pub struct FrameLoop {
    frames: Vec<DynamicImage>,
    next: usize,
}

impl FrameLoop {
    pub fn new(frames: Vec<DynamicImage>) -> Result<Self> {
        if frames.is_empty() {
            return Err(AttendanceError::Camera("frame loop needs at least one frame".into()));
        }
        Ok(Self { frames, next: 0 })
    }
}

impl FrameSource for FrameLoop {
    fn next_frame(&mut self) -> Result<DynamicImage> {
        let frame = self.frames[self.next].clone();
        self.next = (self.next + 1) % self.frames.len();
        Ok(frame)
    }
}
