use crate::camera::FrameSource;
use crate::common::config::CameraConfig;
use crate::common::{AttendanceError, Result};
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb, RgbImage};
use serde::Serialize;
use std::fs;
use std::time::Duration;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// Device index that asks for auto-detection.
pub const AUTO_DETECT: u32 = 999;

const STREAM_BUFFERS: u32 = 4;

/// A video device as listed by `list_all_cameras`.
#[derive(Debug, Clone, Serialize)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub formats: Vec<String>,
    pub video_capture: bool,
}

impl CameraInfo {
    /// Colour capture device, the kind a classroom webcam is.
    pub fn is_color_capture(&self) -> bool {
        self.video_capture && self.formats.iter().any(|f| f == "MJPG" || f == "YUYV")
    }
}

pub struct Camera {
    device: Device,
    index: u32,
    config: CameraConfig,
}

/// An open capture stream; frames come out decoded.
pub struct CameraSession<'a> {
    stream: v4l::io::mmap::Stream<'a>,
    format: v4l::Format,
}

impl Camera {
    pub fn new(config: &CameraConfig) -> Result<Self> {
        let index = if config.device_index == AUTO_DETECT {
            Self::detect_camera()?
        } else {
            config.device_index
        };
        Self::new_with_device(index, config.clone())
    }

    /// List every /dev/video* device that can be opened.
    pub fn list_all_cameras() -> Result<Vec<CameraInfo>> {
        let mut cameras = Vec::new();

        for index in video_device_indices()? {
            let Ok(device) = Device::new(index as usize) else {
                continue;
            };
            let Ok(caps) = device.query_caps() else {
                continue;
            };

            let formats = device
                .enum_formats()
                .unwrap_or_default()
                .iter()
                .map(|fmt| fourcc_name(fmt.fourcc))
                .collect();

            cameras.push(CameraInfo {
                index,
                name: caps.card.clone(),
                formats,
                video_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            });
        }

        cameras.sort_by_key(|c| c.index);
        Ok(cameras)
    }

    /// First colour capture device, falling back to device 0.
    pub fn detect_camera() -> Result<u32> {
        tracing::info!("Auto-detecting camera...");

        let cameras = Self::list_all_cameras()?;
        if let Some(camera) = cameras.iter().find(|c| c.is_color_capture()) {
            tracing::info!("Selected camera: /dev/video{} ({})", camera.index, camera.name);
            return Ok(camera.index);
        }
        if let Some(camera) = cameras.iter().find(|c| c.video_capture) {
            tracing::info!("Selected camera: /dev/video{} ({})", camera.index, camera.name);
            return Ok(camera.index);
        }

        tracing::warn!("No capture device detected, falling back to /dev/video0");
        Ok(0)
    }

    pub fn new_with_device(index: u32, config: CameraConfig) -> Result<Self> {
        tracing::info!("Opening camera device {}...", index);

        let device = Device::new(index as usize)
            .map_err(|e| AttendanceError::Camera(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device
            .query_caps()
            .map_err(|e| AttendanceError::Camera(format!("Failed to query capabilities: {}", e)))?;
        tracing::debug!("Device {} ({}) capabilities: {:?}", index, caps.card, caps.capabilities);

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} may not support standard video capture", index);
        }

        let mut fmt = device
            .format()
            .map_err(|e| AttendanceError::Camera(format!("Failed to get format: {}", e)))?;
        tracing::debug!("Current format: {}x{} {}", fmt.width, fmt.height, fourcc_name(fmt.fourcc));

        fmt.width = config.width;
        fmt.height = config.height;
        // Greyscale-only sensors keep their format; everything else is asked for MJPG
        if fmt.fourcc.repr != *b"GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let actual = device
            .format()
            .map_err(|e| AttendanceError::Camera(format!("Failed to get final format: {}", e)))?;
        tracing::info!(
            "Camera format: {}x{} {}",
            actual.width,
            actual.height,
            fourcc_name(actual.fourcc)
        );

        if actual.width != config.width || actual.height != config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                actual.width,
                actual.height,
                config.width,
                config.height
            );
        }

        if decoder_for(actual.fourcc).is_none() {
            return Err(AttendanceError::Camera(format!(
                "Unsupported pixel format {}",
                fourcc_name(actual.fourcc)
            )));
        }

        Ok(Self { device, index, config })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Start streaming, discarding the configured warm-up frames.
    pub fn start_session(&mut self) -> Result<CameraSession<'_>> {
        let format = self
            .device
            .format()
            .map_err(|e| AttendanceError::Camera(format!("Failed to get format: {}", e)))?;

        let mut stream = v4l::io::mmap::Stream::with_buffers(&mut self.device, Type::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| AttendanceError::Camera(format!("Failed to create stream: {}", e)))?;

        tracing::debug!("Warming up camera...");
        for i in 0..self.config.warmup_frames {
            stream.next().map_err(|e| {
                AttendanceError::Camera(format!("Failed to capture warmup frame {}: {}", i, e))
            })?;
            std::thread::sleep(Duration::from_millis(self.config.warmup_delay_ms));
        }
        tracing::info!("Camera ready");

        Ok(CameraSession { stream, format })
    }

    /// Single still, for `test-camera`.
    pub fn capture_frame(&mut self) -> Result<DynamicImage> {
        self.start_session()?.next_frame()
    }
}

impl FrameSource for CameraSession<'_> {
    fn next_frame(&mut self) -> Result<DynamicImage> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| AttendanceError::Camera(format!("Failed to capture: {}", e)))?;

        // MJPG frames are shorter than the buffer; bytesused is the payload
        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used > 0 { &buf[..used] } else { buf };

        decode_frame(self.format.fourcc, data, self.format.width, self.format.height)
    }
}

type Decoder = fn(&[u8], u32, u32) -> Result<DynamicImage>;

fn decoder_for(fourcc: FourCC) -> Option<Decoder> {
    match &fourcc.repr {
        b"MJPG" | b"JPEG" => Some(mjpeg_to_image as Decoder),
        b"YUYV" => Some(yuyv_to_image as Decoder),
        b"GREY" => Some(grey_to_image as Decoder),
        _ => None,
    }
}

pub fn decode_frame(fourcc: FourCC, data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let decoder = decoder_for(fourcc).ok_or_else(|| {
        AttendanceError::Camera(format!("Unsupported pixel format {}", fourcc_name(fourcc)))
    })?;
    decoder(data, width, height)
}

fn mjpeg_to_image(data: &[u8], _width: u32, _height: u32) -> Result<DynamicImage> {
    image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map_err(|e| AttendanceError::Camera(format!("Corrupt MJPG frame: {}", e)))
}

fn grey_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let len = (width * height) as usize;
    let pixels = data.get(..len).ok_or_else(|| short_frame("GREY", data.len(), len))?;
    let img = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels.to_vec())
        .ok_or_else(|| AttendanceError::Camera("Failed to create grayscale image buffer".into()))?;
    Ok(DynamicImage::ImageLuma8(img))
}

/// Packed 4:2:2 `Y0 U Y1 V` to RGB (BT.601).
pub fn yuyv_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let len = (width * height * 2) as usize;
    let data = data.get(..len).ok_or_else(|| short_frame("YUYV", data.len(), len))?;

    let mut img = RgbImage::new(width, height);
    for (i, chunk) in data.chunks_exact(4).enumerate() {
        let [y0, u, y1, v] = [chunk[0], chunk[1], chunk[2], chunk[3]];
        let px = (i * 2) as u32;
        let (x, y) = (px % width, px / width);
        img.put_pixel(x, y, yuv_to_rgb(y0, u, v));
        if x + 1 < width {
            img.put_pixel(x + 1, y, yuv_to_rgb(y1, u, v));
        }
    }
    Ok(DynamicImage::ImageRgb8(img))
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    Rgb([
        clamp(1.164 * c + 1.596 * e),
        clamp(1.164 * c - 0.392 * d - 0.813 * e),
        clamp(1.164 * c + 2.017 * d),
    ])
}

fn short_frame(format: &str, got: usize, want: usize) -> AttendanceError {
    AttendanceError::Camera(format!("Short {} frame: {} of {} bytes", format, got, want))
}

fn fourcc_name(fourcc: FourCC) -> String {
    fourcc.str().map(str::to_string).unwrap_or_else(|_| format!("{:?}", fourcc.repr))
}

fn video_device_indices() -> Result<Vec<u32>> {
    let mut indices = Vec::new();
    for entry in fs::read_dir("/dev")? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(index) = name.strip_prefix("video").and_then(|s| s.parse::<u32>().ok()) {
            indices.push(index);
        }
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_decodes_grey_levels() {
        // Two pixels per chunk; neutral chroma gives grey
        let data = [235, 128, 16, 128, 126, 128, 126, 128];
        let img = yuyv_to_image(&data, 2, 2).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 0, 0]);
        let mid = img.get_pixel(0, 1).0;
        assert!(mid[0] > 120 && mid[0] < 135 && mid[0] == mid[1] && mid[1] == mid[2]);
    }

    #[test]
    fn short_frames_are_errors() {
        assert!(yuyv_to_image(&[0; 6], 2, 2).is_err());
        assert!(decode_frame(FourCC::new(b"GREY"), &[0; 3], 2, 2).is_err());
    }

    #[test]
    fn grey_frames_decode_to_luma() {
        let img = decode_frame(FourCC::new(b"GREY"), &[0, 64, 128, 255], 2, 2).unwrap();
        assert_eq!(img.width(), 2);
        assert_eq!(img.to_luma8().get_pixel(1, 1).0, [255]);
    }

    #[test]
    fn unknown_formats_are_rejected() {
        assert!(decode_frame(FourCC::new(b"H264"), &[0; 16], 2, 2).is_err());
    }

    #[test]
    fn color_capture_detection() {
        let webcam = CameraInfo {
            index: 0,
            name: "USB webcam".into(),
            formats: vec!["YUYV".into()],
            video_capture: true,
        };
        let ir = CameraInfo { formats: vec!["GREY".into()], ..webcam.clone() };
        assert!(webcam.is_color_capture());
        assert!(!ir.is_color_capture());
    }
}
