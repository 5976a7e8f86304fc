use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use chrono::{FixedOffset, NaiveTime};
use crate::common::error::{AttendanceError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub attendance: AttendanceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    /// 999 means auto-detect
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }
fn default_warmup_frames() -> u32 { 5 }
fn default_warmup_delay() -> u64 { 50 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
            warmup_frames: default_warmup_frames(),
            warmup_delay_ms: default_warmup_delay(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_detector_path")]
    pub detector_path: PathBuf,
    #[serde(default = "default_recognizer_path")]
    pub recognizer_path: PathBuf,
}

fn default_detector_path() -> PathBuf { PathBuf::from("yolov8n-face.onnx") }
fn default_recognizer_path() -> PathBuf { PathBuf::from("arcface.onnx") }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector_path: default_detector_path(),
            recognizer_path: default_recognizer_path(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_input")]
    pub input_width: u32,
    #[serde(default = "default_detector_input")]
    pub input_height: u32,
    #[serde(default = "default_detection_confidence")]
    pub confidence_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_max_faces")]
    pub max_faces: usize,
}

fn default_detector_input() -> u32 { 640 }
fn default_detection_confidence() -> f32 { 0.5 }
fn default_iou_threshold() -> f32 { 0.45 }
fn default_max_faces() -> usize { 10 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: default_detector_input(),
            input_height: default_detector_input(),
            confidence_threshold: default_detection_confidence(),
            iou_threshold: default_iou_threshold(),
            max_faces: default_max_faces(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognizerConfig {
    #[serde(default = "default_recognizer_input")]
    pub input_size: u32,
    #[serde(default = "default_normalization_value")]
    pub normalization_value: f32,
    /// Feed a single luma channel instead of RGB
    #[serde(default)]
    pub grayscale: bool,
}

fn default_recognizer_input() -> u32 { 112 }
fn default_normalization_value() -> f32 { 127.5 }

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            input_size: default_recognizer_input(),
            normalization_value: default_normalization_value(),
            grayscale: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchMetric {
    /// Accept when similarity >= threshold
    #[default]
    Cosine,
    /// Accept when distance <= threshold
    Euclidean,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default)]
    pub metric: MatchMetric,
    #[serde(default = "default_match_threshold")]
    pub threshold: f32,
}

fn default_match_threshold() -> f32 { 0.5 }

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            metric: MatchMetric::Cosine,
            threshold: default_match_threshold(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognitionConfig {
    /// Frames are downscaled by this factor before detection
    #[serde(default = "default_frame_scale")]
    pub frame_scale: f32,
    #[serde(default = "default_process_every")]
    pub process_every_n_frames: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_frame_scale() -> f32 { 0.5 }
fn default_process_every() -> u32 { 2 }
fn default_jpeg_quality() -> u8 { 80 }

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            frame_scale: default_frame_scale(),
            process_every_n_frames: default_process_every(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistrationConfig {
    #[serde(default = "default_min_quality")]
    pub min_quality: f32,
    #[serde(default = "default_true")]
    pub store_photos: bool,
}

fn default_min_quality() -> f32 { 0.3 }
fn default_true() -> bool { true }

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            min_quality: default_min_quality(),
            store_photos: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AttendanceConfig {
    /// Offset of the school's local time from UTC
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
    /// Arrivals after this local time (HH:MM) are marked late
    #[serde(default)]
    pub late_after: Option<String>,
}

fn default_utc_offset() -> i32 { 330 }

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset(),
            late_after: None,
        }
    }
}

impl AttendanceConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            AttendanceError::Config(format!(
                "utc_offset_minutes out of range: {}", self.utc_offset_minutes
            ))
        })
    }

    pub fn late_cutoff(&self) -> Result<Option<NaiveTime>> {
        self.late_after
            .as_deref()
            .map(|s| {
                NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| {
                    AttendanceError::Config(format!("late_after must be HH:MM, got {}", s))
                })
            })
            .transpose()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Overrides the mode-dependent default location
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub photos_dir: Option<PathBuf>,
    #[serde(default)]
    pub models_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Run the camera recognition loop alongside the web server
    #[serde(default = "default_true")]
    pub enable_camera: bool,
}

fn default_bind_addr() -> String { "0.0.0.0:5000".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            enable_camera: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_optimization_level() -> u32 { 3 }

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { optimization_level: default_optimization_level() }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let local = PathBuf::from("configs/attendance.toml");
        if local.exists() {
            return Self::load_from_path(&local);
        }
        let system = crate::common::paths::system_config_file();
        if system.exists() {
            return Self::load_from_path(&system);
        }
        tracing::warn!("No config file found, using built-in defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AttendanceError::Config(format!(
                "Config file not found: {}", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| AttendanceError::Config(format!("Config parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(invalid(format!(
                "camera.width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(invalid(format!(
                "camera.height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        if self.detector.input_width == 0 || self.detector.input_width > 4096 {
            return Err(invalid(format!(
                "detector.input_width must be between 1 and 4096, got {}",
                self.detector.input_width
            )));
        }
        if self.detector.input_height == 0 || self.detector.input_height > 4096 {
            return Err(invalid(format!(
                "detector.input_height must be between 1 and 4096, got {}",
                self.detector.input_height
            )));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(invalid(format!(
                "detector.confidence_threshold must be between 0.0 and 1.0, got {}",
                self.detector.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.detector.iou_threshold) {
            return Err(invalid(format!(
                "detector.iou_threshold must be between 0.0 and 1.0, got {}",
                self.detector.iou_threshold
            )));
        }
        if self.detector.max_faces == 0 {
            return Err(invalid("detector.max_faces must be at least 1".to_string()));
        }

        if self.recognizer.input_size == 0 || self.recognizer.input_size > 1024 {
            return Err(invalid(format!(
                "recognizer.input_size must be between 1 and 1024, got {}",
                self.recognizer.input_size
            )));
        }
        if self.recognizer.normalization_value <= 0.0 {
            return Err(invalid(format!(
                "recognizer.normalization_value must be positive, got {}",
                self.recognizer.normalization_value
            )));
        }

        match self.matching.metric {
            MatchMetric::Cosine if !(-1.0..=1.0).contains(&self.matching.threshold) => {
                return Err(invalid(format!(
                    "matching.threshold for cosine must be between -1.0 and 1.0, got {}",
                    self.matching.threshold
                )));
            }
            MatchMetric::Euclidean if self.matching.threshold <= 0.0 => {
                return Err(invalid(format!(
                    "matching.threshold for euclidean must be positive, got {}",
                    self.matching.threshold
                )));
            }
            _ => {}
        }

        if !(self.recognition.frame_scale > 0.0 && self.recognition.frame_scale <= 1.0) {
            return Err(invalid(format!(
                "recognition.frame_scale must be in (0.0, 1.0], got {}",
                self.recognition.frame_scale
            )));
        }
        if self.recognition.process_every_n_frames == 0 {
            return Err(invalid("recognition.process_every_n_frames must be at least 1".to_string()));
        }
        if self.recognition.jpeg_quality == 0 || self.recognition.jpeg_quality > 100 {
            return Err(invalid(format!(
                "recognition.jpeg_quality must be between 1 and 100, got {}",
                self.recognition.jpeg_quality
            )));
        }

        if !(0.0..=1.0).contains(&self.registration.min_quality) {
            return Err(invalid(format!(
                "registration.min_quality must be between 0.0 and 1.0, got {}",
                self.registration.min_quality
            )));
        }

        self.attendance.offset()?;
        self.attendance.late_cutoff()?;

        Ok(())
    }
}

fn invalid(message: String) -> AttendanceError {
    AttendanceError::Config(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:5000");
        assert_eq!(config.matching.metric, MatchMetric::Cosine);
        assert_eq!(config.attendance.utc_offset_minutes, 330);
        assert!(config.attendance.late_after.is_none());
    }

    #[test]
    fn parses_sections() {
        let config = Config::from_toml_str(
            r#"
            [matching]
            metric = "euclidean"
            threshold = 0.6

            [attendance]
            utc_offset_minutes = -300
            late_after = "09:15"

            [server]
            bind_addr = "127.0.0.1:8080"
            enable_camera = false
            "#,
        )
        .unwrap();

        assert_eq!(config.matching.metric, MatchMetric::Euclidean);
        assert!((config.matching.threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.attendance.offset().unwrap().local_minus_utc(), -300 * 60);
        assert_eq!(
            config.attendance.late_cutoff().unwrap(),
            NaiveTime::from_hms_opt(9, 15, 0)
        );
        assert!(!config.server.enable_camera);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = Config::from_toml_str("[recognition]\nframe_scale = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("frame_scale"));

        let err = Config::from_toml_str("[detector]\nconfidence_threshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("confidence_threshold"));

        let err = Config::from_toml_str("[matching]\nmetric = \"euclidean\"\nthreshold = 0.0\n")
            .unwrap_err();
        assert!(err.to_string().contains("euclidean"));
    }

    #[test]
    fn rejects_bad_late_cutoff() {
        let err = Config::from_toml_str("[attendance]\nlate_after = \"nine\"\n").unwrap_err();
        assert!(err.to_string().contains("HH:MM"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load_from_path(Path::new("/nonexistent/attendance.toml")).unwrap_err();
        assert!(matches!(err, AttendanceError::Config(_)));
    }

    #[test]
    fn shipped_config_parses() {
        let config = Config::from_toml_str(include_str!("../../configs/attendance.toml")).unwrap();
        assert_eq!(config.camera.device_index, 0);
        assert_eq!(config.recognition.process_every_n_frames, 2);
    }
}
