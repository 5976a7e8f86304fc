pub mod camera;
pub mod cli;
pub mod common;
pub mod core;
pub mod report;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use camera::{Camera, FrameSource};
pub use common::{AttendanceError, Config, DevMode, Result};
pub use core::{
    Embedding, FaceBox, FaceEngine, FrameReport, Gallery, OnnxFaceEngine, RecognitionPipeline,
};
pub use report::ReportPeriod;
pub use service::AppState;
pub use storage::{AttendanceRecord, AttendanceStatus, AttendanceStore, NewStudent, RecordOutcome};
