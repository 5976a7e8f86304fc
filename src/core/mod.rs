pub mod annotate;
pub mod detector;
pub mod engine;
pub mod matcher;
pub mod onnx;
pub mod pipeline;
pub mod quality;
pub mod recognizer;

pub use detector::{FaceBox, FaceDetector};
pub use engine::{FaceEngine, OnnxFaceEngine};
pub use matcher::{Gallery, GalleryEntry, Match, SharedGallery};
pub use pipeline::{FaceOutcome, FrameReport, RecognitionPipeline, Registration};
pub use quality::QualityMetrics;
pub use recognizer::{cosine_similarity, Embedding, FaceRecognizer};
