use crate::common::config::{Config, MatchingConfig};
use crate::common::{AttendanceError, Result};
use crate::core::detector::FaceBox;
use crate::core::engine::FaceEngine;
use crate::core::matcher::{Gallery, SharedGallery};
use crate::core::quality::{best_face, QualityMetrics};
use crate::core::recognizer::Embedding;
use crate::storage::{AttendanceStatus, AttendanceStore, NewStudent, RecordOutcome, StudentSummary};
use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use image::{imageops::FilterType, DynamicImage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub student: StudentSummary,
    pub quality: QualityMetrics,
    pub faces_detected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_path: Option<PathBuf>,
}

/// Embedding of the best face in a photo, with the quality that won it.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub embedding: Embedding,
    pub quality: QualityMetrics,
    pub faces_detected: usize,
}

pub fn decode_photo(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(AttendanceError::InvalidInput("photo is empty".to_string()));
    }
    Ok(image::load_from_memory(bytes)?)
}

/// Detect, pick the highest-quality face, gate on quality and embed it.
pub fn enroll_face(engine: &dyn FaceEngine, photo: &DynamicImage, min_quality: f32) -> Result<Enrollment> {
    let faces = engine.detect(photo)?;
    let faces_detected = faces.len();
    let (face, quality) = best_face(photo, &faces).ok_or(AttendanceError::NoFaceDetected)?;

    tracing::debug!("{} face(s) in photo, best: {}", faces_detected, quality.get_quality_assessment());
    if !quality.meets_minimum_requirements(min_quality) {
        for suggestion in quality.get_improvement_suggestions() {
            tracing::info!("Registration photo: {}", suggestion);
        }
        return Err(AttendanceError::LowQuality {
            score: quality.overall_score,
            required: min_quality,
        });
    }

    let embedding = engine.embed(photo, &face)?;
    Ok(Enrollment { embedding, quality, faces_detected })
}

// Lock order: the store mutex may be held while the gallery is replaced,
// never the other way round. Gallery readers work on snapshots.

fn lock_store(store: &Mutex<AttendanceStore>) -> Result<MutexGuard<'_, AttendanceStore>> {
    store
        .lock()
        .map_err(|_| AttendanceError::Storage("store lock poisoned".to_string()))
}

/// Register a new student from a photo and refresh the gallery.
///
/// Decoding and the face models run without any lock held; the store is
/// locked only for the existence check and the insert.
pub fn register_student(
    engine: &dyn FaceEngine,
    store: &Mutex<AttendanceStore>,
    gallery: &SharedGallery,
    config: &Config,
    student: NewStudent,
    photo_bytes: &[u8],
    photos_dir: Option<&Path>,
) -> Result<Registration> {
    let student = student.normalized().map_err(AttendanceError::InvalidInput)?;
    if lock_store(store)?.student_exists(&student.id)? {
        return Err(AttendanceError::DuplicateStudent(student.id));
    }

    let photo = decode_photo(photo_bytes)?;
    let enrollment = enroll_face(engine, &photo, config.registration.min_quality)?;
    let created_at = local_now(config.attendance.offset()?);

    {
        // A racing registration of the same id fails here as a duplicate
        let store = lock_store(store)?;
        store.add_student(&student, &enrollment.embedding, created_at)?;
        reload_gallery(&store, gallery)?;
    }

    let photo_path = match photos_dir {
        Some(dir) if config.registration.store_photos => save_photo(dir, &student.id, &photo),
        _ => None,
    };

    Ok(Registration {
        student: StudentSummary {
            id: student.id,
            name: student.name,
            course: student.course,
            created_at,
        },
        quality: enrollment.quality,
        faces_detected: enrollment.faces_detected,
        photo_path,
    })
}

/// Replace an existing student's embedding from a new photo.
pub fn re_enroll(
    engine: &dyn FaceEngine,
    store: &Mutex<AttendanceStore>,
    gallery: &SharedGallery,
    config: &Config,
    student_id: &str,
    photo_bytes: &[u8],
    photos_dir: Option<&Path>,
) -> Result<Registration> {
    let student = lock_store(store)?.get_student(student_id)?;
    let photo = decode_photo(photo_bytes)?;
    let enrollment = enroll_face(engine, &photo, config.registration.min_quality)?;

    {
        let store = lock_store(store)?;
        store.replace_embedding(&student.id, &enrollment.embedding)?;
        reload_gallery(&store, gallery)?;
    }

    let photo_path = match photos_dir {
        Some(dir) if config.registration.store_photos => save_photo(dir, &student.id, &photo),
        _ => None,
    };

    Ok(Registration {
        student: StudentSummary::from(&student),
        quality: enrollment.quality,
        faces_detected: enrollment.faces_detected,
        photo_path,
    })
}

/// Rebuild the gallery from the store. Call with the store locked so
/// concurrent writers publish their galleries in commit order.
pub fn reload_gallery(store: &AttendanceStore, gallery: &SharedGallery) -> Result<()> {
    gallery.replace(Gallery::from_entries(store.gallery_entries()?))
}

/// Photo saving is best effort; the registration stands without it.
fn save_photo(dir: &Path, student_id: &str, photo: &DynamicImage) -> Option<PathBuf> {
    let file_name: String = student_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let path = dir.join(format!("{}.jpg", file_name));

    let result = std::fs::create_dir_all(dir)
        .map_err(AttendanceError::from)
        .and_then(|_| photo.to_rgb8().save(&path).map_err(AttendanceError::from));

    match result {
        Ok(()) => Some(path),
        Err(e) => {
            tracing::warn!("Could not save photo for {}: {}", student_id, e);
            None
        }
    }
}

pub fn local_now(offset: FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&offset)
}

/// What happened to one face in a frame.
#[derive(Debug, Clone, Serialize)]
pub struct FaceOutcome {
    /// In the coordinates of the frame that was passed in
    pub face: FaceBox,
    pub student_id: Option<String>,
    pub name: Option<String>,
    pub score: Option<f32>,
    /// True only for the sighting that created today's record
    pub recorded: bool,
    pub status: Option<AttendanceStatus>,
}

impl FaceOutcome {
    pub fn is_recognized(&self) -> bool {
        self.student_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub timestamp: DateTime<FixedOffset>,
    pub faces: Vec<FaceOutcome>,
}

impl FrameReport {
    pub fn recognized(&self) -> impl Iterator<Item = &FaceOutcome> {
        self.faces.iter().filter(|f| f.is_recognized())
    }
}

/// Frame to attendance records: detect, embed, match, log.
pub struct RecognitionPipeline {
    engine: Arc<dyn FaceEngine>,
    matching: MatchingConfig,
    frame_scale: f32,
    offset: FixedOffset,
    late_after: Option<NaiveTime>,
}

impl RecognitionPipeline {
    pub fn new(engine: Arc<dyn FaceEngine>, config: &Config) -> Result<Self> {
        Ok(Self {
            engine,
            matching: config.matching.clone(),
            frame_scale: config.recognition.frame_scale,
            offset: config.attendance.offset()?,
            late_after: config.attendance.late_cutoff()?,
        })
    }

    pub fn engine(&self) -> &Arc<dyn FaceEngine> {
        &self.engine
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        local_now(self.offset)
    }

    /// Match every face without touching the store.
    pub fn identify(&self, frame: &DynamicImage, gallery: &Gallery) -> Result<Vec<FaceOutcome>> {
        let faces = self.detect_scaled(frame)?;

        let mut outcomes = Vec::with_capacity(faces.len());
        for face in faces {
            let best = if gallery.is_empty() {
                None
            } else {
                let embedding = self.engine.embed(frame, &face)?;
                gallery.best_match(&embedding, &self.matching)
            };

            outcomes.push(FaceOutcome {
                face,
                student_id: best.as_ref().map(|m| m.student_id.clone()),
                name: best.as_ref().map(|m| m.name.clone()),
                score: best.map(|m| m.score),
                recorded: false,
                status: None,
            });
        }
        Ok(outcomes)
    }

    /// Identify faces and log attendance for every match. The store lock is
    /// held only while writing records. `gallery` should be a snapshot, not
    /// a borrow from a held lock guard.
    pub fn process_frame(
        &self,
        frame: &DynamicImage,
        gallery: &Gallery,
        store: &Mutex<AttendanceStore>,
        at: DateTime<FixedOffset>,
    ) -> Result<FrameReport> {
        let mut faces = self.identify(frame, gallery)?;

        if faces.iter().any(FaceOutcome::is_recognized) {
            let store = lock_store(store)?;

            for outcome in faces.iter_mut() {
                let Some(student_id) = outcome.student_id.as_deref() else {
                    continue;
                };
                match store.record_attendance(student_id, at, self.late_after) {
                    Ok(RecordOutcome::Recorded { status, .. }) => {
                        outcome.recorded = true;
                        outcome.status = Some(status);
                    }
                    Ok(RecordOutcome::AlreadyRecorded) => {}
                    // Deleted since the gallery was loaded
                    Err(AttendanceError::StudentNotFound(id)) => {
                        tracing::warn!("Matched student {} no longer exists", id);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(FrameReport { timestamp: at, faces })
    }

    /// Detect on a downscaled copy, then map boxes back to the full frame.
    fn detect_scaled(&self, frame: &DynamicImage) -> Result<Vec<FaceBox>> {
        let scale = self.frame_scale;
        if scale >= 1.0 || frame.width() == 0 || frame.height() == 0 {
            return self.engine.detect(frame);
        }

        let small_w = ((frame.width() as f32 * scale).round() as u32).max(1);
        let small_h = ((frame.height() as f32 * scale).round() as u32).max(1);
        let small = frame.resize_exact(small_w, small_h, FilterType::Triangle);

        let sx = frame.width() as f32 / small_w as f32;
        let sy = frame.height() as f32 / small_h as f32;
        Ok(self
            .engine
            .detect(&small)?
            .iter()
            .map(|f| f.scaled(sx, sy))
            .collect())
    }
}
