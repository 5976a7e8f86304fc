//! Camera thread feeding the MJPEG endpoint.
//!
//! One OS thread owns the frame source, runs recognition every N frames,
//! draws the latest outcomes and publishes the JPEG on a watch channel.
//! HTTP clients each hold a receiver and always see the newest frame.

use crate::camera::{Camera, FrameSource};
use crate::common::config::{CameraConfig, RecognitionConfig};
use crate::common::{AttendanceError, Result};
use crate::core::annotate::annotate_faces;
use crate::core::pipeline::{FaceOutcome, RecognitionPipeline};
use crate::core::SharedGallery;
use crate::storage::AttendanceStore;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub type FrameReceiver = watch::Receiver<Option<Bytes>>;

/// Give up after this many capture failures in a row.
const MAX_CONSECUTIVE_ERRORS: u32 = 30;

/// Upper bound on the publish rate when the source never blocks.
const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// What the camera thread needs besides its frame source.
pub struct LiveWorker {
    pub pipeline: Arc<RecognitionPipeline>,
    pub store: Arc<Mutex<AttendanceStore>>,
    pub gallery: Arc<SharedGallery>,
    pub recognition: RecognitionConfig,
}

pub struct LiveFeed {
    shutdown: Arc<AtomicBool>,
    receiver: FrameReceiver,
    handle: Option<JoinHandle<()>>,
}

impl LiveFeed {
    /// Open the camera on the worker thread (v4l handles stay on one thread).
    /// Blocks until the camera is streaming; an open failure is returned here
    /// rather than leaving a feed that never publishes.
    pub fn spawn_camera(camera_config: CameraConfig, worker: LiveWorker) -> Result<Self> {
        let (opened_tx, opened_rx) = mpsc::sync_channel::<Result<()>>(1);

        let feed = Self::spawn_with(worker, move |worker, sender, shutdown| {
            let mut camera = match Camera::new(&camera_config) {
                Ok(camera) => camera,
                Err(e) => {
                    let _ = opened_tx.send(Err(e));
                    return Ok(());
                }
            };
            let mut session = match camera.start_session() {
                Ok(session) => session,
                Err(e) => {
                    let _ = opened_tx.send(Err(e));
                    return Ok(());
                }
            };
            let _ = opened_tx.send(Ok(()));
            worker.run(&mut session, &sender, &shutdown);
            Ok(())
        });

        match opened_rx.recv() {
            Ok(Ok(())) => Ok(feed),
            Ok(Err(e)) => {
                feed.stop();
                Err(e)
            }
            Err(_) => {
                feed.stop();
                Err(AttendanceError::Camera(
                    "live feed thread exited before opening the camera".to_string(),
                ))
            }
        }
    }

    pub fn spawn_source<S>(mut source: S, worker: LiveWorker) -> Self
    where
        S: FrameSource + Send + 'static,
    {
        Self::spawn_with(worker, move |worker, sender, shutdown| {
            worker.run(&mut source, &sender, &shutdown);
            Ok(())
        })
    }

    fn spawn_with<F>(worker: LiveWorker, body: F) -> Self
    where
        F: FnOnce(&LiveWorker, watch::Sender<Option<Bytes>>, Arc<AtomicBool>) -> Result<()> + Send + 'static,
    {
        let (sender, receiver) = watch::channel(None);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = std::thread::Builder::new()
            .name("live-feed".to_string())
            .spawn(move || {
                if let Err(e) = body(&worker, sender, flag) {
                    tracing::error!("Live feed stopped: {}", e);
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Could not start live feed thread: {}", e);
                None
            }
        };

        Self { shutdown, receiver, handle }
    }

    pub fn subscribe(&self) -> FrameReceiver {
        self.receiver.clone()
    }

    /// Flag checked by the worker between frames.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Live feed thread panicked");
            }
        }
        tracing::info!("Live feed stopped");
    }
}

impl LiveWorker {
    fn run(&self, source: &mut dyn FrameSource, sender: &watch::Sender<Option<Bytes>>, shutdown: &AtomicBool) {
        let every_n = u64::from(self.recognition.process_every_n_frames.max(1));
        let mut frame_index: u64 = 0;
        let mut consecutive_errors = 0;
        let mut outcomes: Vec<FaceOutcome> = Vec::new();

        tracing::info!("Live feed running, recognizing every {} frame(s)", every_n);

        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();

            let frame = match source.next_frame() {
                Ok(frame) => {
                    consecutive_errors = 0;
                    frame
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!("Frame capture failed ({}): {}", consecutive_errors, e);
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        tracing::error!("Too many capture failures, stopping live feed");
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                    continue;
                }
            };

            if frame_index % every_n == 0 {
                match self.recognize(&frame) {
                    Ok(faces) => outcomes = faces,
                    Err(e) => tracing::warn!("Recognition failed: {}", e),
                }
            }
            frame_index = frame_index.wrapping_add(1);

            match self.render(&frame, &outcomes) {
                Ok(jpeg) => {
                    sender.send_replace(Some(jpeg));
                }
                Err(e) => tracing::warn!("Could not encode frame: {}", e),
            }

            if let Some(rest) = MIN_FRAME_INTERVAL.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }

    fn recognize(&self, frame: &DynamicImage) -> Result<Vec<FaceOutcome>> {
        let gallery = self.gallery.snapshot()?;
        let report = self
            .pipeline
            .process_frame(frame, &gallery, &self.store, self.pipeline.now())?;

        for face in report.faces.iter().filter(|f| f.recorded) {
            tracing::info!(
                "Marked {} ({}) {}",
                face.name.as_deref().unwrap_or("?"),
                face.student_id.as_deref().unwrap_or("?"),
                face.status.map(|s| s.as_str()).unwrap_or("present")
            );
        }
        Ok(report.faces)
    }

    fn render(&self, frame: &DynamicImage, outcomes: &[FaceOutcome]) -> Result<Bytes> {
        let annotated = annotate_faces(frame, outcomes.iter().map(|o| (&o.face, o.is_recognized())));
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.recognition.jpeg_quality).encode_image(&annotated)?;
        Ok(Bytes::from(buf))
    }
}

/// One part of a `multipart/x-mixed-replace; boundary=frame` body.
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n");
    part.extend_from_slice(format!("Content-Length: {}\r\n\r\n", jpeg.len()).as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}
