use crate::common::{AttendanceError, Config, Result};
use crate::core::pipeline::{self, RecognitionPipeline};
use crate::core::{FaceEngine, Gallery, SharedGallery};
use crate::service::error::ApiError;
use crate::service::live::FrameReceiver;
use crate::storage::AttendanceStore;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handles for every handler and the camera thread.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Mutex<AttendanceStore>>,
    pub gallery: Arc<SharedGallery>,
    pub pipeline: Arc<RecognitionPipeline>,
    pub photos_dir: Option<PathBuf>,
    pub live: Option<FrameReceiver>,
}

impl AppState {
    /// Build state and load the gallery from the store.
    pub fn new(
        config: Config,
        store: AttendanceStore,
        engine: Arc<dyn FaceEngine>,
        photos_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let gallery = SharedGallery::default();
        pipeline::reload_gallery(&store, &gallery)?;
        let pipeline = RecognitionPipeline::new(engine, &config)?;

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(Mutex::new(store)),
            gallery: Arc::new(gallery),
            pipeline: Arc::new(pipeline),
            photos_dir,
            live: None,
        })
    }

    pub fn with_live_feed(mut self, receiver: FrameReceiver) -> Self {
        self.live = Some(receiver);
        self
    }

    pub fn store(&self) -> Result<MutexGuard<'_, AttendanceStore>> {
        self.store
            .lock()
            .map_err(|_| AttendanceError::Storage("store lock poisoned".to_string()))
    }

    /// Current gallery. Safe to hold while locking the store.
    pub fn gallery(&self) -> Result<Arc<Gallery>> {
        self.gallery.snapshot()
    }

    /// The live feed, if the camera thread is still publishing frames.
    pub fn live_feed(&self) -> Option<FrameReceiver> {
        self.live
            .as_ref()
            .filter(|receiver| receiver.has_changed().is_ok())
            .cloned()
    }

    pub fn engine(&self) -> &dyn FaceEngine {
        self.pipeline.engine().as_ref()
    }

    /// Run store or model work off the async executor.
    pub async fn blocking<F, T>(&self, f: F) -> std::result::Result<T, ApiError>
    where
        F: FnOnce(&AppState) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.clone();
        tokio::task::spawn_blocking(move || f(&state))
            .await
            .map_err(|e| ApiError::internal(format!("blocking task failed: {}", e)))?
            .map_err(ApiError::from)
    }
}
