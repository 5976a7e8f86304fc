use crate::common::{AttendanceError, Result};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Relative model paths are looked up under the models directory.
pub fn resolve_model_path(path: &Path, models_dir: &Path) -> PathBuf {
    if path.is_relative() {
        models_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

pub fn load_session(
    name: &str,
    model_path: &Path,
    optimization_level: u32,
) -> Result<(Arc<Environment>, Session)> {
    if !model_path.exists() {
        return Err(AttendanceError::Model(format!(
            "{} model not found at: {:?}", name, model_path
        )));
    }

    let environment = Arc::new(
        Environment::builder()
            .with_name(name)
            .build()
            .map_err(|e| AttendanceError::Model(format!("Failed to create environment: {}", e)))?,
    );

    let opt_level = match optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    };

    let session = SessionBuilder::new(&environment)?
        .with_optimization_level(opt_level)?
        .with_model_from_file(model_path)?;

    tracing::info!("Loaded {} model from {}", name, model_path.display());
    Ok((environment, session))
}
