use std::path::PathBuf;
use std::fs;
use crate::common::config::Config;
use crate::common::error::Result;
use crate::common::paths;

/// Resolves where data lives: `./dev_data` in development mode, the system
/// (or per-user) data directory otherwise. Paths set explicitly in the config
/// always win.
#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        let base_dir = if enabled {
            PathBuf::from("./dev_data")
        } else {
            paths::data_dir()
        };

        if enabled {
            for sub in ["photos", "captures", "debug", "models"] {
                fs::create_dir_all(base_dir.join(sub))?;
            }
            tracing::info!("Development mode enabled - data will be saved to: {}", base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { enabled: true, base_dir }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn database_path(&self, config: &Config) -> PathBuf {
        config.storage.database_path.clone()
            .unwrap_or_else(|| self.base_dir.join("attendance.db"))
    }

    pub fn photos_dir(&self, config: &Config) -> PathBuf {
        config.storage.photos_dir.clone()
            .unwrap_or_else(|| self.base_dir.join("photos"))
    }

    pub fn models_dir(&self, config: &Config) -> PathBuf {
        if let Some(dir) = &config.storage.models_dir {
            return dir.clone();
        }
        if self.enabled {
            self.base_dir.join("models")
        } else {
            paths::system_models_dir()
        }
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.base_dir.join("captures")
    }

    pub fn debug_dir(&self) -> PathBuf {
        self.base_dir.join("debug")
    }

    pub fn get_capture_path(&self, prefix: &str) -> PathBuf {
        if self.enabled {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            self.captures_dir().join(format!("{}_{}.jpg", prefix, timestamp))
        } else {
            PathBuf::from(format!("{}.jpg", prefix))
        }
    }

    pub fn get_debug_path(&self, prefix: &str) -> PathBuf {
        if self.enabled {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            self.debug_dir().join(format!("{}_{}.jpg", prefix, timestamp))
        } else {
            PathBuf::from(format!("{}_debug.jpg", prefix))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_overrides_take_precedence() {
        let dev = DevMode::with_base_dir(PathBuf::from("/tmp/fa"));
        let mut config = Config::default();
        assert_eq!(dev.database_path(&config), PathBuf::from("/tmp/fa/attendance.db"));
        assert_eq!(dev.models_dir(&config), PathBuf::from("/tmp/fa/models"));

        config.storage.database_path = Some(PathBuf::from("/srv/school.db"));
        assert_eq!(dev.database_path(&config), PathBuf::from("/srv/school.db"));
    }
}
