use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

pub fn system_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/face-attendance")
}

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/face-attendance/attendance.toml")
}

pub fn system_models_dir() -> PathBuf {
    PathBuf::from("/usr/share/face-attendance/models")
}

/// Per-user data directory, e.g. `~/.local/share/face-attendance`.
pub fn user_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "face-attendance", "face-attendance").map(|dirs| dirs.data_dir().to_path_buf())
}

/// The system data directory when it is usable, the per-user one otherwise.
pub fn data_dir() -> PathBuf {
    let system = system_data_dir();
    if fs::create_dir_all(&system).is_ok() && is_writable(&system) {
        return system;
    }

    match user_data_dir() {
        Some(dir) => {
            tracing::debug!("{} not writable, using {}", system.display(), dir.display());
            dir
        }
        None => system,
    }
}

fn is_writable(dir: &Path) -> bool {
    let marker = dir.join(".write-test");
    let ok = fs::File::create(&marker).is_ok();
    let _ = fs::remove_file(&marker);
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_check() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_writable(dir.path()));
        assert!(!is_writable(&dir.path().join("missing")));
    }
}
