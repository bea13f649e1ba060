use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DubError, Result};

/// Hands out collision-free temporary and output paths under one base
/// directory and owns cleanup of everything it handed out. Every stage
/// obtains its scratch paths here; nothing writes outside the base
/// directory except the final copy requested by the user.
#[derive(Debug, Clone)]
pub struct PathManager {
    base_dir: PathBuf,
    temp_dir: PathBuf,
    output_dir: PathBuf,
}

impl PathManager {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let temp_dir = base_dir.join("temp");
        let output_dir = base_dir.join("output");

        for dir in [&base_dir, &temp_dir, &output_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                DubError::Config(format!(
                    "Could not create working directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        info!(
            "Path manager initialized: temp='{}', output='{}'",
            temp_dir.display(),
            output_dir.display()
        );

        Ok(Self {
            base_dir,
            temp_dir,
            output_dir,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Unique temporary file path. The file itself is not created.
    pub fn temp_path(&self, prefix: &str, extension: &str) -> PathBuf {
        let filename = format!(
            "{}_{}{}",
            sanitize_filename_part(prefix),
            Uuid::new_v4().simple(),
            normalize_extension(extension)
        );
        let path = self.temp_dir.join(filename);
        debug!("Generated temp path: {}", path.display());
        path
    }

    /// Fresh temporary subdirectory, created on the spot. Used by the
    /// acquisition ladder, which needs an empty working directory per
    /// attempt.
    pub fn temp_subdir(&self, prefix: &str) -> Result<PathBuf> {
        let dir = self.temp_dir.join(format!(
            "{}_{}",
            sanitize_filename_part(prefix),
            Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&dir)?;
        debug!("Created temp directory: {}", dir.display());
        Ok(dir)
    }

    /// Unique output file path with a human-readable timestamp.
    pub fn output_path(&self, prefix: &str, extension: &str) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let filename = format!(
            "{}_{}{}",
            sanitize_filename_part(prefix),
            timestamp,
            normalize_extension(extension)
        );
        let path = self.output_dir.join(filename);
        debug!("Generated output path: {}", path.display());
        path
    }

    /// Delete everything under the temp directory. Failures are logged
    /// and never escalated; cleanup runs after errors too.
    pub fn cleanup_temp(&self) {
        info!("Cleaning up temporary directory: {}", self.temp_dir.display());
        let entries = match std::fs::read_dir(&self.temp_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not read temp directory for cleanup: {}", e);
                return;
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => debug!("Deleted temp item: {}", path.display()),
                Err(e) => warn!("Could not delete temp item {}: {}", path.display(), e),
            }
        }
    }

    /// Keep only the newest `keep` files in the output directory.
    pub fn cleanup_old_outputs(&self, keep: usize) {
        if keep == 0 {
            return;
        }

        let entries = match std::fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not read output directory for cleanup: {}", e);
                return;
            }
        };

        let mut files: Vec<(PathBuf, std::time::SystemTime)> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter_map(|p| {
                let modified = std::fs::metadata(&p).and_then(|m| m.modified()).ok()?;
                Some((p, modified))
            })
            .collect();

        if files.len() <= keep {
            return;
        }

        // Oldest first.
        files.sort_by_key(|(_, modified)| *modified);
        let excess = files.len() - keep;
        info!("Pruning {} old output files (keeping {})", excess, keep);
        for (path, _) in files.into_iter().take(excess) {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Could not delete old output file {}: {}", path.display(), e);
            }
        }
    }
}

fn sanitize_filename_part(part: &str) -> String {
    let mut sanitized = String::with_capacity(part.len());
    let mut last_was_separator = false;
    for c in part.chars() {
        let mapped = match c {
            '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() || c.is_whitespace() => '_',
            c => c,
        };
        if mapped == '_' {
            if !last_was_separator {
                sanitized.push('_');
            }
            last_was_separator = true;
        } else {
            sanitized.push(mapped);
            last_was_separator = false;
        }
    }
    sanitized.chars().take(100).collect()
}

fn normalize_extension(extension: &str) -> String {
    if extension.is_empty() || extension.starts_with('.') {
        extension.to_string()
    } else {
        format!(".{}", extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;

    #[test]
    fn test_creates_directory_layout() {
        let base = TempDir::new().unwrap();
        let manager = PathManager::new(base.path().join("work")).unwrap();
        assert!(manager.base_dir().join("temp").is_dir());
        assert!(manager.base_dir().join("output").is_dir());
    }

    #[test]
    fn test_temp_paths_are_unique() {
        let base = TempDir::new().unwrap();
        let manager = PathManager::new(base.path()).unwrap();
        let a = manager.temp_path("chunk", ".wav");
        let b = manager.temp_path("chunk", ".wav");
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with(".wav"));
    }

    #[test]
    fn test_sanitizes_prefixes() {
        let base = TempDir::new().unwrap();
        let manager = PathManager::new(base.path()).unwrap();
        let path = manager.temp_path("my video: part/2", "wav");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("my_video_part_2_"), "got {}", name);
        assert!(name.ends_with(".wav"));
    }

    #[test]
    fn test_cleanup_temp_removes_files_and_dirs() {
        let base = TempDir::new().unwrap();
        let manager = PathManager::new(base.path()).unwrap();

        let file = manager.temp_path("scratch", ".txt");
        std::fs::write(&file, "x").unwrap();
        let dir = manager.temp_subdir("rung").unwrap();
        std::fs::write(dir.join("partial.mp4"), "y").unwrap();

        manager.cleanup_temp();
        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_cleanup_old_outputs_keeps_newest() {
        let base = TempDir::new().unwrap();
        let manager = PathManager::new(base.path()).unwrap();
        let output_dir = manager.base_dir().join("output");

        for i in 0..5 {
            let path = output_dir.join(format!("video_{}.mp4", i));
            std::fs::write(&path, "data").unwrap();
            let mtime = std::time::SystemTime::now() - std::time::Duration::from_secs(100 - i);
            let file = std::fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(mtime).unwrap();
        }

        manager.cleanup_old_outputs(2);
        let remaining: Vec<_> = std::fs::read_dir(&output_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&"video_3.mp4".to_string()));
        assert!(remaining.contains(&"video_4.mp4".to_string()));
    }
}
