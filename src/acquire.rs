//! Video acquisition with a descending ladder of format specifications.
//! Each rung drives the external retrieval tool against a fresh working
//! directory; the first rung that yields a plausible media file wins,
//! and every failure along the way is kept for the final error report.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::AcquireConfig;
use crate::error::{DubError, Result};
use crate::paths::PathManager;

#[cfg(test)]
use mockall::automock;

const KNOWN_VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi", "flv"];
const MIN_VIDEO_BYTES: u64 = 1024;

/// What the retrieval tool reported about a finished download.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// Extension of the file the tool claims to have written.
    pub reported_ext: Option<String>,
}

/// External video retrieval collaborator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VideoFetcher: Send + Sync {
    /// Download `url` with the given format specification into
    /// `work_dir`. The directory is empty and dedicated to this attempt.
    async fn fetch(&self, url: &str, format_spec: &str, work_dir: &Path) -> Result<FetchReport>;
}

/// Production fetcher driving the yt-dlp binary.
pub struct YtDlpFetcher {
    config: AcquireConfig,
}

impl YtDlpFetcher {
    pub fn new(config: AcquireConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl VideoFetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str, format_spec: &str, work_dir: &Path) -> Result<FetchReport> {
        let template = work_dir.join("%(title)s.%(ext)s");

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg(url)
            .arg("-f")
            .arg(format_spec)
            .arg("-o")
            .arg(&template)
            .arg("--no-playlist")
            .arg("--quiet")
            .arg("--no-warnings")
            .arg("--user-agent")
            .arg(&self.config.user_agent)
            .arg("--retries")
            .arg(self.config.download_retries.to_string())
            .arg("--fragment-retries")
            .arg(self.config.fragment_retries.to_string())
            .arg("--extractor-retries")
            .arg(self.config.extractor_retries.to_string())
            .arg("--no-simulate")
            .arg("--print")
            .arg("after_move:filepath");

        if self.config.no_check_certificate {
            cmd.arg("--no-check-certificate");
        }

        debug!("Invoking {} for format '{}'", self.config.binary_path, format_spec);

        let output = cmd.output().await.map_err(|e| {
            DubError::Acquisition(format!(
                "failed to execute {}: {}",
                self.config.binary_path, e
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DubError::Acquisition(stderr.trim().to_string()));
        }

        // The tool prints the final path of the merged file; its
        // extension tells us what to look for when locating the output.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let reported_ext = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| {
                Path::new(line.trim())
                    .extension()
                    .map(|ext| ext.to_string_lossy().into_owned())
            });

        Ok(FetchReport { reported_ext })
    }
}

/// Result of a successful acquisition, threaded through the pipeline
/// run context instead of any process-wide state.
#[derive(Debug, Clone)]
pub struct Acquisition {
    /// Path of the downloaded media file.
    pub path: PathBuf,
    /// Format specification of the rung that succeeded.
    pub format_spec: String,
    /// Error messages of every rung tried before the successful one.
    pub failures: Vec<String>,
}

pub struct Acquirer {
    fetcher: Box<dyn VideoFetcher>,
    config: AcquireConfig,
}

impl Acquirer {
    pub fn new(fetcher: Box<dyn VideoFetcher>, config: AcquireConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn with_default_fetcher(config: AcquireConfig) -> Self {
        let fetcher = Box::new(YtDlpFetcher::new(config.clone()));
        Self::new(fetcher, config)
    }

    /// Try each rung of the format ladder in order and return the first
    /// playable result. Fails only after every rung has been tried.
    pub async fn acquire(&self, url: &str, paths: &PathManager) -> Result<Acquisition> {
        info!("Acquiring video: {}", url);
        let mut failures: Vec<String> = Vec::new();

        for (index, rung) in self.config.format_ladder.iter().enumerate() {
            info!(
                "Download attempt {}/{} with format '{}' ({})",
                index + 1,
                self.config.format_ladder.len(),
                rung.description,
                rung.spec
            );

            let work_dir = paths.temp_subdir(&format!("video_dl_{}", index + 1))?;

            match self.fetcher.fetch(url, &rung.spec, &work_dir).await {
                Ok(report) => {
                    match locate_output(&work_dir, report.reported_ext.as_deref()) {
                        Ok(path) => {
                            info!(
                                "Download successful with format '{}': {}",
                                rung.description,
                                path.display()
                            );
                            return Ok(Acquisition {
                                path,
                                format_spec: rung.spec.clone(),
                                failures,
                            });
                        }
                        Err(reason) => {
                            warn!("Attempt '{}' failed: {}", rung.description, reason);
                            failures.push(format!("{}: {}", rung.description, reason));
                            clear_partial_artifacts(&work_dir);
                        }
                    }
                }
                Err(e) => {
                    warn!("Attempt '{}' failed: {}", rung.description, e);
                    failures.push(format!("{}: {}", rung.description, e));
                    clear_partial_artifacts(&work_dir);
                }
            }
        }

        Err(DubError::Acquisition(format!(
            "all {} download attempts failed for {}:\n - {}",
            self.config.format_ladder.len(),
            url,
            failures.join("\n - ")
        )))
    }
}

/// Find the downloaded media file in a rung's working directory.
/// Prefers the extension the tool reported, falls back to scanning for
/// known video extensions, and resolves ties by taking the largest
/// file. A file at or under 1 KiB is rejected as a failed download.
fn locate_output(work_dir: &Path, reported_ext: Option<&str>) -> std::result::Result<PathBuf, String> {
    let mut candidates = files_with_extension(work_dir, reported_ext.into_iter().collect());

    if candidates.is_empty() {
        candidates = files_with_extension(work_dir, KNOWN_VIDEO_EXTENSIONS.to_vec());
        if let Some(first) = candidates.first() {
            warn!(
                "Downloaded file has unexpected extension: {}",
                first.display()
            );
        }
    }

    let best = candidates
        .into_iter()
        .max_by_key(|path| std::fs::metadata(path).map(|m| m.len()).unwrap_or(0))
        .ok_or_else(|| format!("no media file found in {}", work_dir.display()))?;

    let size = std::fs::metadata(&best).map(|m| m.len()).unwrap_or(0);
    if size <= MIN_VIDEO_BYTES {
        return Err(format!(
            "downloaded file {} is suspiciously small ({} bytes)",
            best.display(),
            size
        ));
    }

    Ok(best)
}

fn files_with_extension(work_dir: &Path, extensions: Vec<&str>) -> Vec<PathBuf> {
    WalkDir::new(work_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    extensions
                        .iter()
                        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
                })
        })
        .collect()
}

/// Delete leftover files from a failed attempt, keeping resumable
/// `.part` files so a later rung can pick them up.
fn clear_partial_artifacts(work_dir: &Path) {
    let entries = match std::fs::read_dir(work_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_file() && path.extension().is_none_or(|ext| ext != "part") {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Could not delete partial artifact {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use assert_fs::TempDir;

    fn test_paths() -> (TempDir, PathManager) {
        let base = TempDir::new().unwrap();
        let manager = PathManager::new(base.path()).unwrap();
        (base, manager)
    }

    fn write_video(work_dir: &Path, name: &str, bytes: usize) {
        std::fs::write(work_dir.join(name), vec![0u8; bytes]).unwrap();
    }

    #[tokio::test]
    async fn test_ladder_falls_through_to_third_rung() {
        let (_base, paths) = test_paths();
        let mut fetcher = MockVideoFetcher::new();
        let mut call = 0u32;
        fetcher.expect_fetch().times(3).returning(move |_, _, work_dir| {
            call += 1;
            if call < 3 {
                Err(DubError::Acquisition(format!("rung {} refused", call)))
            } else {
                write_video(work_dir, "clip.mp4", 4096);
                Ok(FetchReport {
                    reported_ext: Some("mp4".to_string()),
                })
            }
        });

        let acquirer = Acquirer::new(Box::new(fetcher), Config::default().acquire);
        let result = acquirer.acquire("https://example.com/v", &paths).await.unwrap();

        assert!(result.path.ends_with("clip.mp4"));
        assert_eq!(result.format_spec, "best");
        assert_eq!(result.failures.len(), 2);
        assert!(result.failures[0].contains("rung 1 refused"));
        assert!(result.failures[1].contains("rung 2 refused"));
    }

    #[tokio::test]
    async fn test_all_rungs_failing_reports_every_error() {
        let (_base, paths) = test_paths();
        let mut fetcher = MockVideoFetcher::new();
        fetcher
            .expect_fetch()
            .times(3)
            .returning(|_, spec, _| Err(DubError::Acquisition(format!("no stream for {}", spec))));

        let acquirer = Acquirer::new(Box::new(fetcher), Config::default().acquire);
        let err = acquirer.acquire("https://example.com/v", &paths).await.unwrap_err();

        match err {
            DubError::Acquisition(message) => {
                assert!(message.contains("all 3 download attempts failed"));
                assert!(message.contains("Best MP4 video+audio"));
                assert!(message.contains("Best available single file"));
            }
            other => panic!("expected acquisition error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_small_file_is_treated_as_rung_failure() {
        let (_base, paths) = test_paths();
        let mut fetcher = MockVideoFetcher::new();
        let mut call = 0u32;
        fetcher.expect_fetch().times(2).returning(move |_, _, work_dir| {
            call += 1;
            let bytes = if call == 1 { 100 } else { 8192 };
            write_video(work_dir, "clip.mp4", bytes);
            Ok(FetchReport {
                reported_ext: Some("mp4".to_string()),
            })
        });

        let mut config = Config::default().acquire;
        config.format_ladder.truncate(2);
        let acquirer = Acquirer::new(Box::new(fetcher), config);
        let result = acquirer.acquire("https://example.com/v", &paths).await.unwrap();

        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].contains("suspiciously small"));
    }

    #[test]
    fn test_locate_output_prefers_largest_candidate() {
        let dir = TempDir::new().unwrap();
        write_video(dir.path(), "stray.mp4", 2048);
        write_video(dir.path(), "full.mp4", 65536);

        let found = locate_output(dir.path(), Some("mp4")).unwrap();
        assert!(found.ends_with("full.mp4"));
    }

    #[test]
    fn test_locate_output_falls_back_to_known_extensions() {
        let dir = TempDir::new().unwrap();
        write_video(dir.path(), "clip.webm", 4096);

        let found = locate_output(dir.path(), Some("mp4")).unwrap();
        assert!(found.ends_with("clip.webm"));
    }

    #[test]
    fn test_clear_partial_artifacts_keeps_resumable_files() {
        let dir = TempDir::new().unwrap();
        write_video(dir.path(), "broken.mp4", 10);
        write_video(dir.path(), "resume.mp4.part", 10);

        clear_partial_artifacts(dir.path());
        assert!(!dir.path().join("broken.mp4").exists());
        assert!(dir.path().join("resume.mp4.part").exists());
    }
}
