use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{MediaConfig, TranscriberConfig};
use crate::error::{DubError, Result};
use crate::media::MediaToolkit;
use crate::paths::PathManager;
use crate::transcribe::Transcriber;
use crate::transcribe::common::{
    PollPolicy, Sleeper, TokioSleeper, TranscriptPayload, Utterance, map_completed_payload,
    poll_until_complete,
};

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: Option<String>,
}

/// Client for the asynchronous AssemblyAI-style transcription API:
/// upload the audio, create a transcript job, poll it to completion.
pub struct AssemblyTranscriber {
    client: Client,
    config: TranscriberConfig,
    media: MediaToolkit,
    paths: PathManager,
    sleeper: Box<dyn Sleeper>,
}

impl AssemblyTranscriber {
    pub fn new(config: TranscriberConfig, media: MediaConfig, paths: PathManager) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("HTTP client creation should not fail");

        Self {
            client,
            config,
            media: MediaToolkit::new(media),
            paths,
            sleeper: Box::new(TokioSleeper),
        }
    }

    /// Upload the audio file, returning the service-hosted URL.
    async fn upload_audio(&self, audio_path: &Path, api_key: &str) -> Result<String> {
        let size = std::fs::metadata(audio_path).map(|m| m.len()).unwrap_or(0);
        info!(
            "Uploading audio file: {} ({:.2} KB)",
            audio_path.display(),
            size as f64 / 1024.0
        );

        let body = tokio::fs::read(audio_path).await?;
        let response = self
            .client
            .post(format!("{}/upload", self.config.endpoint))
            .header("authorization", api_key)
            .body(body)
            .send()
            .await
            .map_err(|e| DubError::Transcription(format!("audio upload failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DubError::Transcription(format!(
                "audio upload rejected with HTTP {}: {}",
                status, text
            )));
        }

        let upload: UploadResponse = response
            .json()
            .await
            .map_err(|e| DubError::Transcription(format!("invalid upload response: {}", e)))?;

        debug!("Upload URL obtained: {}", upload.upload_url);
        Ok(upload.upload_url)
    }

    /// Create the transcription job. Failure to obtain a job id is
    /// fatal; this call is not retried.
    async fn submit_job(&self, audio_url: &str, language: &str, api_key: &str) -> Result<String> {
        let mut request = json!({
            "audio_url": audio_url,
            "language_code": language,
            "punctuate": true,
            "format_text": true,
            "speaker_labels": true,
        });

        if let Some(expected) = self.config.speakers_expected {
            if expected > 1 {
                request["speakers_expected"] = json!(expected);
                info!("Enabling speaker diarization (expected: {})", expected);
            }
        }

        if self.config.detailed {
            request["disfluencies"] = json!(true);
        }

        info!("Submitting transcription job...");
        debug!("Transcription request: {}", request);

        let response = self
            .client
            .post(format!("{}/transcript", self.config.endpoint))
            .header("authorization", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DubError::Transcription(format!("job submission failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DubError::Transcription(format!(
                "job submission rejected with HTTP {}: {}",
                status, text
            )));
        }

        let submit: SubmitResponse = response
            .json()
            .await
            .map_err(|e| DubError::Transcription(format!("invalid submission response: {}", e)))?;

        let id = submit.id.filter(|id| !id.is_empty()).ok_or_else(|| {
            DubError::Transcription("service did not return a transcript id".to_string())
        })?;

        info!("Transcription job submitted. ID: {}", id);
        Ok(id)
    }

    async fn fetch_job_status(&self, job_id: &str, api_key: &str) -> Result<TranscriptPayload> {
        let response = self
            .client
            .get(format!("{}/transcript/{}", self.config.endpoint, job_id))
            .header("authorization", api_key)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| DubError::Transcription(format!("status request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DubError::Transcription(format!(
                "status request rejected with HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DubError::Transcription(format!("invalid status payload: {}", e)))
    }

    /// The service works best with MP3; convert when the input is
    /// anything else. Returns the converted temp path, deleted by the
    /// caller's guard after use.
    async fn prepare_upload_file(&self, audio_path: &Path) -> Result<Option<PathBuf>> {
        let is_mp3 = audio_path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"));

        if is_mp3 {
            return Ok(None);
        }

        info!("Input audio is not MP3, converting for upload...");
        let converted = self.paths.temp_path("converted_audio", ".mp3");
        self.media.convert_to_mp3(audio_path, &converted).await?;
        Ok(Some(converted))
    }
}

#[async_trait]
impl Transcriber for AssemblyTranscriber {
    async fn transcribe(&self, audio_path: &Path, language: &str) -> Result<Vec<Utterance>> {
        if !audio_path.exists() {
            return Err(DubError::FileNotFound(audio_path.display().to_string()));
        }

        let api_key = self.config.resolve_api_key()?;

        let converted = self.prepare_upload_file(audio_path).await?;
        let _guard = converted.as_ref().map(|path| TempFileGuard(path.clone()));
        let upload_source = converted.as_deref().unwrap_or(audio_path);

        let audio_url = self.upload_audio(upload_source, &api_key).await?;
        let job_id = self.submit_job(&audio_url, language, &api_key).await?;

        let policy = PollPolicy {
            interval: Duration::from_secs(self.config.poll_interval_secs),
            max_attempts: self.config.max_poll_attempts,
        };

        info!("Polling for transcription results...");
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .expect("static spinner template is valid"),
        );
        spinner.set_message("Waiting for transcription...");
        spinner.enable_steady_tick(Duration::from_millis(250));

        let result = poll_until_complete(policy, self.sleeper.as_ref(), || {
            self.fetch_job_status(&job_id, &api_key)
        })
        .await;
        spinner.finish_and_clear();
        let payload = result?;

        info!("Transcription completed");
        let utterances = map_completed_payload(payload, &self.config.default_speaker_gender);
        info!("Transcription produced {} utterances", utterances.len());
        Ok(utterances)
    }
}

/// Deletes a temporary file when dropped, covering every exit path of
/// the transcription call.
struct TempFileGuard(PathBuf);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.0.exists() {
            match std::fs::remove_file(&self.0) {
                Ok(()) => debug!("Cleaned up temporary file: {}", self.0.display()),
                Err(e) => warn!("Could not delete temporary file {}: {}", self.0.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use assert_fs::TempDir;

    #[tokio::test]
    async fn test_missing_input_is_reported_as_missing_prerequisite() {
        let base = TempDir::new().unwrap();
        let paths = PathManager::new(base.path()).unwrap();
        let config = Config::default();
        let transcriber =
            AssemblyTranscriber::new(config.transcriber, config.media, paths);

        let err = transcriber
            .transcribe(Path::new("/nonexistent/audio.wav"), "en")
            .await
            .unwrap_err();

        assert!(matches!(err, DubError::FileNotFound(_)));
    }

    #[test]
    fn test_temp_file_guard_removes_file_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("converted.mp3");
        std::fs::write(&path, "audio").unwrap();

        {
            let _guard = TempFileGuard(path.clone());
        }
        assert!(!path.exists());
    }
}
