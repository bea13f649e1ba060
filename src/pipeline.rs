use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::acquire::{Acquirer, Acquisition};
use crate::config::Config;
use crate::error::{DubError, Result};
use crate::media::{MediaToolkit, validate_output};
use crate::paths::PathManager;
use crate::synth::{SpeechComposer, SynthesisEngineFactory};
use crate::sync::Synchronizer;
use crate::transcribe::{Transcriber, TranscriberFactory, Utterance};
use crate::translate::{Translator, TranslatorFactory};

/// Per-run state threaded through the stages. Holds the acquisition
/// result so later stages (and diagnostics) can reach the downloaded
/// file without any process-wide state.
#[derive(Debug, Default)]
pub struct RunContext {
    pub acquisition: Option<Acquisition>,
}

impl RunContext {
    pub fn last_acquired_path(&self) -> Option<&Path> {
        self.acquisition.as_ref().map(|a| a.path.as_path())
    }
}

/// Orchestrates the six pipeline stages strictly sequentially. Each
/// stage consumes the prior stage's artifact and produces exactly one
/// of its own, or fails the whole run with its stage error.
pub struct Pipeline {
    config: Config,
    paths: PathManager,
    media: MediaToolkit,
    acquirer: Acquirer,
    transcriber: Box<dyn Transcriber>,
    translator: Box<dyn Translator>,
    composer: SpeechComposer,
    synchronizer: Synchronizer,
}

impl Pipeline {
    pub async fn new(config: Config) -> Result<Self> {
        let paths = PathManager::new(&config.storage.base_dir)?;
        let media = MediaToolkit::new(config.media.clone());
        media.check_availability().await?;

        let acquirer = Acquirer::with_default_fetcher(config.acquire.clone());
        let transcriber = TranscriberFactory::create_default(
            config.transcriber.clone(),
            config.media.clone(),
            paths.clone(),
        );
        let translator = TranslatorFactory::create_default(config.translate.clone());
        let engine = SynthesisEngineFactory::create(&config.synthesis)?;
        let composer = SpeechComposer::new(
            engine,
            config.synthesis.clone(),
            config.media.clone(),
            paths.clone(),
        );
        let synchronizer =
            Synchronizer::new(config.sync.clone(), config.media.clone(), paths.clone());

        Ok(Self {
            config,
            paths,
            media,
            acquirer,
            transcriber,
            translator,
            composer,
            synchronizer,
        })
    }

    pub fn paths(&self) -> &PathManager {
        &self.paths
    }

    /// Run the full dubbing pipeline for one video URL. Temporary
    /// artifacts are cleaned up regardless of the outcome; old outputs
    /// are pruned only after a successful run.
    pub async fn run(
        &self,
        url: &str,
        source_lang: &str,
        target_lang: &str,
        keep_temp: bool,
    ) -> Result<PathBuf> {
        let result = self.run_stages(url, source_lang, target_lang).await;

        if keep_temp {
            info!("Skipping cleanup as requested");
        } else {
            self.paths.cleanup_temp();
            if result.is_ok() {
                self.paths
                    .cleanup_old_outputs(self.config.storage.keep_outputs);
            } else {
                info!("Skipping old output cleanup due to pipeline failure");
            }
        }

        result
    }

    async fn run_stages(
        &self,
        url: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<PathBuf> {
        let mut ctx = RunContext::default();

        info!("[step 1/6] Downloading video...");
        let acquisition = self.acquirer.acquire(url, &self.paths).await?;
        if !acquisition.failures.is_empty() {
            warn!(
                "Download needed {} fallback attempt(s) before succeeding",
                acquisition.failures.len()
            );
        }
        ctx.acquisition = Some(acquisition);
        let video_path = ctx
            .last_acquired_path()
            .ok_or_else(|| {
                DubError::Acquisition("acquisition produced no usable result".to_string())
            })?
            .to_path_buf();

        info!("[step 2/6] Extracting audio...");
        let audio_path = self.paths.temp_path("extracted_audio", ".wav");
        self.media.extract_audio(&video_path, &audio_path).await?;

        info!("[step 3/6] Transcribing audio (this may take a while)...");
        let utterances = self.transcriber.transcribe(&audio_path, source_lang).await?;
        if utterances.is_empty() {
            return Err(DubError::Transcription(
                "transcription returned no utterances".to_string(),
            ));
        }
        let transcript = flatten_transcript(&utterances);
        info!("Transcription complete: {} utterances", utterances.len());

        info!("[step 4/6] Translating text...");
        let translated = self
            .translator
            .translate(&transcript, source_lang, target_lang)
            .await?;
        if translated.trim().is_empty() {
            return Err(DubError::Translation(
                "translation returned empty text".to_string(),
            ));
        }

        info!("[step 5/6] Generating speech (this can take time)...");
        let tts_path = self.composer.synthesize(&translated, target_lang).await?;
        validate_output(&tts_path, 1, "Speech synthesis").map_err(DubError::Synthesis)?;

        info!("[step 6/6] Synchronizing video and audio...");
        let final_path = self.synchronizer.synchronize(&video_path, &tts_path).await?;

        info!("Pipeline finished successfully: {}", final_path.display());
        Ok(final_path)
    }

    /// Acquire a video without running the rest of the pipeline. The
    /// result is copied to `output` when given, since the download
    /// itself lands in the temp area.
    pub async fn download(&self, url: &str, output: Option<&Path>) -> Result<PathBuf> {
        let acquisition = self.acquirer.acquire(url, &self.paths).await?;

        match output {
            Some(target) => {
                tokio::fs::copy(&acquisition.path, target).await?;
                self.paths.cleanup_temp();
                Ok(target.to_path_buf())
            }
            None => Ok(acquisition.path),
        }
    }

    pub async fn extract_audio(&self, input: &Path, output: &Path) -> Result<()> {
        if !input.exists() {
            return Err(DubError::FileNotFound(input.display().to_string()));
        }
        self.media.extract_audio(input, output).await
    }

    pub async fn transcribe_audio(&self, input: &Path, language: &str) -> Result<Vec<Utterance>> {
        self.transcriber.transcribe(input, language).await
    }

    pub async fn translate_text(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String> {
        self.translator.translate(text, source_lang, target_lang).await
    }

    /// Synthesize speech for arbitrary text. Copied out of the temp
    /// area when an output path is given.
    pub async fn synthesize_speech(
        &self,
        text: &str,
        language: &str,
        output: Option<&Path>,
    ) -> Result<PathBuf> {
        let generated = self.composer.synthesize(text, language).await?;
        match output {
            Some(target) => {
                tokio::fs::copy(&generated, target).await?;
                self.paths.cleanup_temp();
                Ok(target.to_path_buf())
            }
            None => Ok(generated),
        }
    }

    pub async fn synchronize(&self, video: &Path, audio: &Path) -> Result<PathBuf> {
        self.synchronizer.synchronize(video, audio).await
    }
}

/// Build the flat transcript text fed to translation.
fn flatten_transcript(utterances: &[Utterance]) -> String {
    utterances
        .iter()
        .map(|u| u.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utterance(text: &str) -> Utterance {
        Utterance {
            speaker: "A".to_string(),
            text: text.to_string(),
            start: 0,
            end: 0,
            confidence: 1.0,
            words: Vec::new(),
            gender: "male".to_string(),
        }
    }

    #[test]
    fn test_flatten_transcript_joins_and_skips_empty() {
        let utterances = vec![utterance(" Hello. "), utterance(""), utterance("World.")];
        assert_eq!(flatten_transcript(&utterances), "Hello. World.");
    }

    #[test]
    fn test_run_context_exposes_last_acquired_path() {
        let mut ctx = RunContext::default();
        assert!(ctx.last_acquired_path().is_none());

        ctx.acquisition = Some(Acquisition {
            path: PathBuf::from("/tmp/video.mp4"),
            format_spec: "best".to_string(),
            failures: Vec::new(),
        });
        assert_eq!(
            ctx.last_acquired_path(),
            Some(Path::new("/tmp/video.mp4"))
        );
    }
}
