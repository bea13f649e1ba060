// Speech synthesis stage.
//
// The engine trait hides which neural backend renders a single text
// chunk; the composer above it owns chunking, per-chunk validation,
// merging with inter-chunk silence, and cleanup. Backends are selected
// once at configuration time through the factory.

pub mod bark;
pub mod tacotron;
pub mod xtts;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::chunk;
use crate::config::{MediaConfig, SynthesisBackend, SynthesisConfig};
use crate::error::{DubError, Result};
use crate::media::{MediaToolkit, validate_output};
use crate::paths::PathManager;

/// One neural synthesis backend. Implementations render exactly one
/// text chunk per call; chunking and merging are not their concern.
#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Practical input ceiling of the backend, in characters.
    fn max_chunk_chars(&self) -> usize;

    /// Render `text` as speech into `output_path` (WAV).
    async fn synthesize_chunk(
        &self,
        text: &str,
        language: &str,
        output_path: &Path,
    ) -> Result<()>;
}

/// Factory selecting the engine implementation from configuration.
pub struct SynthesisEngineFactory;

impl SynthesisEngineFactory {
    pub fn create(config: &SynthesisConfig) -> Result<Box<dyn SynthesisEngine>> {
        match config.backend {
            SynthesisBackend::Xtts => Ok(Box::new(xtts::XttsEngine::new(config)?)),
            SynthesisBackend::Tacotron => Ok(Box::new(tacotron::TacotronEngine::new(config))),
            SynthesisBackend::Bark => Ok(Box::new(bark::BarkEngine::new(config))),
        }
    }
}

/// Drives the chunker and the engine to produce one continuous audio
/// track from arbitrary text.
pub struct SpeechComposer {
    engine: Box<dyn SynthesisEngine>,
    config: SynthesisConfig,
    media: MediaToolkit,
    paths: PathManager,
}

impl SpeechComposer {
    pub fn new(
        engine: Box<dyn SynthesisEngine>,
        config: SynthesisConfig,
        media: MediaConfig,
        paths: PathManager,
    ) -> Self {
        Self {
            engine,
            config,
            media: MediaToolkit::new(media),
            paths,
        }
    }

    /// Synthesize `text` into a single WAV file. Chunk artifacts are
    /// deleted on every exit path; on failure no partial result leaks
    /// out.
    pub async fn synthesize(&self, text: &str, language: &str) -> Result<PathBuf> {
        let normalized = chunk::normalize_for_speech(text);
        let fragments = chunk::chunk_text_sliced(&normalized, self.engine.max_chunk_chars());

        if fragments.is_empty() {
            warn!("Text yielded no synthesizable fragments, producing silent placeholder");
            return self.silent_placeholder().await;
        }

        info!(
            "Generating speech with {} in {} chunks...",
            self.engine.name(),
            fragments.len()
        );

        let mut chunk_files: Vec<PathBuf> = Vec::with_capacity(fragments.len());
        let rendered = self
            .render_fragments(&fragments, language, &mut chunk_files)
            .await;

        let merged = match rendered {
            Ok(()) => self.merge_chunks(&chunk_files).await,
            Err(e) => Err(e),
        };

        for file in &chunk_files {
            if file.exists() {
                if let Err(e) = std::fs::remove_file(file) {
                    warn!("Could not delete chunk file {}: {}", file.display(), e);
                }
            }
        }

        merged
    }

    async fn render_fragments(
        &self,
        fragments: &[String],
        language: &str,
        chunk_files: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let progress = ProgressBar::new(fragments.len() as u64);
        progress.set_style(
            ProgressStyle::with_template("{bar:30} {pos}/{len} chunks")
                .expect("static progress template is valid"),
        );

        for (index, fragment) in fragments.iter().enumerate() {
            let chunk_number = index + 1;
            let output = self
                .paths
                .temp_path(&format!("tts_chunk_{}", chunk_number), ".wav");
            // Track the path before rendering so a failed call's
            // partial file is still cleaned up.
            chunk_files.push(output.clone());

            debug!(
                "Generating chunk {}/{}: '{}'",
                chunk_number,
                fragments.len(),
                fragment.chars().take(50).collect::<String>()
            );

            self.engine
                .synthesize_chunk(fragment, language, &output)
                .await
                .map_err(|e| {
                    DubError::Synthesis(format!(
                        "failed to generate speech for chunk {}: {}",
                        chunk_number, e
                    ))
                })?;

            validate_output(&output, self.config.min_chunk_bytes, "Speech synthesis").map_err(
                |_| {
                    DubError::Synthesis(format!(
                        "generated audio chunk {} is invalid or empty",
                        chunk_number
                    ))
                },
            )?;

            progress.inc(1);
        }

        progress.finish_and_clear();
        Ok(())
    }

    /// Merge chunk files in original order, inserting a fixed silence
    /// gap between consecutive chunks and none after the last. All
    /// inputs are resampled to one common format first so the concat
    /// filter accepts them.
    async fn merge_chunks(&self, chunk_files: &[PathBuf]) -> Result<PathBuf> {
        let output = self.paths.temp_path("tts_combined", ".wav");
        info!("Merging {} audio chunks into {}", chunk_files.len(), output.display());

        let gap_secs = self.config.gap_ms as f64 / 1000.0;
        let silence = self.paths.temp_path("tts_gap", ".wav");
        let needs_silence = chunk_files.len() > 1 && self.config.gap_ms > 0;
        if needs_silence {
            self.media
                .write_silence(gap_secs, &silence)
                .await
                .map_err(DubError::Synthesis)?;
        }

        let mut inputs: Vec<&Path> = Vec::new();
        for (index, file) in chunk_files.iter().enumerate() {
            if index > 0 && needs_silence {
                inputs.push(&silence);
            }
            inputs.push(file);
        }

        let mut filter = String::new();
        for index in 0..inputs.len() {
            filter.push_str(&format!(
                "[{i}:a]aformat=sample_fmts=s16:sample_rates=44100:channel_layouts=mono[a{i}];",
                i = index
            ));
        }
        for index in 0..inputs.len() {
            filter.push_str(&format!("[a{}]", index));
        }
        filter.push_str(&format!("concat=n={}:v=0:a=1[out]", inputs.len()));

        let mut command = self.media.command("Chunk merge");
        for input in &inputs {
            command = command.input(input);
        }
        let result = command
            .filter_complex(filter)
            .map("[out]")
            .audio_codec("pcm_s16le")
            .audio_sample_rate(44100)
            .audio_channels(1)
            .overwrite()
            .output(&output)
            .execute()
            .await
            .map_err(DubError::Synthesis);

        if silence.exists() {
            if let Err(e) = std::fs::remove_file(&silence) {
                warn!("Could not delete silence file {}: {}", silence.display(), e);
            }
        }
        result?;

        validate_output(&output, self.config.min_chunk_bytes, "Chunk merge")
            .map_err(DubError::Synthesis)?;
        info!("Successfully merged audio chunks");
        Ok(output)
    }

    /// Downstream stages always need a valid artifact; whitespace-only
    /// input produces a short silent track instead of an error.
    async fn silent_placeholder(&self) -> Result<PathBuf> {
        let output = self.paths.temp_path("tts_silent_output", ".wav");
        self.media
            .write_silence(0.1, &output)
            .await
            .map_err(DubError::Synthesis)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use assert_fs::TempDir;
    use std::sync::{Arc, Mutex};

    /// Engine fake that writes canned bytes per chunk and records the
    /// fragments it was asked to render.
    struct ScriptedEngine {
        rendered: Arc<Mutex<Vec<String>>>,
        /// Chunk index (1-based) that produces an undersized file.
        failing_chunk: Option<usize>,
    }

    impl ScriptedEngine {
        fn new(failing_chunk: Option<usize>) -> (Self, Arc<Mutex<Vec<String>>>) {
            let rendered = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    rendered: rendered.clone(),
                    failing_chunk,
                },
                rendered,
            )
        }
    }

    #[async_trait]
    impl SynthesisEngine for ScriptedEngine {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn max_chunk_chars(&self) -> usize {
            30
        }

        async fn synthesize_chunk(
            &self,
            text: &str,
            _language: &str,
            output_path: &Path,
        ) -> Result<()> {
            let mut rendered = self.rendered.lock().unwrap();
            rendered.push(text.to_string());
            let index = rendered.len();
            let bytes = if self.failing_chunk == Some(index) {
                vec![0u8; 10]
            } else {
                vec![0u8; 512]
            };
            std::fs::write(output_path, bytes).unwrap();
            Ok(())
        }
    }

    fn composer_with(engine: ScriptedEngine) -> (TempDir, SpeechComposer) {
        let base = TempDir::new().unwrap();
        let paths = PathManager::new(base.path()).unwrap();
        let config = Config::default();
        let composer = SpeechComposer::new(
            Box::new(engine),
            config.synthesis,
            config.media,
            paths,
        );
        (base, composer)
    }

    fn temp_chunk_files(base: &TempDir) -> Vec<String> {
        walkdir::WalkDir::new(base.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("tts_chunk_"))
            .collect()
    }

    // Three sentences that each exceed half the 30-char engine limit,
    // so every one becomes its own chunk.
    const THREE_CHUNK_TEXT: &str =
        "Aaaaa bbbbb ccccc ddddd. Eeeee fffff ggggg hhhhh. Iiiii jjjjj kkkkk lllll.";

    #[tokio::test]
    async fn test_failing_chunk_aborts_and_cleans_up() {
        let (engine, rendered) = ScriptedEngine::new(Some(2));
        let (base, composer) = composer_with(engine);

        let err = composer.synthesize(THREE_CHUNK_TEXT, "de").await.unwrap_err();

        match err {
            DubError::Synthesis(message) => {
                assert!(message.contains("chunk 2"), "got: {}", message);
            }
            other => panic!("expected synthesis error, got {:?}", other),
        }

        // The engine stopped at the failing chunk; no third call.
        assert_eq!(rendered.lock().unwrap().len(), 2);
        // Cleanup invariant: no chunk temp files survive the failure.
        assert!(temp_chunk_files(&base).is_empty());
        // No partial merged output either.
        let combined: Vec<_> = walkdir::WalkDir::new(base.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("tts_combined")
            })
            .collect();
        assert!(combined.is_empty());
    }

    #[tokio::test]
    async fn test_fragments_rendered_in_order() {
        let (engine, rendered) = ScriptedEngine::new(None);
        let (base, composer) = composer_with(engine);

        // The merge step shells out to ffmpeg, which is unavailable in
        // unit tests; rendering order and chunk cleanup are still
        // observable regardless of the merge outcome.
        let _ = composer.synthesize(THREE_CHUNK_TEXT, "de").await;

        let log = rendered.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0], "Aaaaa bbbbb ccccc ddddd.");
        assert_eq!(log[1], "Eeeee fffff ggggg hhhhh.");
        assert_eq!(log[2], "Iiiii jjjjj kkkkk lllll.");
        drop(log);

        assert!(temp_chunk_files(&base).is_empty());
    }
}
