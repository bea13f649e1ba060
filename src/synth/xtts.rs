use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use crate::config::SynthesisConfig;
use crate::error::{DubError, Result};
use crate::synth::SynthesisEngine;

/// Voice-cloning backend. Requires a short mono WAV as the reference
/// voice; a missing reference is a configuration error detected at
/// construction, never retried at runtime.
#[derive(Debug)]
pub struct XttsEngine {
    binary_path: String,
    model: String,
    voice_reference: PathBuf,
    max_chunk_chars: usize,
}

impl XttsEngine {
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        let voice_reference = config.voice_reference.clone().ok_or_else(|| {
            DubError::Config(
                "voice-cloning synthesis requires a reference voice sample \
                 (set [synthesis] voice_reference)"
                    .to_string(),
            )
        })?;

        if !voice_reference.is_file() {
            return Err(DubError::Config(format!(
                "reference voice sample not found: {}",
                voice_reference.display()
            )));
        }

        let is_wav = voice_reference
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        if !is_wav {
            return Err(DubError::Config(format!(
                "reference voice sample must be a WAV file: {}",
                voice_reference.display()
            )));
        }

        Ok(Self {
            binary_path: config.binary_path.clone(),
            model: config.xtts_model.clone(),
            voice_reference,
            max_chunk_chars: config.max_chunk_chars,
        })
    }
}

#[async_trait]
impl SynthesisEngine for XttsEngine {
    fn name(&self) -> &'static str {
        "xtts"
    }

    fn max_chunk_chars(&self) -> usize {
        self.max_chunk_chars
    }

    async fn synthesize_chunk(
        &self,
        text: &str,
        language: &str,
        output_path: &Path,
    ) -> Result<()> {
        debug!("xtts chunk: {} chars", text.chars().count());

        let output = Command::new(&self.binary_path)
            .arg("--model_name")
            .arg(&self.model)
            .arg("--text")
            .arg(text)
            .arg("--language_idx")
            .arg(language)
            .arg("--speaker_wav")
            .arg(&self.voice_reference)
            .arg("--out_path")
            .arg(output_path)
            .output()
            .await
            .map_err(|e| {
                DubError::Synthesis(format!("failed to execute {}: {}", self.binary_path, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DubError::Synthesis(format!(
                "synthesis engine failed: {}",
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use assert_fs::TempDir;

    #[test]
    fn test_missing_reference_is_a_config_error() {
        let config = Config::default().synthesis;
        let err = XttsEngine::new(&config).unwrap_err();
        assert!(matches!(err, DubError::Config(_)));
    }

    #[test]
    fn test_non_wav_reference_rejected() {
        let dir = TempDir::new().unwrap();
        let reference = dir.path().join("voice.mp3");
        std::fs::write(&reference, "x").unwrap();

        let mut config = Config::default().synthesis;
        config.voice_reference = Some(reference);
        let err = XttsEngine::new(&config).unwrap_err();
        assert!(matches!(err, DubError::Config(_)));
    }

    #[test]
    fn test_valid_reference_accepted() {
        let dir = TempDir::new().unwrap();
        let reference = dir.path().join("voice.wav");
        std::fs::write(&reference, "x").unwrap();

        let mut config = Config::default().synthesis;
        config.voice_reference = Some(reference);
        let engine = XttsEngine::new(&config).unwrap();
        assert_eq!(engine.max_chunk_chars(), 250);
    }
}
