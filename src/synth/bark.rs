use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use crate::config::SynthesisConfig;
use crate::error::{DubError, Result};
use crate::synth::SynthesisEngine;

/// Prompt-voice backend. The voice comes from a named history prompt
/// rather than a reference sample, and the model degrades on long
/// inputs, so it uses a tighter chunk ceiling.
pub struct BarkEngine {
    binary_path: String,
    model: String,
    voice_prompt: String,
    max_chunk_chars: usize,
}

impl BarkEngine {
    pub fn new(config: &SynthesisConfig) -> Self {
        Self {
            binary_path: config.binary_path.clone(),
            model: config.bark_model.clone(),
            voice_prompt: config.bark_voice_prompt.clone(),
            max_chunk_chars: config.bark_max_chunk_chars,
        }
    }
}

#[async_trait]
impl SynthesisEngine for BarkEngine {
    fn name(&self) -> &'static str {
        "bark"
    }

    fn max_chunk_chars(&self) -> usize {
        self.max_chunk_chars
    }

    async fn synthesize_chunk(
        &self,
        text: &str,
        _language: &str,
        output_path: &Path,
    ) -> Result<()> {
        let output = Command::new(&self.binary_path)
            .arg("--model_name")
            .arg(&self.model)
            .arg("--text")
            .arg(text)
            .arg("--speaker_idx")
            .arg(&self.voice_prompt)
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

    #[test]
    fn test_bark_uses_tighter_chunk_ceiling() {
        let config = Config::default().synthesis;
        let engine = BarkEngine::new(&config);
        assert_eq!(engine.max_chunk_chars(), 150);
        assert!(engine.max_chunk_chars() < config.max_chunk_chars);
    }
}
