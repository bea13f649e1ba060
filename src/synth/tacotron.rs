use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use crate::config::SynthesisConfig;
use crate::error::{DubError, Result};
use crate::synth::SynthesisEngine;

/// Fixed single-voice backend. No reference sample; the voice is baked
/// into the model.
pub struct TacotronEngine {
    binary_path: String,
    model: String,
    max_chunk_chars: usize,
}

impl TacotronEngine {
    pub fn new(config: &SynthesisConfig) -> Self {
        Self {
            binary_path: config.binary_path.clone(),
            model: config.tacotron_model.clone(),
            max_chunk_chars: config.max_chunk_chars,
        }
    }
}

#[async_trait]
impl SynthesisEngine for TacotronEngine {
    fn name(&self) -> &'static str {
        "tacotron"
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
