// Transcription stage: submit audio to an asynchronous speech-to-text
// service and poll the job to a terminal state.
//
// The state machine and payload mapping live in `common` so they can be
// exercised without HTTP; `assembly` is the production client for the
// AssemblyAI-style API.

pub mod assembly;
pub mod common;

use async_trait::async_trait;
use std::path::Path;

pub use common::*;

use crate::config::{MediaConfig, TranscriberConfig};
use crate::error::Result;
use crate::paths::PathManager;

/// Main trait for the transcription stage.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio file, returning the recognized utterances in
    /// chronological order.
    async fn transcribe(&self, audio_path: &Path, language: &str) -> Result<Vec<Utterance>>;
}

/// Factory for creating transcriber instances.
pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create_default(
        config: TranscriberConfig,
        media: MediaConfig,
        paths: PathManager,
    ) -> Box<dyn Transcriber> {
        Box::new(assembly::AssemblyTranscriber::new(config, media, paths))
    }
}
