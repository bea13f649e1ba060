use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DubError, Result};

fn default_bark_chunk_chars() -> usize {
    150
}

fn default_min_chunk_bytes() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub acquire: AcquireConfig,
    pub media: MediaConfig,
    pub transcriber: TranscriberConfig,
    pub translate: TranslateConfig,
    pub synthesis: SynthesisConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for temporary and output artifacts
    pub base_dir: PathBuf,
    /// Number of final output files to retain after a successful run
    pub keep_outputs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireConfig {
    /// Path to the video retrieval binary (yt-dlp)
    pub binary_path: String,
    /// Ordered format fallback ladder, most preferred first
    pub format_ladder: Vec<FormatRung>,
    /// User agent presented to the remote host
    pub user_agent: String,
    /// Retries for extractor-level errors, per rung
    pub extractor_retries: u32,
    /// Retries for download errors, per rung
    pub download_retries: u32,
    /// Retries for fragment download errors, per rung
    pub fragment_retries: u32,
    /// Skip TLS certificate validation (helps on some networks)
    pub no_check_certificate: bool,
}

/// One entry in the acquisition fallback ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatRung {
    /// Format specification passed to the retrieval tool
    pub spec: String,
    /// Human-readable description used in logs and error reports
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to the ffprobe binary
    pub ffprobe_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Base URL of the transcription service API
    pub endpoint: String,
    /// API key; falls back to the environment variable below when unset
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is unset
    pub api_key_env: String,
    /// Seconds between status polls
    pub poll_interval_secs: u64,
    /// Hard ceiling on poll attempts before the job is declared timed out
    pub max_poll_attempts: u32,
    /// Hint for the number of speakers, when known
    pub speakers_expected: Option<u32>,
    /// Request word timings and disfluencies in the result
    pub detailed: bool,
    /// Gender assigned to every detected speaker. The service provides no
    /// gender signal; this is a declared default, not an inferred value.
    pub default_speaker_gender: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Base URL of the translation service API
    pub endpoint: String,
    /// Maximum characters per translation request
    pub max_chunk_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Which synthesis backend to drive
    pub backend: SynthesisBackend,
    /// Path to the synthesis CLI binary
    pub binary_path: String,
    /// Model identifier for the voice-cloning backend
    pub xtts_model: String,
    /// Model identifier for the fixed-voice backend
    pub tacotron_model: String,
    /// Model identifier for the prompt-voice backend
    pub bark_model: String,
    /// Voice prompt used by the prompt-voice backend
    pub bark_voice_prompt: String,
    /// Reference voice sample (short mono WAV) for voice cloning
    pub voice_reference: Option<PathBuf>,
    /// Maximum characters per synthesis call
    pub max_chunk_chars: usize,
    /// Maximum characters per synthesis call for the prompt-voice backend,
    /// which degrades on longer inputs
    #[serde(default = "default_bark_chunk_chars")]
    pub bark_max_chunk_chars: usize,
    /// Silence inserted between consecutive chunks when merging
    pub gap_ms: u64,
    /// Minimum size of a generated chunk file to be considered valid
    #[serde(default = "default_min_chunk_bytes")]
    pub min_chunk_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynthesisBackend {
    /// Voice-cloning synthesis from a reference WAV
    Xtts,
    /// Fixed single-voice synthesis
    Tacotron,
    /// Prompt-voice synthesis
    Bark,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Duration difference below which audio is snapped to the video
    /// length without fades at the adjustment point
    pub significant_diff_secs: f64,
    /// Fade length applied at trims, joins and track boundaries
    pub fade_secs: f64,
    /// Video codec for the final mux
    pub video_codec: String,
    /// Encoder preset for the final mux
    pub preset: String,
    /// Constant rate factor for the final mux
    pub crf: u32,
    /// Audio codec for the final mux
    pub audio_codec: String,
    /// Audio bitrate for the final mux
    pub audio_bitrate: String,
    /// Audio sample rate for adjusted tracks and the final mux
    pub sample_rate: u32,
    /// Audio channel count, matched to the synthesized track
    pub channels: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                base_dir: PathBuf::from("processing_files"),
                keep_outputs: 10,
            },
            acquire: AcquireConfig {
                binary_path: "yt-dlp".to_string(),
                format_ladder: vec![
                    FormatRung {
                        spec: "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best"
                            .to_string(),
                        description: "Best MP4 video+audio".to_string(),
                    },
                    FormatRung {
                        spec: "bestvideo+bestaudio/best".to_string(),
                        description: "Best available video+audio (any container)".to_string(),
                    },
                    FormatRung {
                        spec: "best".to_string(),
                        description: "Best available single file".to_string(),
                    },
                ],
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .to_string(),
                extractor_retries: 3,
                download_retries: 5,
                fragment_retries: 5,
                no_check_certificate: true,
            },
            media: MediaConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                ffprobe_path: "ffprobe".to_string(),
            },
            transcriber: TranscriberConfig {
                endpoint: "https://api.assemblyai.com/v2".to_string(),
                api_key: None,
                api_key_env: "ASSEMBLYAI_API_KEY".to_string(),
                poll_interval_secs: 5,
                max_poll_attempts: 720,
                speakers_expected: None,
                detailed: false,
                default_speaker_gender: "male".to_string(),
            },
            translate: TranslateConfig {
                endpoint: "http://localhost:5000".to_string(),
                max_chunk_chars: 4500,
            },
            synthesis: SynthesisConfig {
                backend: SynthesisBackend::Xtts,
                binary_path: "tts".to_string(),
                xtts_model: "tts_models/multilingual/multi-dataset/xtts_v2".to_string(),
                tacotron_model: "tts_models/de/thorsten/tacotron2-DDC".to_string(),
                bark_model: "tts_models/multilingual/multi-dataset/bark".to_string(),
                bark_voice_prompt: "v2/de_speaker_5".to_string(),
                voice_reference: None,
                max_chunk_chars: 250,
                bark_max_chunk_chars: default_bark_chunk_chars(),
                gap_ms: 300,
                min_chunk_bytes: default_min_chunk_bytes(),
            },
            sync: SyncConfig {
                significant_diff_secs: 0.5,
                fade_secs: 0.15,
                video_codec: "libx264".to_string(),
                preset: "fast".to_string(),
                crf: 23,
                audio_codec: "aac".to_string(),
                audio_bitrate: "192k".to_string(),
                sample_rate: 44100,
                channels: 1,
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DubError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| DubError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DubError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| DubError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

impl TranscriberConfig {
    /// Resolve the API key from config or the environment.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = &self.api_key {
            if !key.trim().is_empty() {
                return Ok(key.clone());
            }
        }
        std::env::var(&self.api_key_env).map_err(|_| {
            DubError::Config(format!(
                "Transcription API key missing: set [transcriber] api_key or the {} environment variable",
                self.api_key_env
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.acquire.format_ladder.len(), 3);
        assert_eq!(parsed.transcriber.max_poll_attempts, 720);
        assert_eq!(parsed.synthesis.gap_ms, 300);
    }

    #[test]
    fn test_api_key_prefers_config_value() {
        let mut config = Config::default().transcriber;
        config.api_key = Some("abc123".to_string());
        assert_eq!(config.resolve_api_key().unwrap(), "abc123");
    }
}
