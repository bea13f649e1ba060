//! Thin command layer over the external transcoding tools. Builders
//! assemble argument lists; callers translate failures into their own
//! stage error kind, so `execute` reports failures as plain messages.

use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::MediaConfig;
use crate::error::{DubError, Result};

/// One ffmpeg invocation under construction.
#[derive(Debug, Clone)]
pub struct MediaCommand {
    binary_path: String,
    args: Vec<String>,
    description: String,
}

impl MediaCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-acodec").arg(codec)
    }

    pub fn audio_bitrate<S: Into<String>>(self, bitrate: S) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    pub fn audio_channels(self, channels: u32) -> Self {
        self.arg("-ac").arg(channels.to_string())
    }

    pub fn audio_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-af").arg(filter)
    }

    pub fn filter_complex<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-filter_complex").arg(filter)
    }

    pub fn map<S: Into<String>>(self, stream: S) -> Self {
        self.arg("-map").arg(stream)
    }

    pub fn duration_limit(self, seconds: f64) -> Self {
        self.arg("-t").arg(format!("{:.3}", seconds))
    }

    /// Run the command to completion. On a non-zero exit the captured
    /// stderr becomes the error message.
    pub async fn execute(&self) -> std::result::Result<(), String> {
        debug!(
            "Executing {} ({}): {:?}",
            self.binary_path, self.description, self.args
        );

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| format!("failed to execute {}: {}", self.binary_path, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{} failed: {}", self.description, stderr.trim()));
        }

        Ok(())
    }
}

/// Builders for the operations the pipeline actually performs.
pub struct MediaToolkit {
    config: MediaConfig,
}

impl MediaToolkit {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    pub fn command<S: Into<String>>(&self, description: S) -> MediaCommand {
        MediaCommand::new(&self.config.ffmpeg_path, description)
    }

    /// Check the transcoding tool responds to `-version`. Fatal at
    /// startup when it does not.
    pub async fn check_availability(&self) -> Result<()> {
        let output = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .output()
            .await
            .map_err(|e| {
                DubError::Config(format!(
                    "Media processor '{}' not found: {}",
                    self.config.ffmpeg_path, e
                ))
            })?;

        if output.status.success() {
            info!("Media processor is available");
            Ok(())
        } else {
            Err(DubError::Config(
                "Media processor version check failed".to_string(),
            ))
        }
    }

    /// Extract the audio track as 16-bit PCM WAV, 44.1 kHz mono.
    pub async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<()> {
        info!(
            "Extracting audio from {} to {}",
            video_path.display(),
            audio_path.display()
        );

        self.command("Audio extraction")
            .input(video_path)
            .no_video()
            .audio_codec("pcm_s16le")
            .audio_sample_rate(44100)
            .audio_channels(1)
            .overwrite()
            .output(audio_path)
            .execute()
            .await
            .map_err(DubError::AudioProcessing)?;

        validate_output(audio_path, 1, "Audio extraction").map_err(DubError::AudioProcessing)?;
        info!("Audio extraction completed");
        Ok(())
    }

    /// Convert an audio file to MP3 for upload to the transcription
    /// service.
    pub async fn convert_to_mp3(&self, input_path: &Path, output_path: &Path) -> Result<()> {
        info!(
            "Converting {} to MP3 at {}",
            input_path.display(),
            output_path.display()
        );

        self.command("MP3 conversion")
            .input(input_path)
            .audio_codec("libmp3lame")
            .audio_bitrate("192k")
            .audio_sample_rate(44100)
            .audio_channels(1)
            .overwrite()
            .output(output_path)
            .execute()
            .await
            .map_err(DubError::AudioProcessing)?;

        validate_output(output_path, 1, "MP3 conversion").map_err(DubError::AudioProcessing)?;
        Ok(())
    }

    /// Write a silent WAV of the given length, 44.1 kHz mono.
    pub async fn write_silence(&self, seconds: f64, output_path: &Path) -> std::result::Result<(), String> {
        self.command("Silence generation")
            .arg("-f")
            .arg("lavfi")
            .input("anullsrc=r=44100:cl=mono")
            .duration_limit(seconds)
            .audio_codec("pcm_s16le")
            .overwrite()
            .output(output_path)
            .execute()
            .await
    }

    /// Media duration in seconds, read via ffprobe.
    pub async fn probe_duration(&self, path: &Path) -> std::result::Result<f64, String> {
        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| format!("failed to execute {}: {}", self.config.ffprobe_path, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "duration probe of {} failed: {}",
                path.display(),
                stderr.trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("unparseable duration '{}': {}", stdout.trim(), e))
    }

    /// Whether the file contains at least one audio stream. Used only
    /// for best-effort verification of the muxed output.
    pub async fn has_audio_stream(&self, path: &Path) -> std::result::Result<bool, String> {
        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "a",
                "-show_entries",
                "stream=codec_type",
                "-of",
                "csv=p=0",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| format!("failed to execute {}: {}", self.config.ffprobe_path, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "stream probe of {} failed: {}",
                path.display(),
                stderr.trim()
            ));
        }

        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }
}

/// Existence and minimum-size check applied to every produced artifact.
/// A silently empty or truncated file becomes an explicit error here.
pub fn validate_output(
    path: &Path,
    min_bytes: u64,
    description: &str,
) -> std::result::Result<(), String> {
    let metadata = std::fs::metadata(path).map_err(|_| {
        format!(
            "{} produced no output file at {}",
            description,
            path.display()
        )
    })?;

    if metadata.len() < min_bytes {
        return Err(format!(
            "{} produced a suspiciously small file ({} bytes): {}",
            description,
            metadata.len(),
            path.display()
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder_assembles_args() {
        let cmd = MediaCommand::new("ffmpeg", "Audio extraction")
            .input("in.mp4")
            .no_video()
            .audio_codec("pcm_s16le")
            .audio_sample_rate(44100)
            .audio_channels(1)
            .overwrite()
            .output("out.wav");

        assert_eq!(
            cmd.args,
            vec![
                "-i", "in.mp4", "-vn", "-acodec", "pcm_s16le", "-ar", "44100", "-ac", "1",
                "-y", "out.wav"
            ]
        );
    }

    #[test]
    fn test_validate_output_missing_file() {
        let err = validate_output(Path::new("/nonexistent/file.wav"), 1, "Test").unwrap_err();
        assert!(err.contains("no output file"));
    }

    #[test]
    fn test_validate_output_size_floor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.wav");
        std::fs::write(&path, b"ab").unwrap();
        assert!(validate_output(&path, 100, "Test").is_err());
        assert!(validate_output(&path, 2, "Test").is_ok());
    }
}
