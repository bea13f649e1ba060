//! Duration synchronizer: reconcile the synthesized track against the
//! original video's timeline and mux the result. Only the audio is ever
//! trimmed or padded; video timing and speed stay untouched, because
//! speed adjustment produces visible motion artifacts.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{MediaConfig, SyncConfig};
use crate::error::{DubError, Result};
use crate::media::{MediaToolkit, validate_output};
use crate::paths::PathManager;

const MIN_OUTPUT_BYTES: u64 = 1024;

/// Outcome of the trim/pad decision for one video/audio pair.
#[derive(Debug, Clone, PartialEq)]
pub enum AlignmentPlan {
    /// Difference below the significance threshold: snap the audio to
    /// the video duration with a hard cut, no join fades.
    Snap,
    /// Audio is longer: trim to the video duration and fade out the
    /// new end to avoid an audible click.
    Trim,
    /// Audio is shorter: append `silence` seconds, fading across the
    /// join.
    Pad { silence: f64 },
}

/// Pure decision procedure over the two durations.
pub fn plan_alignment(video_duration: f64, audio_duration: f64, threshold: f64) -> AlignmentPlan {
    let diff = audio_duration - video_duration;
    if diff.abs() < threshold {
        AlignmentPlan::Snap
    } else if diff > 0.0 {
        AlignmentPlan::Trim
    } else {
        AlignmentPlan::Pad { silence: -diff }
    }
}

pub struct Synchronizer {
    config: SyncConfig,
    media: MediaToolkit,
    paths: PathManager,
}

impl Synchronizer {
    pub fn new(config: SyncConfig, media: MediaConfig, paths: PathManager) -> Self {
        Self {
            config,
            media: MediaToolkit::new(media),
            paths,
        }
    }

    /// Align the new audio track with the video's duration and mux
    /// them into the final output file. State-free across calls.
    pub async fn synchronize(&self, video_path: &Path, audio_path: &Path) -> Result<PathBuf> {
        if !video_path.exists() {
            return Err(DubError::FileNotFound(video_path.display().to_string()));
        }
        if !audio_path.exists() {
            return Err(DubError::FileNotFound(audio_path.display().to_string()));
        }

        info!(
            "Starting synchronization of '{}' with audio '{}'",
            video_path.display(),
            audio_path.display()
        );

        let video_duration = self
            .media
            .probe_duration(video_path)
            .await
            .map_err(DubError::Synchronization)?;
        let audio_duration = self
            .media
            .probe_duration(audio_path)
            .await
            .map_err(DubError::Synchronization)?;

        info!("Original video duration: {:.2}s", video_duration);
        info!("New audio duration: {:.2}s", audio_duration);

        let plan = plan_alignment(
            video_duration,
            audio_duration,
            self.config.significant_diff_secs,
        );

        let adjusted = self.paths.temp_path("sync_adjusted", ".wav");
        let adjust_result = match &plan {
            AlignmentPlan::Snap => {
                info!("Durations are close, snapping audio to video length");
                self.snap_audio(audio_path, video_duration, &adjusted).await
            }
            AlignmentPlan::Trim => {
                info!(
                    "Audio is longer by {:.2}s, trimming with fade-out",
                    audio_duration - video_duration
                );
                self.trim_audio(audio_path, video_duration, &adjusted).await
            }
            AlignmentPlan::Pad { silence } => {
                info!("Audio is shorter by {:.2}s, padding with silence", silence);
                self.pad_audio(audio_path, audio_duration, video_duration, *silence, &adjusted)
                    .await
            }
        };
        adjust_result.map_err(DubError::Synchronization)?;

        let mux_result = self.mux(video_path, &adjusted).await;

        if adjusted.exists() {
            if let Err(e) = std::fs::remove_file(&adjusted) {
                warn!(
                    "Could not delete intermediate audio {}: {}",
                    adjusted.display(),
                    e
                );
            }
        }

        let output = mux_result?;
        info!("Synchronization completed: {}", output.display());
        Ok(output)
    }

    /// Boundary fades applied to every assembled track so the absolute
    /// start and end never click.
    fn boundary_fades(&self, total_duration: f64) -> String {
        let fade = self.config.fade_secs;
        format!(
            "afade=t=in:st=0:d={fade},afade=t=out:st={start}:d={fade}",
            fade = fade,
            start = (total_duration - fade).max(0.0),
        )
    }

    async fn snap_audio(
        &self,
        audio_path: &Path,
        video_duration: f64,
        output: &Path,
    ) -> std::result::Result<(), String> {
        // apad extends indefinitely; the trim then cuts at exactly the
        // video duration, covering both slightly-long and slightly-
        // short tracks.
        let filter = format!(
            "apad,atrim=0:{:.3},{}",
            video_duration,
            self.boundary_fades(video_duration)
        );
        self.run_adjustment(audio_path, &filter, output).await
    }

    async fn trim_audio(
        &self,
        audio_path: &Path,
        video_duration: f64,
        output: &Path,
    ) -> std::result::Result<(), String> {
        let fade = self.config.fade_secs;
        let filter = format!(
            "atrim=0:{duration:.3},afade=t=out:st={fade_start:.3}:d={fade},{boundary}",
            duration = video_duration,
            fade_start = (video_duration - fade).max(0.0),
            fade = fade,
            boundary = self.boundary_fades(video_duration),
        );
        self.run_adjustment(audio_path, &filter, output).await
    }

    async fn pad_audio(
        &self,
        audio_path: &Path,
        audio_duration: f64,
        video_duration: f64,
        silence: f64,
        output: &Path,
    ) -> std::result::Result<(), String> {
        let silence_file = self.paths.temp_path("silence_padding", ".wav");
        self.media.write_silence(silence, &silence_file).await?;

        let fade = self.config.fade_secs;
        let sample_rate = self.config.sample_rate;
        let filter = format!(
            "[0:a]aformat=sample_fmts=s16:sample_rates={rate}:channel_layouts=mono,\
             afade=t=out:st={tail_fade:.3}:d={fade}[main];\
             [1:a]aformat=sample_fmts=s16:sample_rates={rate}:channel_layouts=mono,\
             afade=t=in:st=0:d={fade}[tail];\
             [main][tail]concat=n=2:v=0:a=1,{boundary}[out]",
            rate = sample_rate,
            tail_fade = (audio_duration - fade).max(0.0),
            fade = fade,
            boundary = self.boundary_fades(video_duration),
        );

        let result = self
            .media
            .command("Audio padding")
            .input(audio_path)
            .input(&silence_file)
            .filter_complex(filter)
            .map("[out]")
            .audio_codec("pcm_s16le")
            .audio_sample_rate(sample_rate)
            .audio_channels(self.config.channels)
            .overwrite()
            .output(output)
            .execute()
            .await;

        if silence_file.exists() {
            if let Err(e) = std::fs::remove_file(&silence_file) {
                warn!(
                    "Could not delete silence file {}: {}",
                    silence_file.display(),
                    e
                );
            }
        }
        result?;

        validate_output(output, 1, "Audio padding")
    }

    async fn run_adjustment(
        &self,
        audio_path: &Path,
        filter: &str,
        output: &Path,
    ) -> std::result::Result<(), String> {
        self.media
            .command("Audio adjustment")
            .input(audio_path)
            .audio_filter(filter)
            .audio_codec("pcm_s16le")
            .audio_sample_rate(self.config.sample_rate)
            .audio_channels(self.config.channels)
            .overwrite()
            .output(output)
            .execute()
            .await?;

        validate_output(output, 1, "Audio adjustment")
    }

    /// Mux the adjusted audio against the untouched video stream.
    async fn mux(&self, video_path: &Path, audio_path: &Path) -> Result<PathBuf> {
        let output = self.paths.output_path("final_video", ".mp4");
        info!("Writing final synchronized video to: {}", output.display());

        self.media
            .command("Final mux")
            .input(video_path)
            .input(audio_path)
            .map("0:v:0")
            .map("1:a:0")
            .video_codec(&self.config.video_codec)
            .arg("-preset")
            .arg(&self.config.preset)
            .arg("-crf")
            .arg(self.config.crf.to_string())
            .audio_codec(&self.config.audio_codec)
            .audio_bitrate(&self.config.audio_bitrate)
            .audio_sample_rate(self.config.sample_rate)
            .audio_channels(self.config.channels)
            .overwrite()
            .output(&output)
            .execute()
            .await
            .map_err(DubError::Synchronization)?;

        validate_output(&output, MIN_OUTPUT_BYTES, "Final mux")
            .map_err(DubError::Synchronization)?;

        // Best-effort check; a probe failure here is only worth a
        // warning, not a failed run.
        match self.media.has_audio_stream(&output).await {
            Ok(true) => {}
            Ok(false) => warn!("Output video was created but appears to have no audio track"),
            Err(e) => warn!("Could not verify audio track in output video: {}", e),
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f64 = 0.5;

    #[test]
    fn test_small_difference_snaps() {
        assert_eq!(plan_alignment(10.0, 10.3, THRESHOLD), AlignmentPlan::Snap);
        assert_eq!(plan_alignment(10.0, 9.7, THRESHOLD), AlignmentPlan::Snap);
        assert_eq!(plan_alignment(10.0, 10.0, THRESHOLD), AlignmentPlan::Snap);
    }

    #[test]
    fn test_longer_audio_trims() {
        assert_eq!(plan_alignment(10.0, 12.0, THRESHOLD), AlignmentPlan::Trim);
    }

    #[test]
    fn test_shorter_audio_pads_with_exact_silence() {
        match plan_alignment(10.0, 8.0, THRESHOLD) {
            AlignmentPlan::Pad { silence } => assert!((silence - 2.0).abs() < 1e-9),
            other => panic!("expected pad, got {:?}", other),
        }
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // Exactly at the threshold the difference is significant.
        assert_eq!(plan_alignment(10.0, 10.5, THRESHOLD), AlignmentPlan::Trim);
        match plan_alignment(10.0, 9.5, THRESHOLD) {
            AlignmentPlan::Pad { silence } => assert!((silence - 0.5).abs() < 1e-9),
            other => panic!("expected pad, got {:?}", other),
        }
    }
}
