use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full dubbing pipeline on a video URL
    Dub {
        /// Video URL to dub
        url: String,

        /// Source language of the video
        #[arg(short, long, default_value = "en")]
        source_lang: String,

        /// Target language for the dubbed audio
        #[arg(short, long, default_value = "de")]
        target_lang: String,

        /// Reference voice sample (mono WAV) for voice cloning
        #[arg(long)]
        speaker_wav: Option<PathBuf>,

        /// Keep temporary files after the run
        #[arg(long)]
        keep_temp: bool,
    },

    /// Download a video using the format fallback ladder
    Download {
        /// Video URL
        url: String,

        /// Where to copy the downloaded file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract the audio track from a video file
    Extract {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Output audio file (WAV)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Transcribe an audio file to utterances
    Transcribe {
        /// Input audio file
        #[arg(short, long)]
        input: PathBuf,

        /// Source language of the audio
        #[arg(short, long, default_value = "en")]
        language: String,

        /// Output JSON file; prints to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Translate a text file
    Translate {
        /// Input text file
        #[arg(short, long)]
        input: PathBuf,

        /// Output text file; prints to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Source language
        #[arg(short, long, default_value = "en")]
        source_lang: String,

        /// Target language
        #[arg(short, long, default_value = "de")]
        target_lang: String,
    },

    /// Synthesize speech for a text file
    Synthesize {
        /// Input text file
        #[arg(short, long)]
        input: PathBuf,

        /// Output audio file (WAV)
        #[arg(short, long)]
        output: PathBuf,

        /// Language of the text
        #[arg(short, long, default_value = "de")]
        language: String,

        /// Reference voice sample (mono WAV) for voice cloning
        #[arg(long)]
        speaker_wav: Option<PathBuf>,
    },

    /// Mux a new audio track against a video, reconciling durations
    Sync {
        /// Input video file
        #[arg(long)]
        video: PathBuf,

        /// New audio track (WAV)
        #[arg(long)]
        audio: PathBuf,
    },
}
