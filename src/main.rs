//! Dubflow - Automated Video Dubbing Workflow
//!
//! This is the main entry point for the Dubflow application, which
//! turns a source-language video into a dubbed video in a target
//! language using yt-dlp, AssemblyAI, and ffmpeg.

use anyhow::Result;
use clap::Parser;
use tracing::{Level, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use dubflow::cli::{Args, Commands};
use dubflow::config::Config;
use dubflow::pipeline::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    info!("Starting Dubflow - Automated Video Dubbing Workflow");

    // Load configuration
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if std::path::Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Dub {
            url,
            source_lang,
            target_lang,
            speaker_wav,
            keep_temp,
        } => {
            if let Some(reference) = speaker_wav {
                config.synthesis.voice_reference = Some(reference);
            }

            let pipeline = Pipeline::new(config).await?;
            info!("Dubbing video: {}", url);
            let final_path = pipeline
                .run(&url, &source_lang, &target_lang, keep_temp)
                .await?;
            println!("Final video saved to: {}", final_path.display());
        }
        Commands::Download { url, output } => {
            let pipeline = Pipeline::new(config).await?;
            info!("Downloading video: {}", url);
            let path = pipeline.download(&url, output.as_deref()).await?;
            println!("Downloaded: {}", path.display());
        }
        Commands::Extract { input, output } => {
            let pipeline = Pipeline::new(config).await?;
            info!("Extracting audio from: {}", input.display());
            pipeline.extract_audio(&input, &output).await?;
            println!("Extracted: {}", output.display());
        }
        Commands::Transcribe {
            input,
            language,
            output,
        } => {
            let pipeline = Pipeline::new(config).await?;
            info!("Transcribing audio: {}", input.display());
            let utterances = pipeline.transcribe_audio(&input, &language).await?;
            let json = serde_json::to_string_pretty(&utterances)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json).await?;
                    println!(
                        "Transcribed {} utterances to: {}",
                        utterances.len(),
                        path.display()
                    );
                }
                None => println!("{}", json),
            }
        }
        Commands::Translate {
            input,
            output,
            source_lang,
            target_lang,
        } => {
            let pipeline = Pipeline::new(config).await?;
            info!("Translating text file: {}", input.display());
            let text = tokio::fs::read_to_string(&input).await?;
            let translated = pipeline
                .translate_text(&text, &source_lang, &target_lang)
                .await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &translated).await?;
                    println!("Translated to: {}", path.display());
                }
                None => println!("{}", translated),
            }
        }
        Commands::Synthesize {
            input,
            output,
            language,
            speaker_wav,
        } => {
            if let Some(reference) = speaker_wav {
                config.synthesis.voice_reference = Some(reference);
            }

            let pipeline = Pipeline::new(config).await?;
            info!("Synthesizing speech for: {}", input.display());
            let text = tokio::fs::read_to_string(&input).await?;
            let path = pipeline
                .synthesize_speech(&text, &language, Some(output.as_path()))
                .await?;
            println!("Synthesized: {}", path.display());
        }
        Commands::Sync { video, audio } => {
            let pipeline = Pipeline::new(config).await?;
            info!(
                "Synchronizing {} with audio {}",
                video.display(),
                audio.display()
            );
            let final_path = pipeline.synchronize(&video, &audio).await?;
            println!("Final video saved to: {}", final_path.display());
        }
    }

    info!("Dubflow workflow completed successfully");
    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let dubflow_dir = std::env::current_dir()?.join(".dubflow");
    let log_dir = dubflow_dir.join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "dubflow.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    // Determine log level
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Create console layer
    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    // Create file layer
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    // Setup layered subscriber
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer);

    // Initialize the subscriber
    subscriber
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("dubflow.log").display()
    );

    Ok(())
}
