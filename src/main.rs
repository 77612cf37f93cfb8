//! CLI entry point for daq-saver
//!
//! Records frames from the mock camera into raw, TIFF or cam files, or prints
//! the resolved configuration.
//!
//! # Usage
//!
//! Record 500 frames into split TIFF files:
//! ```bash
//! daq-saver record --path run.tiff --frames 500 --file-split 100
//! ```
//!
//! Show the configuration after file and environment overrides:
//! ```bash
//! daq-saver inspect-config --config config/saver.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daq_saver::config::{SaverConfig, DEFAULT_CONFIG_PATH};
use daq_saver::mock_source::MockFrameSource;
use daq_saver::{tracing_setup, SaveRequest, SaverActor};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::info;

/// Frame bundles buffered between the camera and the saver
const FRAME_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "daq-saver")]
#[command(about = "Streaming frame saver with pretrigger buffering", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record frames from the mock camera
    Record {
        /// Destination file (extension is kept for split files)
        #[arg(long)]
        path: PathBuf,

        /// Number of frames to save before the session stops
        #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
        frames: u64,

        /// File format: raw, tiff or cam
        #[arg(long, default_value = "raw")]
        format: String,

        /// Frames per file (0 = single file)
        #[arg(long, default_value = "0")]
        file_split: u64,

        /// Pretrigger buffer size in frames; the camera runs this many frames
        /// before the session starts
        #[arg(long, default_value = "0")]
        pretrigger: usize,

        /// Camera frame rate in Hz
        #[arg(long, default_value = "500")]
        rate: f64,

        /// Probability that the camera drops a frame
        #[arg(long, default_value = "0")]
        drop_probability: f64,

        /// Frame width and height
        #[arg(long, num_args = 2, default_values = ["128", "128"])]
        size: Vec<usize>,
    },

    /// Print the resolved configuration as TOML
    InspectConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SaverConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate()?;

    match cli.command {
        Commands::InspectConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Record {
            path,
            frames,
            format,
            file_split,
            pretrigger,
            rate,
            drop_probability,
            size,
        } => {
            tracing_setup::init(&config.application)?;
            let (width, height) = match size.as_slice() {
                [w, h] => (*w, *h),
                _ => anyhow::bail!("--size takes a width and a height"),
            };
            let mut request = SaveRequest::new(path)
                .format_name(&format)?
                .batch_size(frames)
                .append(false)
                .check_status_line(true);
            if file_split > 0 {
                request = request.file_split(file_split);
            }
            let camera = MockFrameSource::builder()
                .frame_size(width, height)
                .rate_hz(rate)
                .drop_probability(drop_probability);
            record(config, request, camera, pretrigger).await
        }
    }
}

async fn record(
    mut config: SaverConfig,
    request: SaveRequest,
    camera: daq_saver::mock_source::MockFrameSourceBuilder,
    pretrigger: usize,
) -> Result<()> {
    if pretrigger > 0 {
        config.pretrigger.size = pretrigger;
    }
    let (frame_tx, frame_rx) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
    let (handle, actor_task) = SaverActor::from_config(&config)?.spawn(frame_rx);
    let camera_task = tokio::spawn(camera.build().run(frame_tx));

    if pretrigger > 0 {
        // Let the pretrigger buffer fill before triggering
        let mut status_rx = handle.subscribe_status();
        status_rx
            .wait_for(|status| {
                status
                    .pretrigger_status
                    .as_ref()
                    .is_some_and(|p| p.frames >= pretrigger as u64)
            })
            .await
            .context("Saver stopped while filling the pretrigger buffer")?;
    }

    info!(path = %request.path.display(), frames = ?request.batch_size, "Recording");
    handle.save_start(request).await?;
    let status = handle.wait_until_stopped().await?;

    camera_task.abort();
    handle.shutdown().await?;
    actor_task.await?;

    println!("state:      {}", status.state);
    println!("received:   {}", status.received);
    println!("scheduled:  {}", status.scheduled);
    println!("saved:      {}", status.saved);
    println!("missed:     {}", status.missed);
    println!("files:      {}", status.files_written);
    println!("status line: {}", status.status_line_check);
    if let Some(error) = status.last_error {
        anyhow::bail!("Recording failed: {}", error);
    }
    Ok(())
}
