//! CLI for the Loadify download orchestrator.

mod commands;
mod control_socket;
mod display;
mod when;

use anyhow::Result;
use clap::{Parser, Subcommand};
use loadify_core::ItemId;
use std::path::PathBuf;

use commands::{run_checksum, run_config, run_control, run_get, run_status, GetArgs};
use control_socket::ControlAction;

/// Top-level CLI for the Loadify download orchestrator.
#[derive(Debug, Parser)]
#[command(name = "loadify")]
#[command(about = "Loadify: queued multi-transfer downloader with bandwidth cap and deferred starts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one or more URLs and wait until every transfer settles.
    Get {
        /// Direct file URLs or media page URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Destination directory (default: config download_dir, else current directory).
        #[arg(long, short = 'd', value_name = "DIR")]
        dest: Option<PathBuf>,

        /// Maximum number of transfers downloading at once.
        #[arg(long, short = 'j', value_name = "N")]
        jobs: Option<usize>,

        /// Aggregate speed cap in KiB/s (0 disables the cap).
        #[arg(long, value_name = "KIB")]
        limit_kib: Option<f64>,

        /// Quality preset for media URLs (best, 2160p, 1080p, 720p, 480p, 360p, audio, audio_m4a).
        #[arg(long, short = 'q')]
        quality: Option<String>,

        /// Defer the start: "HH:MM", "YYYY-MM-DD HH:MM" or RFC 3339.
        #[arg(long, value_name = "TIME")]
        at: Option<String>,

        /// Print progress events as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Pause a transfer in a running `loadify get`.
    Pause {
        /// Item identifier (e.g. dl_1718000000000).
        id: ItemId,
    },

    /// Resume a paused transfer in a running `loadify get`.
    Resume {
        /// Item identifier.
        id: ItemId,
    },

    /// Cancel a transfer in a running `loadify get`.
    Cancel {
        /// Item identifier.
        id: ItemId,
    },

    /// Show the transfers of a running `loadify get`.
    Status {
        /// Print one JSON object per item.
        #[arg(long)]
        json: bool,
    },

    /// Compute SHA-256 of a file (e.g. after download).
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },

    /// Print the config file path and the effective configuration.
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Get {
                urls,
                dest,
                jobs,
                limit_kib,
                quality,
                at,
                json,
            } => {
                let start_at = at.as_deref().map(when::parse_start_time).transpose()?;
                let args = GetArgs {
                    urls,
                    dest,
                    jobs,
                    limit_kib,
                    quality,
                    start_at,
                    json,
                };
                run_get(args).await?;
            }
            CliCommand::Pause { id } => run_control(ControlAction::Pause, id).await?,
            CliCommand::Resume { id } => run_control(ControlAction::Resume, id).await?,
            CliCommand::Cancel { id } => run_control(ControlAction::Cancel, id).await?,
            CliCommand::Status { json } => run_status(json).await?,
            CliCommand::Checksum { path } => run_checksum(&path).await?,
            CliCommand::Config => run_config()?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
