//! Command-line client for Niimbot B1/D110 label printers.
//!
//! Scans for printers, prints image files and reads device information over
//! BLE. Settings come from `NIIMBOT_*` environment variables (a `.env` file is
//! honoured); flags override them.

mod commands;
mod config;
mod raster;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{LabelSize, PrintArgs};
use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "niimbot-cli")]
#[command(about = "Print labels on Niimbot B1/D110 printers over BLE")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby printers
    Scan {
        /// Scan duration in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Print an image file
    Print {
        /// Image to print (PNG, JPEG or BMP)
        image: PathBuf,
        /// Printer address (MAC, or UUID on macOS)
        #[arg(short, long)]
        address: Option<String>,
        /// Printer model: b1 or d110
        #[arg(short, long)]
        model: Option<String>,
        /// Print darkness, 1-5
        #[arg(short, long)]
        density: Option<u8>,
        /// Copies to print, 1-10
        #[arg(short, long, default_value_t = 1)]
        quantity: u16,
        /// Physical label size in millimetres, e.g. 50x30
        #[arg(long, value_parser = commands::parse_label_size)]
        label_size: Option<LabelSize>,
        /// Luma cut-off (0.0-1.0) below which pixels print black
        #[arg(long)]
        black_point: Option<f32>,
        /// Error-diffuse instead of thresholding
        #[arg(long)]
        dither: bool,
    },
    /// Show battery, firmware and serial of a printer
    Info {
        /// Printer address (MAC, or UUID on macOS)
        #[arg(short, long)]
        address: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env may carry RUST_LOG, so it is read before the filter is built.
    let dotenv = load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();
    match dotenv {
        Some(path) => tracing::debug!("Loaded .env from: {path}"),
        None => tracing::debug!("No .env file found, using system environment variables"),
    }

    let cli = Cli::parse();

    let mut config = CliConfig::load()?;

    match cli.command {
        Commands::Scan { timeout } => {
            if let Some(secs) = timeout {
                config.scan_timeout_secs = secs;
            }
            commands::scan(&config).await
        }
        Commands::Print {
            image,
            address,
            model,
            density,
            quantity,
            label_size,
            black_point,
            dither,
        } => {
            config.apply_overrides(address, model, density, black_point)?;
            let args = PrintArgs {
                image,
                quantity,
                label_size,
                dither,
            };
            commands::print(&config, args).await
        }
        Commands::Info { address } => {
            config.apply_overrides(address, None, None, None)?;
            commands::info(&config).await
        }
    }
}

/// Load .env from the working directory or its parents, returning the file used.
fn load_dotenv() -> Option<&'static str> {
    [".env", "../.env", "../../.env"]
        .into_iter()
        .find(|path| dotenvy::from_filename(path).is_ok())
}

/// Log filter from `RUST_LOG` directives, defaulting to `info`.
fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
