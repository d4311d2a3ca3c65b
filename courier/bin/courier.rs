#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::Parser;
use courier::{Config, Courier, find_config_file};

/// Outgoing mail dispatch service
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Queue email over HTTP and deliver it over SMTP", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file (overrides COURIER_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => find_config_file()?,
    };

    Courier::new(Config::load(&config_path)?).run().await
}
