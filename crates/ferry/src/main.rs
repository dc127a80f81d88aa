// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ferry - webhook ingestion and reliable message-processing pipeline.
//!
//! This is the binary entry point.

mod serve;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Ferry - relays Instagram webhooks through an n8n AI workflow.
#[derive(Parser, Debug)]
#[command(name = "ferry", version, about, long_about = None)]
struct Cli {
    /// Path to an explicit config file (skips the XDG hierarchy).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway and the job scheduler.
    Serve,
    /// Print pipeline statistics and exit.
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(errors) => {
            for error in &errors {
                eprintln!("ferry: config error: {error}");
            }
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) | None => serve::run_serve(config).await,
        Some(Commands::Status) => status::run_status(config).await,
    };

    if let Err(e) = result {
        eprintln!("ferry: {e}");
        std::process::exit(1);
    }
}

fn load(
    path: Option<&std::path::Path>,
) -> Result<ferry_config::FerryConfig, Vec<ferry_config::ConfigError>> {
    match path {
        Some(path) => {
            let config = ferry_config::load_config_from_path(path).map_err(|e| {
                vec![ferry_config::ConfigError {
                    key: path.display().to_string(),
                    message: e.to_string(),
                }]
            })?;
            ferry_config::validate_config(&config)?;
            Ok(config)
        }
        None => ferry_config::load_and_validate(),
    }
}
