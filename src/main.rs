//! SceneShift - Free machine resources by pausing or closing background apps
//!
//! Runs batches of kill, suspend, resume, or restore over a list of tracked
//! applications, with a cancellable countdown, a bounded history, and undo.

mod core;
mod platform;
mod ui;

use std::path::PathBuf;

use anyhow::{Context, Result};
use single_instance::SingleInstance;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::core::{AppState, Settings};

/// Application name constant
pub const APP_NAME: &str = "SceneShift";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "\
Usage: sceneshift [--config <path>]

Options:
  --config <path>   settings file (default: <config dir>/SceneShift/settings.json)
  --version         print version and exit
  --help            print this help and exit

Set RUST_LOG to adjust diagnostic output on stderr.";

/// What the command line asked for
#[derive(Debug, PartialEq, Eq)]
enum Cli {
    Run { config: PathBuf },
    Version,
    Help,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Cli> {
    let mut config = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => return Ok(Cli::Version),
            "--help" | "-h" => return Ok(Cli::Help),
            "--config" | "-c" => {
                let path = args.next().context("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("Unknown argument '{}'\n\n{}", other, USAGE),
        }
    }
    Ok(Cli::Run {
        config: config.unwrap_or_else(Settings::default_path),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match parse_args(std::env::args().skip(1))? {
        Cli::Version => {
            println!("{} v{}", APP_NAME, APP_VERSION);
            return Ok(());
        }
        Cli::Help => {
            println!("{}", USAGE);
            return Ok(());
        }
        Cli::Run { config } => config,
    };

    init_logging();
    info!("{} v{} starting...", APP_NAME, APP_VERSION);

    // Two engines must never act on the same processes
    let instance = SingleInstance::new(APP_NAME)
        .map_err(|e| anyhow::anyhow!("Failed to create single instance lock: {}", e))?;
    if !instance.is_single() {
        error!("Another instance of {} is already running!", APP_NAME);
        eprintln!("{} is already running", APP_NAME);
        return Ok(());
    }

    let state = AppState::load(&config)?;
    info!("Application state initialized from {:?}", config);

    ui::run(state).await?;

    info!("{} shutting down", APP_NAME);
    Ok(())
}

/// Initialize the logging system
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sceneshift=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
