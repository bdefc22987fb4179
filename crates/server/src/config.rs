//! Process configuration.
//!
//! Settings come from the environment, optionally seeded from a
//! dotenv-style file passed via `--config`. A missing file is non-fatal; a
//! missing `DATABASE_URL` is.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_PORT: u16 = 8080;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "sporefall-server", about = "Authoritative sporefall game server")]
pub struct Args {
    /// Path to the config file.
    #[arg(long, default_value = ".env")]
    pub config: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if let Err(e) = dotenvy::from_path(path) {
            warn!(
                "Error loading config file {}, using process environment only: {e}",
                path.display()
            );
        }

        let database_url = std::env::var("DATABASE_URL").unwrap_or_default();
        if database_url.is_empty() {
            bail!("DATABASE_URL environment variable is required");
        }

        let port = match std::env::var("PORT") {
            Err(_) => DEFAULT_PORT,
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Error parsing PORT, using {DEFAULT_PORT}");
                DEFAULT_PORT
            }),
        };

        Ok(Self { database_url, port })
    }
}
