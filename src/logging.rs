#![forbid(unsafe_code)]

//! Structured logging to stdout and to a file inside the logs root.

use anyhow::{Context, Result};
use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_NAME: &str = "gateway.log";
const DEFAULT_FILTER: &str = "info,leantube=debug";

/// Creates the logs root if needed and opens the gateway log for appending.
pub fn open_log_file(logs_root: &Path) -> Result<(PathBuf, File)> {
    fs::create_dir_all(logs_root)
        .with_context(|| format!("creating {}", logs_root.display()))?;
    let path = logs_root.join(LOG_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok((path, file))
}

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging(logs_root: &Path) -> Result<PathBuf> {
    let (path, file) = open_log_file(logs_root)?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .try_init()
        .context("installing tracing subscriber")?;

    tracing::info!("logging to {}", path.display());
    Ok(path)
}
