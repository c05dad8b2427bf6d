use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "gpuwatch=info";

/// Where log lines go. The dashboard owns stdout, so the TUI either logs to
/// a file or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
    Off,
}

/// `--log-level` wins over `RUST_LOG`, which wins over the default
fn filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(directives) => EnvFilter::new(directives),
        None => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
    }
}

pub fn init(target: &LogTarget, level: Option<&str>) -> Result<()> {
    match target {
        LogTarget::Off => Ok(()),
        LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_env_filter(filter(level))
                .with_writer(std::io::stderr)
                .init();
            Ok(())
        }
        LogTarget::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter(level))
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
            Ok(())
        }
    }
}
