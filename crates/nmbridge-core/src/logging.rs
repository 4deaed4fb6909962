use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing_appender::rolling;
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

const LOG_FILE_PREFIX: &str = "nmbridge.log";
const LOG_RETENTION_DAYS: u64 = 7;

/// Which outputs `init` installs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    /// Daily rolling file under `log_dir()`.
    pub file: bool,
    /// Human-readable stderr output.
    pub stderr: bool,
    /// Emit stderr output as JSON lines instead.
    pub json: bool,
    /// Filter used when neither `NMBRIDGE_LOG` nor `RUST_LOG` is set.
    pub default_filter: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            file: true,
            stderr: true,
            json: false,
            default_filter: "info".to_string(),
        }
    }
}

/// Return the log directory path.
///
/// Precedence: `NMBRIDGE_LOG_DIR` env var > platform default.
/// macOS: `~/Library/Logs/nmbridge/`
/// Linux: `$XDG_DATA_HOME/nmbridge/logs/` or `~/.local/share/nmbridge/logs/`
pub fn log_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("NMBRIDGE_LOG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            return home.join("Library").join("Logs").join("nmbridge");
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        if let Some(data) = dirs::data_dir() {
            return data.join("nmbridge").join("logs");
        }
    }

    PathBuf::from("logs")
}

/// Remove rolled log files older than `max_age_days`.
///
/// Only files named with the appender's prefix are considered, so a shared
/// directory keeps its other contents.
fn cleanup_old_logs(log_path: &Path, max_age_days: u64) {
    let cutoff = SystemTime::now() - Duration::from_secs(max_age_days * 86400);
    let Ok(entries) = std::fs::read_dir(log_path) else {
        return;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(LOG_FILE_PREFIX) {
            continue;
        }
        let modified = entry.metadata().and_then(|meta| meta.modified());
        if matches!(modified, Ok(modified) if modified < cutoff) {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_env("NMBRIDGE_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Initialize the logging subsystem.
///
/// Filter controlled by `NMBRIDGE_LOG` or `RUST_LOG` (default from
/// `options`). File output: daily rotation in `log_dir()`, 7-day retention.
pub fn init(options: &LogOptions) -> Result<()> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if options.file {
        let log_path = log_dir();
        match std::fs::create_dir_all(&log_path) {
            Ok(()) => {
                cleanup_old_logs(&log_path, LOG_RETENTION_DAYS);
                let file_appender = rolling::daily(&log_path, LOG_FILE_PREFIX);
                layers.push(
                    tracing_subscriber::fmt::layer()
                        .with_writer(file_appender)
                        .with_ansi(false)
                        .with_target(true)
                        .boxed(),
                );
            }
            Err(e) => eprintln!(
                "warning: failed to create log directory {:?}: {}",
                log_path, e
            ),
        }
    }

    if options.stderr {
        let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        layers.push(if options.json {
            layer.json().boxed()
        } else {
            layer.with_target(false).boxed()
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(&options.default_filter))
        .try_init()
        .context("failed to install tracing subscriber")
}
