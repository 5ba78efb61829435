use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "info";
const DEFAULT_LOG_FILE: &str = "genstudio.jsonl";

/// Logging setup read by `init_observability`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilityOptions {
    pub enabled: bool,
    /// `EnvFilter` directive; falls back to `RUST_LOG`, then `info`.
    pub filter: Option<String>,
    /// When set, events are written as JSON lines to this file instead of
    /// the console.
    pub json_log_path: Option<PathBuf>,
}

impl Default for ObservabilityOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: None,
            json_log_path: None,
        }
    }
}

impl ObservabilityOptions {
    /// Reads `GENSTUDIO_OBSERVABILITY_ENABLED`, `GENSTUDIO_LOG_LEVEL` and
    /// `GENSTUDIO_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            enabled: non_blank("GENSTUDIO_OBSERVABILITY_ENABLED")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(true),
            filter: non_blank("GENSTUDIO_LOG_LEVEL"),
            json_log_path: non_blank("GENSTUDIO_JSON_LOG_PATH").map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        self.filter
            .as_deref()
            .and_then(|directive| EnvFilter::try_new(directive).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Splits a log path into the directory and file name handed to the appender.
fn log_target(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let file = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file)
}

/// Installs the global tracing subscriber from `GENSTUDIO_*` variables.
pub fn init_observability() {
    init_observability_with(ObservabilityOptions::from_env());
}

/// Installs the global tracing subscriber once per process. Later calls,
/// and calls after another subscriber was installed, do nothing.
pub fn init_observability_with(options: ObservabilityOptions) {
    INIT.get_or_init(|| {
        if !options.enabled {
            return;
        }
        let filter = options.env_filter();
        match &options.json_log_path {
            Some(path) => {
                let (dir, file) = log_target(path);
                let _ = std::fs::create_dir_all(&dir);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(tracing_appender::rolling::never(dir, file));
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
            None => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stdout);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
        }
    });
}
