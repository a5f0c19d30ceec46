//! Logging setup.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Map loose level names (`WARNING`, `Info`) onto filter directives.
pub fn normalize_level(level: &str) -> String {
    match level.trim().to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        "" => "info".to_string(),
        other => other.to_string(),
    }
}

fn file_parts(path: &Path) -> (PathBuf, OsString) {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("workbench.log"));
    (dir, name)
}

/// Setup logging with the given level.
///
/// `RUST_LOG` wins over `level`. With a `file`, a daily-rolled copy of the
/// log is written through a non-blocking writer; keep the returned guard
/// alive for the life of the process or buffered lines are lost.
pub fn setup_logging(level: &str, json: bool, file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(normalize_level(level)));

    let (file_layer, guard) = match file {
        Some(path) => {
            let (dir, name) = file_parts(path);
            let appender = tracing_appender::rolling::daily(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    let result = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().pretty()).try_init()
    };
    if let Err(e) = result {
        eprintln!("logging already initialized: {}", e);
    }

    guard
}
