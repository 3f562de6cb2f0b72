use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::Result;

const DEFAULT_FILTER: &str = "info";

pub fn log_file_name(timestamp: &str) -> String {
    format!("storygen_{timestamp}.log")
}

/// Log to stderr and to a per-run file under `log_dir`.
///
/// `RUST_LOG` overrides the default `info` filter. Keep the returned guard
/// alive for the whole run or buffered file lines are lost.
pub fn init_logging(log_dir: &Path) -> Result<(WorkerGuard, PathBuf)> {
    fs::create_dir_all(log_dir)?;
    let name = log_file_name(&Local::now().format("%Y%m%d_%H%M%S").to_string());
    let appender = tracing_appender::rolling::never(log_dir, &name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Ok((guard, log_dir.join(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name() {
        assert_eq!(log_file_name("20240101_120000"), "storygen_20240101_120000.log");
    }
}
