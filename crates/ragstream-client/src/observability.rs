use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const ENABLED_ENV: &str = "RAGSTREAM_OBSERVABILITY";
const LEVEL_ENV: &str = "RAGSTREAM_LOG_LEVEL";
const JSON_PATH_ENV: &str = "RAGSTREAM_JSON_LOG_PATH";
const DEFAULT_FILTER: &str = "warn,ragstream_client=info";
const DEFAULT_LOG_FILE: &str = "ragstream.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn logging_enabled() -> bool {
    std::env::var(ENABLED_ENV)
        .ok()
        .and_then(|value| parse_flag(&value))
        .unwrap_or(true)
}

fn resolve_filter() -> EnvFilter {
    if let Ok(level) = std::env::var(LEVEL_ENV)
        && let Ok(filter) = EnvFilter::try_new(level)
    {
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Splits a log path into the directory and file name the appender wants.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}

/// Installs the global tracing subscriber once per process.
///
/// Environment variables:
/// - `RAGSTREAM_OBSERVABILITY`: `0`/`false`/`off` disables logging (default enabled).
/// - `RAGSTREAM_LOG_LEVEL`: filter override (`debug`, `ragstream_client=trace`, ...).
/// - `RUST_LOG`: used when `RAGSTREAM_LOG_LEVEL` is unset or invalid.
/// - `RAGSTREAM_JSON_LOG_PATH`: write JSON lines to this file instead of the console.
///
/// Console output goes to stderr so it never mixes with a streamed answer on stdout.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !logging_enabled() {
            return;
        }

        let filter = resolve_filter();
        if let Ok(raw) = std::env::var(JSON_PATH_ENV) {
            let (dir, file_name) = split_log_path(Path::new(&raw));
            let _ = std::fs::create_dir_all(&dir);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .try_init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag(" ON "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn bare_file_name_logs_to_current_dir() {
        let (dir, name) = split_log_path(Path::new("query.jsonl"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, "query.jsonl");

        let (dir, name) = split_log_path(Path::new("/var/log/ragstream/"));
        assert_eq!(dir, PathBuf::from("/var/log"));
        assert_eq!(name, "ragstream");
    }
}
