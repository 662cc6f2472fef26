//! Structured logging setup.
//!
//! The subscriber starts at `info` before configuration is read, then
//! `apply_logging_level` swaps in the configured level through a reload
//! handle. `RUST_LOG`, when set, overrides both.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

/// HTTP client internals are noisy at debug during webhook delivery.
const QUIET_DIRECTIVES: &[&str] = &[
    "hyper=warn",
    "hyper_util=warn",
    "reqwest=warn",
    "rustls=warn",
];

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    let filter = match std::env::var_os("RUST_LOG") {
        Some(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(level)),
        None => filter_for(level),
    };

    let (filter, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Switch to the configured level. Returns false when `RUST_LOG` is set or
/// tracing was not initialized through this module.
pub fn apply_logging_level(level: &str) -> bool {
    if std::env::var_os("RUST_LOG").is_some() {
        return false;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };
    handle.modify(|f| *f = filter_for(level)).is_ok()
}

/// Filter for a bare level with the HTTP client crates held at warn.
pub fn filter_directives(level: &str) -> String {
    let mut directives = vec![level.trim().to_ascii_lowercase()];
    directives.extend(QUIET_DIRECTIVES.iter().map(|d| d.to_string()));
    directives.join(",")
}

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_new(filter_directives(level)).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_quiet_http_crates() {
        let directives = filter_directives(" DEBUG ");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(directives.contains("hyper=warn"));
    }

    #[test]
    fn test_filters_parse() {
        for level in ["trace", "debug", "info", "warn", "error", "off"] {
            assert!(EnvFilter::try_new(filter_directives(level)).is_ok());
        }
    }
}
