use std::env;

use anyhow::Context;
use interop_broker::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use interop_broker::{InteropSystem, observability};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From INTEROP_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (interop.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (INTEROP_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    observability::init_tracing();
    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Failed to load .env file"),
    }

    let (config_path, source) = resolve_config_path();
    let cfg = load_config(Some(&config_path))
        .with_context(|| format!("loading configuration from {config_path}"))?;

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );
    if !observability::apply_logging_level(&cfg.logging.level) {
        tracing::debug!("RUST_LOG is set, configured logging.level ignored");
    }

    let prune_interval = cfg.broker.prune_interval;
    let system = InteropSystem::start(cfg)
        .await
        .context("starting interop system")?;

    let mut ticker = tokio::time::interval(prune_interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
                tracing::info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                system.prune_expired();
            }
        }
    }

    system.shutdown().await;
    Ok(())
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: INTEROP_CONFIG
/// 3. Default: interop.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var("INTEROP_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default)
}
