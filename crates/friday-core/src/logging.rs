//! Tracing subscriber setup shared by the binaries.

use std::fs::{self, OpenOptions};
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Error, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Build the filter: `RUST_LOG` first, then `LOG_LEVEL` for our own crates.
pub fn filter(config: &LoggingConfig, crate_name: &str) -> Result<EnvFilter> {
    let level: LevelFilter = config
        .level
        .trim()
        .to_lowercase()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid LOG_LEVEL: {}", config.level)))?;

    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    for target in [crate_name, "friday_core"] {
        let directive = format!("{}={}", target, level)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid log directive: {}", e)))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

/// Install the global subscriber.
///
/// Console output always goes to stderr so stdout stays free for command
/// output and the stdio MCP transport.
pub fn init(config: &LoggingConfig, crate_name: &str) -> Result<()> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    layers.push(match config.format {
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
    });

    if let Some(path) = &config.file_path {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = Mutex::new(file);
        layers.push(match config.format {
            LogFormat::Json => fmt::layer().json().with_ansi(false).with_writer(writer).boxed(),
            LogFormat::Text => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter(config, crate_name)?)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_level() {
        let config = LoggingConfig {
            level: "LOUD".to_string(),
            ..Default::default()
        };
        let err = filter(&config, "friday").unwrap_err();
        assert!(err.to_string().contains("Invalid LOG_LEVEL"));
    }

    #[test]
    fn test_accepts_uppercase_level() {
        let config = LoggingConfig {
            level: "DEBUG".to_string(),
            ..Default::default()
        };
        let filter = filter(&config, "friday").unwrap();
        assert!(filter.to_string().contains("friday=debug"));
    }
}
