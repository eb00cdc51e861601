//! Tracing subscriber setup.

use crate::cli::{LogConfig, LogFormat};
use tracing_subscriber::EnvFilter;

/// Maps the configured level onto a filter directive. `warning` is accepted
/// as an alias of `warn`.
fn directive(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "" => "info".to_string(),
        other => other.to_string(),
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init(config: &LogConfig) -> Result<(), anyhow::Error> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directive(&config.level))
            .map_err(|e| anyhow::anyhow!("invalid log level {}: {}", config.level, e))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let result = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to set up logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive() {
        assert_eq!(directive("Warning"), "warn");
        assert_eq!(directive(" debug "), "debug");
        assert_eq!(directive(""), "info");
    }
}
