use anyhow::{anyhow, Context as _};
use serde::Deserialize;
use taskmeta_config::{ConfigurationError, GenericConfiguration};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

fn default_log_level() -> LogLevel {
    LevelFilter::INFO.into()
}

const fn default_false() -> bool {
    false
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingConfiguration {
    /// Log filtering directives, in the same syntax as `RUST_LOG`.
    ///
    /// Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Whether to write logs as JSON.
    ///
    /// Defaults to `false`, which writes human-readable logs.
    #[serde(default = "default_false")]
    pub log_format_json: bool,
}

impl LoggingConfiguration {
    /// Creates a new `LoggingConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `LoggingConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        config.as_typed()
    }
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format_json: default_false(),
        }
    }
}

/// A set of log filtering directives.
#[derive(Debug, Deserialize)]
#[serde(try_from = "String")]
pub struct LogLevel(EnvFilter);

impl LogLevel {
    /// Returns the directives as an `EnvFilter`.
    pub fn as_env_filter(&self) -> EnvFilter {
        self.0.clone()
    }
}

impl From<LevelFilter> for LogLevel {
    fn from(level: LevelFilter) -> Self {
        Self(EnvFilter::default().add_directive(level.into()))
    }
}

impl TryFrom<String> for LogLevel {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(anyhow!("Log level cannot be empty."));
        }

        EnvFilter::builder()
            .parse(value)
            .map(Self)
            .context("Failed to parse valid log level.")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use taskmeta_config::ConfigurationLoader;

    use super::*;

    fn configuration(values: serde_json::Value) -> Result<LoggingConfiguration, ConfigurationError> {
        let config = ConfigurationLoader::default().with_values(values).into_generic();
        LoggingConfiguration::from_configuration(&config)
    }

    #[test]
    fn defaults() {
        let config = configuration(json!({})).unwrap();
        assert_eq!(config.log_level.as_env_filter().to_string(), LevelFilter::INFO.to_string());
        assert!(!config.log_format_json);
    }

    #[test]
    fn directives() {
        let config = configuration(json!({
            "log_level": "warn,taskmeta_components=debug",
            "log_format_json": true,
        }))
        .unwrap();

        let filter = config.log_level.as_env_filter().to_string();
        assert!(filter.contains("warn"));
        assert!(filter.contains("taskmeta_components=debug"));
        assert!(config.log_format_json);
    }

    #[test]
    fn invalid_directives() {
        assert!(configuration(json!({ "log_level": "" })).is_err());
        assert!(configuration(json!({ "log_level": "taskmeta=notalevel" })).is_err());
    }
}
