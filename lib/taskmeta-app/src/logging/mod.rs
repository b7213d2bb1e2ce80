//! Logging.

use std::io::IsTerminal as _;

use tracing::Subscriber;
use tracing_subscriber::{
    fmt, layer::SubscriberExt as _, registry::LookupSpan, util::SubscriberInitExt as _, Layer,
};

mod config;
pub use self::config::{LogLevel, LoggingConfiguration};

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// Logs are written to standard error, keeping standard output free for processed records. Events are filtered by the
/// configured log level, and written either as JSON or in a human-readable format, depending on
/// `log_format_json`.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<(), anyhow::Error> {
    tracing_subscriber::registry()
        .with(build_formatting_layer(config).with_filter(config.log_level.as_env_filter()))
        .try_init()?;

    Ok(())
}

fn build_formatting_layer<S>(config: &LoggingConfiguration) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if config.log_format_json {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr)
            .boxed()
    }
}
