//! Log enrichment filter.
//!
//! Reads newline-delimited JSON log events from standard input, annotates each record with the Mesos task metadata of
//! the container that emitted it, and writes the enriched events to standard output.

#![deny(warnings)]
#![deny(missing_docs)]

use anyhow::Context as _;
use clap::Parser as _;
use taskmeta_app::prelude::*;
use taskmeta_components::enrichment::{EnrichmentConfiguration, RecordEnricher};
use taskmeta_config::GenericConfiguration;
use taskmeta_env::{DockerConfiguration, DockerEnvironmentProvider, EnvironmentProvider, FixedEnvironmentProvider};
use tracing::{error, info};

mod config;
use self::config::{load_configuration, Cli};

mod stream;
use self::stream::filter_events;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let configuration = load_configuration(cli.config.as_ref())
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load configuration: {:#}", e)));

    let logging_config = LoggingConfiguration::from_configuration(&configuration)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load logging configuration: {}", e)));
    if let Err(e) = initialize_logging(&logging_config) {
        fatal_and_exit(format!("failed to initialize logging: {}", e));
    }

    match run(&cli, &configuration).await {
        Ok(()) => info!("taskmeta-filter stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli, configuration: &GenericConfiguration) -> Result<(), anyhow::Error> {
    let enrichment_config = EnrichmentConfiguration::from_configuration(configuration)
        .context("Failed to load enrichment configuration.")?;

    match &cli.environment_file {
        Some(path) => {
            let provider = FixedEnvironmentProvider::from_json_file(path)
                .context("Failed to load container environments.")?;
            info!(path = %path.display(), "Using container environments from file.");

            let enricher = enrichment_config
                .build(provider)
                .context("Failed to build record enricher.")?;
            run_enricher(enricher).await
        }
        None => {
            let docker_config = DockerConfiguration::from_configuration(configuration)
                .context("Failed to load Docker configuration.")?;
            let provider = DockerEnvironmentProvider::from_configuration(&docker_config)
                .context("Failed to create Docker environment provider.")?;
            info!("Using container environments from the Docker Engine API.");

            let enricher = enrichment_config
                .build(provider)
                .context("Failed to build record enricher.")?;
            run_enricher(enricher).await
        }
    }
}

async fn run_enricher<P>(enricher: RecordEnricher<P>) -> Result<(), anyhow::Error>
where
    P: EnvironmentProvider + Send + Sync,
    P::Error: std::error::Error + Send + Sync + 'static,
{
    info!("taskmeta-filter started. Reading events from standard input.");

    let stats = filter_events(&enricher, tokio::io::stdin(), tokio::io::stdout()).await?;
    info!(
        lines_read = stats.lines_read,
        lines_malformed = stats.lines_malformed,
        events_read = stats.events_read,
        events_written = stats.events_written,
        "Reached end of input."
    );

    Ok(())
}
