//! Access to the environment variables of running containers.
//!
//! Enrichment only ever needs one thing from the container runtime: the raw `KEY=VALUE` environment strings of a given
//! container. This crate defines that single query as [`EnvironmentProvider`], and provides implementations backed by
//! the Docker Engine API and by a fixed, in-memory table.
#![deny(warnings)]
#![deny(missing_docs)]

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use snafu::Snafu;

mod docker;
pub use self::docker::{DockerConfiguration, DockerEnvironmentProvider};

mod fixed;
pub use self::fixed::FixedEnvironmentProvider;

/// An environment provider error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum ProviderError {
    /// The configured Docker host could not be used.
    #[snafu(display("unsupported Docker host '{}': expected a unix://, tcp://, or http:// address", host))]
    UnsupportedDockerHost {
        /// Configured Docker host.
        host: String,
    },

    /// Failed to create the Docker client.
    #[snafu(display("failed to create Docker client: {}", source))]
    Connect {
        /// Error source.
        source: bollard::errors::Error,
    },

    /// Failed to inspect a container.
    #[snafu(display("failed to inspect container '{}': {}", container_id, source))]
    Inspect {
        /// Container that was being inspected.
        container_id: String,

        /// Error source.
        source: bollard::errors::Error,
    },

    /// Failed to read a file of container environments.
    #[snafu(display("failed to read environment file '{}': {}", path.display(), source))]
    ReadEnvironmentFile {
        /// Path to the file.
        path: PathBuf,

        /// Error source.
        source: std::io::Error,
    },

    /// Failed to parse a file of container environments.
    #[snafu(display("failed to parse environment file '{}': {}", path.display(), source))]
    ParseEnvironmentFile {
        /// Path to the file.
        path: PathBuf,

        /// Error source.
        source: serde_json::Error,
    },
}

/// Provides the environment variables of containers.
#[async_trait]
pub trait EnvironmentProvider {
    /// Type of error returned by the provider.
    type Error;

    /// Fetches the environment variables of the given container.
    ///
    /// Each entry is a raw `KEY=VALUE` string, in the order reported by the container runtime. If the container does not
    /// exist, `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// If the container runtime could not be queried, an error is returned.
    async fn fetch_environment(&self, container_id: &str) -> Result<Option<Vec<String>>, Self::Error>;
}

#[async_trait]
impl<E> EnvironmentProvider for Arc<E>
where
    E: EnvironmentProvider + Send + Sync + ?Sized,
{
    type Error = E::Error;

    async fn fetch_environment(&self, container_id: &str) -> Result<Option<Vec<String>>, Self::Error> {
        (**self).fetch_environment(container_id).await
    }
}
