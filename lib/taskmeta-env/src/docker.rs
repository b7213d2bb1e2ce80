use async_trait::async_trait;
use bollard::{container::InspectContainerOptions, errors::Error as DockerError, Docker, API_DEFAULT_VERSION};
use serde::Deserialize;
use snafu::ResultExt as _;
use taskmeta_config::{ConfigurationError, GenericConfiguration};
use tracing::{debug, trace};

use crate::{Connect, EnvironmentProvider, Inspect, ProviderError};

const fn default_docker_timeout_secs() -> u64 {
    120
}

/// Docker Engine API configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct DockerConfiguration {
    /// Address of the Docker Engine API.
    ///
    /// Supports `unix://` socket paths as well as `tcp://` and `http://` addresses. When unset, the client falls back
    /// to Docker's own defaults, which honor the `DOCKER_HOST` environment variable.
    #[serde(default)]
    docker_host: Option<String>,

    /// Timeout, in seconds, for requests to the Docker Engine API.
    ///
    /// Defaults to 120 seconds.
    #[serde(default = "default_docker_timeout_secs")]
    docker_timeout_secs: u64,
}

impl DockerConfiguration {
    /// Creates a new `DockerConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        config.as_typed()
    }
}

impl Default for DockerConfiguration {
    fn default() -> Self {
        Self {
            docker_host: None,
            docker_timeout_secs: default_docker_timeout_secs(),
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
enum DockerEndpoint<'a> {
    Defaults,
    Unix(&'a str),
    Http(&'a str),
}

impl<'a> DockerEndpoint<'a> {
    fn parse(host: Option<&'a str>) -> Result<Self, ProviderError> {
        match host {
            None => Ok(Self::Defaults),
            Some(host) if host.starts_with("unix://") => Ok(Self::Unix(host)),
            Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => Ok(Self::Http(host)),
            Some(host) => Err(ProviderError::UnsupportedDockerHost { host: host.to_string() }),
        }
    }
}

/// Environment provider backed by the Docker Engine API.
///
/// Each lookup inspects the container and returns its configured environment (`Config.Env`).
#[derive(Clone)]
pub struct DockerEnvironmentProvider {
    docker: Docker,
}

impl DockerEnvironmentProvider {
    /// Creates a new `DockerEnvironmentProvider` from the given configuration.
    ///
    /// No connection is made until the first lookup.
    ///
    /// # Errors
    ///
    /// If the configured Docker host is not supported, or the client cannot be created, an error is returned.
    pub fn from_configuration(config: &DockerConfiguration) -> Result<Self, ProviderError> {
        let timeout = config.docker_timeout_secs;
        let docker = match DockerEndpoint::parse(config.docker_host.as_deref())? {
            DockerEndpoint::Defaults => Docker::connect_with_defaults().context(Connect)?,
            DockerEndpoint::Unix(host) => Docker::connect_with_unix(host, timeout, API_DEFAULT_VERSION).context(Connect)?,
            DockerEndpoint::Http(host) => Docker::connect_with_http(host, timeout, API_DEFAULT_VERSION).context(Connect)?,
        };

        debug!(docker_host = ?config.docker_host, timeout_secs = timeout, "Created Docker client.");

        Ok(Self { docker })
    }
}

#[async_trait]
impl EnvironmentProvider for DockerEnvironmentProvider {
    type Error = ProviderError;

    async fn fetch_environment(&self, container_id: &str) -> Result<Option<Vec<String>>, Self::Error> {
        match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => {
                let environment = response.config.and_then(|config| config.env).unwrap_or_default();
                trace!(container_id, env_len = environment.len(), "Fetched container environment.");
                Ok(Some(environment))
            }
            Err(DockerError::DockerResponseServerError { status_code: 404, .. }) => {
                debug!(container_id, "Container not found.");
                Ok(None)
            }
            Err(e) => Err(e).context(Inspect { container_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use taskmeta_config::ConfigurationLoader;

    use super::*;

    #[test]
    fn endpoint_from_host() {
        assert_eq!(DockerEndpoint::parse(None).unwrap(), DockerEndpoint::Defaults);
        assert_eq!(
            DockerEndpoint::parse(Some("unix:///var/run/docker.sock")).unwrap(),
            DockerEndpoint::Unix("unix:///var/run/docker.sock")
        );
        assert_eq!(
            DockerEndpoint::parse(Some("tcp://example.com:5422")).unwrap(),
            DockerEndpoint::Http("tcp://example.com:5422")
        );
        assert_eq!(
            DockerEndpoint::parse(Some("http://localhost:2375")).unwrap(),
            DockerEndpoint::Http("http://localhost:2375")
        );
        assert!(matches!(
            DockerEndpoint::parse(Some("ssh://docker@example.com")),
            Err(ProviderError::UnsupportedDockerHost { .. })
        ));
    }

    #[test]
    fn configuration_defaults() {
        let config = ConfigurationLoader::default().with_values(json!({})).into_generic();
        let docker_config = DockerConfiguration::from_configuration(&config).unwrap();

        assert_eq!(docker_config.docker_host, None);
        assert_eq!(docker_config.docker_timeout_secs, 120);
    }

    #[test]
    fn configuration_overrides() {
        let config = ConfigurationLoader::default()
            .with_values(json!({ "docker_host": "tcp://example.com:5422", "docker_timeout_secs": 5 }))
            .into_generic();
        let docker_config = DockerConfiguration::from_configuration(&config).unwrap();

        assert_eq!(docker_config.docker_host.as_deref(), Some("tcp://example.com:5422"));
        assert_eq!(docker_config.docker_timeout_secs, 5);
    }
}
