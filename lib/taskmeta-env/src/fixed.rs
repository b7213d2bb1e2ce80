use std::{collections::HashMap, convert::Infallible, path::Path};

use async_trait::async_trait;
use snafu::ResultExt as _;

use crate::{EnvironmentProvider, ParseEnvironmentFile, ProviderError, ReadEnvironmentFile};

/// Environment provider based on a fixed set of container environments.
///
/// Containers not present in the set are reported as not found.
#[derive(Clone, Debug, Default)]
pub struct FixedEnvironmentProvider {
    environments: HashMap<String, Vec<String>>,
}

impl FixedEnvironmentProvider {
    /// Loads a `FixedEnvironmentProvider` from a JSON file.
    ///
    /// The file must contain a single object, mapping each container ID to its list of `KEY=VALUE` strings.
    ///
    /// # Errors
    ///
    /// If the file cannot be read, or is not a valid environment mapping, an error is returned.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadEnvironmentFile { path })?;
        let environments = serde_json::from_str(&contents).context(ParseEnvironmentFile { path })?;
        Ok(Self { environments })
    }

    /// Adds, or replaces, the environment of a container.
    pub fn with_container<I, S>(mut self, container_id: impl Into<String>, environment: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environments
            .insert(container_id.into(), environment.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl EnvironmentProvider for FixedEnvironmentProvider {
    type Error = Infallible;

    async fn fetch_environment(&self, container_id: &str) -> Result<Option<Vec<String>>, Self::Error> {
        Ok(self.environments.get(container_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[tokio::test]
    async fn known_and_unknown_containers() {
        let provider = FixedEnvironmentProvider::default()
            .with_container("foobar123", ["MARATHON_APP_ID=/hello-world", "HOME=/root"]);

        let environment = provider.fetch_environment("foobar123").await.unwrap();
        assert_eq!(
            environment,
            Some(vec!["MARATHON_APP_ID=/hello-world".to_string(), "HOME=/root".to_string()])
        );

        assert_eq!(provider.fetch_environment("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"foobar124": ["CHRONOS_JOB_NAME=app-deployTasks-1-1448508194"]}"#)
            .unwrap();

        let provider = FixedEnvironmentProvider::from_json_file(file.path()).unwrap();
        let environment = provider.fetch_environment("foobar124").await.unwrap();
        assert_eq!(
            environment,
            Some(vec!["CHRONOS_JOB_NAME=app-deployTasks-1-1448508194".to_string()])
        );
    }

    #[test]
    fn invalid_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"["not", "a", "map"]"#).unwrap();

        let result = FixedEnvironmentProvider::from_json_file(file.path());
        assert!(matches!(result, Err(ProviderError::ParseEnvironmentFile { .. })));
    }
}
