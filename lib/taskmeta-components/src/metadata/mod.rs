//! Orchestrator metadata.
//!
//! Containers launched through Mesos carry a handful of well-known environment variables describing the task that
//! launched them. This module turns a container's raw environment into [`TaskMetadata`] and resolves it on demand
//! through an [`EnvironmentProvider`].

use std::{error::Error as StdError, fmt};

use serde_json::Value;
use snafu::Snafu;
use taskmeta_env::EnvironmentProvider;
use tracing::{debug, trace};

use crate::record::LogRecord;

mod parser;
pub use self::parser::{
    match_chronos_job, match_marathon_app, parse_key_value, ChronosJob, ChronosJobPattern, PatternError,
    DEFAULT_CHRONOS_TASK_REGEX,
};

mod rules;

/// Record field holding the framework that launched the container.
pub const FRAMEWORK_FIELD: &str = "mesos_framework";

/// Record field holding the application name.
pub const APP_FIELD: &str = "app";

/// Record field holding the orchestrator task ID.
pub const TASK_ID_FIELD: &str = "mesos_task_id";

/// Record field holding the Chronos task type.
pub const CHRONOS_TASK_TYPE_FIELD: &str = "chronos_task_type";

/// The framework that scheduled a container.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Framework {
    /// Marathon, for long-running applications.
    Marathon,

    /// Chronos, for scheduled jobs.
    Chronos,
}

impl Framework {
    /// Returns the name of the framework as written into records.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Marathon => "marathon",
            Self::Chronos => "chronos",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator metadata of a container.
///
/// An unset field means the value could not be determined. `chronos_task_type` is only ever set together with `app`,
/// from the same Chronos job name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TaskMetadata {
    /// Framework that launched the container.
    pub framework: Option<Framework>,

    /// Application or job name.
    pub app: Option<String>,

    /// Task ID assigned by the orchestrator.
    pub task_id: Option<String>,

    /// Chronos task type.
    pub chronos_task_type: Option<String>,
}

impl TaskMetadata {
    /// Returns `true` if no field was determined.
    pub fn is_empty(&self) -> bool {
        self.framework.is_none() && self.app.is_none() && self.task_id.is_none() && self.chronos_task_type.is_none()
    }

    /// Writes the determined fields into the given record, replacing any existing values.
    ///
    /// Unset fields are skipped entirely, so they never mask what the record already holds.
    pub fn merge_into(&self, record: &mut LogRecord) {
        if let Some(framework) = self.framework {
            record.insert(FRAMEWORK_FIELD.to_string(), Value::from(framework.as_str()));
        }

        let fields = [
            (APP_FIELD, &self.app),
            (TASK_ID_FIELD, &self.task_id),
            (CHRONOS_TASK_TYPE_FIELD, &self.chronos_task_type),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                record.insert(field.to_string(), Value::from(value.as_str()));
            }
        }
    }
}

/// A metadata resolution error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ResolveError {
    /// Failed to fetch the environment of the container.
    #[snafu(display("failed to fetch environment of container '{}': {}", container_id, source))]
    Fetch {
        /// Container being resolved.
        container_id: String,

        /// Error source.
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Resolves the orchestrator metadata of containers.
///
/// Resolution fetches the container's environment from the configured provider and classifies each variable in the
/// order the provider returned them. When several framework variables are present, the last one wins and replaces the
/// framework, app, and Chronos task type as a whole: a container carrying both `MARATHON_APP_ID` and `CHRONOS_JOB_NAME`
/// is reported under whichever framework comes last, with none of the other framework's fields.
pub struct MetadataResolver<P> {
    provider: P,
    chronos_pattern: ChronosJobPattern,
}

impl<P> MetadataResolver<P> {
    /// Creates a new `MetadataResolver` with the given environment provider and Chronos job name pattern.
    pub fn new(provider: P, chronos_pattern: ChronosJobPattern) -> Self {
        Self {
            provider,
            chronos_pattern,
        }
    }

    /// Returns a reference to the environment provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Classifies the given environment into task metadata.
    pub fn classify_environment<S: AsRef<str>>(&self, environment: &[S]) -> TaskMetadata {
        let mut metadata = TaskMetadata::default();
        for raw in environment {
            if let Some((rule, update)) = rules::classify(raw.as_ref(), &self.chronos_pattern) {
                trace!(rule, "Classified environment variable.");
                update.apply_to(&mut metadata);
            }
        }
        metadata
    }
}

impl<P> MetadataResolver<P>
where
    P: EnvironmentProvider + Send + Sync,
    P::Error: StdError + Send + Sync + 'static,
{
    /// Resolves the metadata of the given container.
    ///
    /// A container unknown to the provider resolves to empty metadata.
    ///
    /// # Errors
    ///
    /// If the provider fails to fetch the container's environment, an error is returned.
    pub async fn resolve(&self, container_id: &str) -> Result<TaskMetadata, ResolveError> {
        let environment = match self.provider.fetch_environment(container_id).await {
            Ok(Some(environment)) => environment,
            Ok(None) => {
                debug!(container_id, "Container not found. Resolving to empty metadata.");
                return Ok(TaskMetadata::default());
            }
            Err(e) => {
                return Err(ResolveError::Fetch {
                    container_id: container_id.to_string(),
                    source: Box::new(e),
                })
            }
        };

        let metadata = self.classify_environment(&environment);
        debug!(
            container_id,
            framework = metadata.framework.map(|framework| framework.as_str()),
            app = metadata.app.as_deref(),
            "Resolved container metadata."
        );

        Ok(metadata)
    }
}
