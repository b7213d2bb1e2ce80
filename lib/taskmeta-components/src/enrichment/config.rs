use std::{num::NonZeroUsize, time::Duration};

use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};
use taskmeta_common::cache::{CacheBuilder, CacheError};
use taskmeta_config::{ConfigurationError, GenericConfiguration};
use tracing::debug;

use super::{EnrichmentSettings, RecordEnricher, Telemetry};
use crate::metadata::{ChronosJobPattern, MetadataResolver, PatternError, DEFAULT_CHRONOS_TASK_REGEX};

const CACHE_IDENTIFIER: &str = "container_metadata";

const fn default_cache_size() -> usize {
    1000
}

const fn default_cache_ttl() -> i64 {
    3600
}

const fn default_true() -> bool {
    true
}

fn default_container_id_attr() -> String {
    "container_id".to_string()
}

fn default_timestamp_key() -> String {
    "@timestamp".to_string()
}

fn default_chronos_task_regex() -> String {
    DEFAULT_CHRONOS_TASK_REGEX.to_string()
}

const fn default_max_concurrency() -> usize {
    64
}

/// An enrichment configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum EnrichmentConfigError {
    /// The cache size was zero.
    #[snafu(display("cache_size must be at least 1"))]
    ZeroCacheSize,

    /// The maximum concurrency was zero.
    #[snafu(display("max_concurrency must be at least 1"))]
    ZeroConcurrency,

    /// The Chronos task pattern was invalid.
    #[snafu(display("invalid chronos_task_regex: {}", source))]
    ChronosTaskPattern {
        /// Error source.
        source: PatternError,
    },

    /// The metadata cache could not be created.
    #[snafu(display("failed to create metadata cache: {}", source))]
    Cache {
        /// Error source.
        source: CacheError,
    },
}

/// Record enrichment configuration.
///
/// Controls where container IDs are read from, how long resolved metadata is cached, and how embedded JSON log lines
/// are merged.
#[derive(Clone, Debug, Deserialize)]
pub struct EnrichmentConfiguration {
    /// Maximum number of containers whose metadata is cached.
    ///
    /// When the cache is full, the least-recently-used container is evicted. Defaults to 1000.
    #[serde(default = "default_cache_size")]
    cache_size: usize,

    /// Time, in seconds, that resolved metadata stays cached.
    ///
    /// A negative value disables expiration, leaving only capacity-based eviction. Defaults to 3600 seconds.
    #[serde(default = "default_cache_ttl")]
    cache_ttl: i64,

    /// Whether to take the container ID from the last dot-delimited segment of the tag.
    ///
    /// Defaults to `true`.
    #[serde(default = "default_true")]
    get_container_id_tag: bool,

    /// Record field holding the container ID, used when the tag does not yield one.
    ///
    /// Defaults to `container_id`.
    #[serde(default = "default_container_id_attr")]
    container_id_attr: String,

    /// Record field to overwrite with the formatted event timestamp.
    ///
    /// Defaults to `@timestamp`.
    #[serde(default = "default_timestamp_key")]
    timestamp_key: String,

    /// Whether to merge JSON objects found in the `log` field into the record.
    ///
    /// Defaults to `true`.
    #[serde(default = "default_true")]
    merge_json_log: bool,

    /// Pattern for parsing Chronos job names.
    ///
    /// Must define the named capture groups `app` and `task_type`.
    #[serde(default = "default_chronos_task_regex", alias = "cronos_task_regex")]
    chronos_task_regex: String,

    /// Record field to nest merged JSON under, instead of merging it into the top level of the record.
    ///
    /// Unset by default.
    #[serde(default)]
    namespace_env_var: Option<String>,

    /// Maximum number of records of a single batch enriched concurrently.
    ///
    /// Defaults to 64.
    #[serde(default = "default_max_concurrency")]
    max_concurrency: usize,
}

impl EnrichmentConfiguration {
    /// Creates a new `EnrichmentConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        config.as_typed()
    }

    /// Builds a [`RecordEnricher`] that resolves metadata through the given environment provider.
    ///
    /// The enricher owns a new, empty metadata cache.
    ///
    /// # Errors
    ///
    /// If the configuration holds invalid values, an error is returned.
    pub fn build<P>(&self, env_provider: P) -> Result<RecordEnricher<P>, EnrichmentConfigError> {
        let cache_size = NonZeroUsize::new(self.cache_size).ok_or(EnrichmentConfigError::ZeroCacheSize)?;
        let max_concurrency = NonZeroUsize::new(self.max_concurrency).ok_or(EnrichmentConfigError::ZeroConcurrency)?;
        let chronos_pattern = ChronosJobPattern::new(&self.chronos_task_regex).context(ChronosTaskPattern)?;
        let cache_ttl = u64::try_from(self.cache_ttl).ok().map(Duration::from_secs);

        let cache = CacheBuilder::from_identifier(CACHE_IDENTIFIER)
            .context(Cache)?
            .with_capacity(cache_size)
            .with_time_to_live(cache_ttl)
            .build();

        debug!(
            cache_size = cache_size.get(),
            cache_ttl = ?cache_ttl,
            chronos_task_regex = chronos_pattern.as_str(),
            "Built record enricher."
        );

        Ok(RecordEnricher {
            settings: EnrichmentSettings {
                get_container_id_tag: self.get_container_id_tag,
                container_id_attr: self.container_id_attr.clone(),
                timestamp_key: self.timestamp_key.clone(),
                merge_json_log: self.merge_json_log,
                namespace: self.namespace_env_var.clone(),
                max_concurrency,
            },
            resolver: MetadataResolver::new(env_provider, chronos_pattern),
            cache,
            telemetry: Telemetry::new(),
        })
    }
}

impl Default for EnrichmentConfiguration {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            cache_ttl: default_cache_ttl(),
            get_container_id_tag: default_true(),
            container_id_attr: default_container_id_attr(),
            timestamp_key: default_timestamp_key(),
            merge_json_log: default_true(),
            chronos_task_regex: default_chronos_task_regex(),
            namespace_env_var: None,
            max_concurrency: default_max_concurrency(),
        }
    }
}
