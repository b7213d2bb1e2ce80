//! Record enrichment.
//!
//! [`RecordEnricher`] annotates log records with the orchestrator metadata of the container that emitted them. The
//! container is identified either by the record's tag or by a field of the record itself, and its metadata is resolved
//! through a [`MetadataResolver`] and cached, so the container runtime is only queried once per container until the
//! cached entry expires or is evicted.
//!
//! Enrichment of each record proceeds as follows:
//!
//! - the timestamp field is overwritten with the formatted event time
//! - the container's metadata fields are written into the record, replacing existing values
//! - if enabled, a JSON object held in the `log` field is merged into the record, either at the top level or nested
//!   under a namespace, with existing record fields taking precedence
//!
//! Records whose container cannot be determined are dropped.

use std::{error::Error as StdError, num::NonZeroUsize};

use futures::stream::{self, StreamExt as _};
use metrics::{counter, Counter};
use serde_json::Value;
use taskmeta_common::cache::Cache;
use taskmeta_env::EnvironmentProvider;
use tracing::{debug, trace, warn};

use crate::{
    metadata::{MetadataResolver, ResolveError, TaskMetadata},
    record::LogRecord,
};

mod config;
pub use self::config::{EnrichmentConfigError, EnrichmentConfiguration};

mod json_log;
pub use self::json_log::{merge_flattened, merge_namespaced, EmbeddedLog, LOG_FIELD, NAMESPACE_FIELD};

mod timestamp;
pub use self::timestamp::{format_timestamp, EventTime};

/// The result of enriching a single record.
#[derive(Debug, PartialEq)]
pub enum EnrichOutcome {
    /// The enriched record.
    Enriched(LogRecord),

    /// The record was dropped, since its container could not be determined.
    Dropped,
}

struct EnrichmentSettings {
    get_container_id_tag: bool,
    container_id_attr: String,
    timestamp_key: String,
    merge_json_log: bool,
    namespace: Option<String>,
    max_concurrency: NonZeroUsize,
}

struct Telemetry {
    records_enriched: Counter,
    records_dropped_no_container_id: Counter,
    records_dropped_resolve_error: Counter,
    json_logs_merged: Counter,
    json_logs_invalid: Counter,
}

impl Telemetry {
    fn new() -> Self {
        Self {
            records_enriched: counter!("enrichment_records_enriched_total"),
            records_dropped_no_container_id: counter!("enrichment_records_dropped_total", "reason" => "no_container_id"),
            records_dropped_resolve_error: counter!("enrichment_records_dropped_total", "reason" => "resolve_error"),
            json_logs_merged: counter!("enrichment_json_logs_total", "outcome" => "merged"),
            json_logs_invalid: counter!("enrichment_json_logs_total", "outcome" => "invalid"),
        }
    }
}

/// Enriches log records with container metadata.
///
/// Built from an [`EnrichmentConfiguration`]. The enricher owns its metadata cache, which lives as long as the enricher
/// does.
pub struct RecordEnricher<P> {
    settings: EnrichmentSettings,
    resolver: MetadataResolver<P>,
    cache: Cache<String, TaskMetadata>,
    telemetry: Telemetry,
}

impl<P> RecordEnricher<P> {
    /// Returns the ID of the container that emitted a record.
    ///
    /// When tag-based lookup is enabled, the last dot-delimited segment of the tag is used. Otherwise, or if that
    /// segment is empty, the configured record field is used, which must hold a non-empty string.
    pub fn container_id(&self, tag: &str, record: &LogRecord) -> Option<String> {
        if self.settings.get_container_id_tag {
            if let Some(container_id) = tag.rsplit('.').next().filter(|id| !id.is_empty()) {
                return Some(container_id.to_string());
            }
        }

        match record.get(&self.settings.container_id_attr) {
            Some(Value::String(container_id)) if !container_id.is_empty() => Some(container_id.clone()),
            _ => None,
        }
    }

    fn apply(&self, time: i64, mut record: LogRecord, metadata: &TaskMetadata) -> LogRecord {
        match format_timestamp(time) {
            Some(timestamp) => {
                record.insert(self.settings.timestamp_key.clone(), Value::String(timestamp));
            }
            None => debug!(time, "Event time out of range. Leaving timestamp field untouched."),
        }

        metadata.merge_into(&mut record);

        if self.settings.merge_json_log {
            match EmbeddedLog::from_record(&record) {
                Some(EmbeddedLog::Parsed(parsed)) => {
                    match &self.settings.namespace {
                        Some(namespace) => merge_namespaced(&mut record, namespace, parsed),
                        None => merge_flattened(&mut record, parsed),
                    }
                    self.telemetry.json_logs_merged.increment(1);
                }
                Some(EmbeddedLog::Invalid) => {
                    trace!("Log field is not a valid JSON object. Leaving record as-is.");
                    self.telemetry.json_logs_invalid.increment(1);
                }
                None => {}
            }
        }

        record
    }
}

impl<P> RecordEnricher<P>
where
    P: EnvironmentProvider + Send + Sync,
    P::Error: StdError + Send + Sync + 'static,
{
    /// Enriches a single record.
    ///
    /// `time` is the event time, in seconds since the Unix epoch.
    ///
    /// # Errors
    ///
    /// If the container's metadata was not cached and could not be resolved, an error is returned. Nothing is cached
    /// in that case, so the next record from the same container retries the resolution.
    pub async fn enrich(&self, tag: &str, time: i64, record: LogRecord) -> Result<EnrichOutcome, ResolveError> {
        let Some(container_id) = self.container_id(tag, &record) else {
            self.telemetry.records_dropped_no_container_id.increment(1);
            return Ok(EnrichOutcome::Dropped);
        };

        let resolver = &self.resolver;
        let id = container_id.as_str();
        let metadata = self
            .cache
            .get_or_compute(container_id.clone(), move || resolver.resolve(id))
            .await?;

        trace!(container_id, "Enriching record.");
        self.telemetry.records_enriched.increment(1);

        Ok(EnrichOutcome::Enriched(self.apply(time, record, &metadata)))
    }

    /// Enriches a batch of events sharing the same tag.
    ///
    /// Each event is a pair of event time and record. Up to the configured maximum concurrency, records are enriched
    /// concurrently, and the enriched events are returned in their original order, each with its event time unchanged.
    /// Records that are dropped, or whose metadata could not be resolved, are left out of the output.
    pub async fn filter_batch<T>(&self, tag: &str, events: Vec<(T, LogRecord)>) -> Vec<(T, LogRecord)>
    where
        T: EventTime,
    {
        let input_len = events.len();

        let enriched = stream::iter(events)
            .map(|(time, record)| async move {
                let result = self.enrich(tag, time.unix_secs(), record).await;
                (time, result)
            })
            .buffered(self.settings.max_concurrency.get())
            .filter_map(|(time, result)| async move {
                match result {
                    Ok(EnrichOutcome::Enriched(record)) => Some((time, record)),
                    Ok(EnrichOutcome::Dropped) => {
                        debug!(tag, "Dropped record without container ID.");
                        None
                    }
                    Err(e) => {
                        self.telemetry.records_dropped_resolve_error.increment(1);
                        warn!(tag, error = %e, "Dropped record after failing to resolve container metadata.");
                        None
                    }
                }
            })
            .collect::<Vec<_>>()
            .await;

        trace!(tag, input_len, output_len = enriched.len(), "Filtered batch.");
        enriched
    }
}
