use std::error::Error as StdError;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use taskmeta_components::{enrichment::RecordEnricher, record::LogRecord};
use taskmeta_env::EnvironmentProvider;
use tokio::io::{AsyncBufReadExt as _, AsyncRead, AsyncWrite, AsyncWriteExt as _, BufReader};
use tracing::{debug, warn};

/// Maximum number of events enriched together in a single batch.
const MAX_BATCH_SIZE: usize = 1024;

#[derive(Deserialize)]
struct InputEvent {
    tag: String,
    time: Number,
    record: LogRecord,
}

#[derive(Serialize)]
struct OutputEvent<'a> {
    tag: &'a str,
    time: &'a Number,
    record: &'a LogRecord,
}

/// Counters describing a completed run of [`filter_events`].
#[derive(Debug, Default, Eq, PartialEq)]
pub struct FilterStats {
    pub lines_read: u64,
    pub lines_malformed: u64,
    pub events_read: u64,
    pub events_written: u64,
}

#[derive(Default)]
struct Batch {
    tag: String,
    events: Vec<(Number, LogRecord)>,
}

impl Batch {
    fn accepts(&self, tag: &str) -> bool {
        self.events.is_empty() || (self.tag == tag && self.events.len() < MAX_BATCH_SIZE)
    }
}

/// Reads newline-delimited JSON events from `input`, enriches them, and writes the enriched events to `output`.
///
/// Each input line is an object with a `tag`, an event `time` in seconds since the Unix epoch, and a `record`. The event
/// time is written back out exactly as it was read.
/// Consecutive events sharing a tag are enriched as one batch. A batch is flushed when the tag changes, when it is
/// full, or when no further input is immediately available, so output is never held back waiting on input.
///
/// Lines that are not valid events are logged and skipped.
///
/// # Errors
///
/// If reading from `input` or writing to `output` fails, an error is returned.
pub async fn filter_events<P, R, W>(
    enricher: &RecordEnricher<P>, input: R, mut output: W,
) -> Result<FilterStats, anyhow::Error>
where
    P: EnvironmentProvider + Send + Sync,
    P::Error: StdError + Send + Sync + 'static,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(input);
    let mut stats = FilterStats::default();
    let mut batch = Batch::default();
    let mut line = Vec::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_until(b'\n', &mut line)
            .await
            .context("Failed to read from input.")?;
        if bytes_read == 0 {
            break;
        }

        stats.lines_read += 1;
        if !line.trim_ascii().is_empty() {
            match parse_event(&line) {
                Ok((tag, time, record)) => {
                    if !batch.accepts(&tag) {
                        flush_batch(enricher, &mut batch, &mut output, &mut stats).await?;
                    }
                    batch.tag = tag;
                    batch.events.push((time, record));
                    stats.events_read += 1;
                }
                Err(e) => {
                    stats.lines_malformed += 1;
                    warn!(line = stats.lines_read, error = %e, "Skipping malformed input line.");
                }
            }
        }

        if reader.buffer().is_empty() {
            flush_batch(enricher, &mut batch, &mut output, &mut stats).await?;
        }
    }

    flush_batch(enricher, &mut batch, &mut output, &mut stats).await?;
    output.flush().await.context("Failed to flush output.")?;

    Ok(stats)
}

fn parse_event(line: &[u8]) -> Result<(String, Number, LogRecord), anyhow::Error> {
    let event: InputEvent = serde_json::from_slice(line).context("Invalid event.")?;
    Ok((event.tag, event.time, event.record))
}

async fn flush_batch<P, W>(
    enricher: &RecordEnricher<P>, batch: &mut Batch, output: &mut W, stats: &mut FilterStats,
) -> Result<(), anyhow::Error>
where
    P: EnvironmentProvider + Send + Sync,
    P::Error: StdError + Send + Sync + 'static,
    W: AsyncWrite + Unpin,
{
    if batch.events.is_empty() {
        return Ok(());
    }

    let events = std::mem::take(&mut batch.events);
    let events_len = events.len();
    let enriched = enricher.filter_batch(&batch.tag, events).await;
    debug!(tag = %batch.tag, events_len, enriched_len = enriched.len(), "Processed batch.");

    let mut buf = Vec::new();
    for (time, record) in &enriched {
        let event = OutputEvent {
            tag: &batch.tag,
            time,
            record,
        };
        serde_json::to_writer(&mut buf, &event).context("Failed to serialize event.")?;
        buf.push(b'\n');
    }

    output.write_all(&buf).await.context("Failed to write to output.")?;
    output.flush().await.context("Failed to flush output.")?;
    stats.events_written += enriched.len() as u64;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use taskmeta_components::enrichment::EnrichmentConfiguration;
    use taskmeta_env::FixedEnvironmentProvider;

    use super::*;

    fn enricher() -> RecordEnricher<FixedEnvironmentProvider> {
        let provider = FixedEnvironmentProvider::default()
            .with_container(
                "foobar123",
                [
                    "MESOS_TASK_ID=hello-world.14b0596d-93ea-11e5-a134-124eefe69197",
                    "MARATHON_APP_ID=/hello-world",
                ],
            )
            .with_container(
                "foobar124",
                [
                    "mesos_task_id=ct:1448508194000:0:recurring-transaction2:task",
                    "CHRONOS_JOB_NAME=some-task-app2-deployTasks-1-1448508194",
                ],
            );

        EnrichmentConfiguration::default().build(provider).unwrap()
    }

    async fn run(input: &str) -> (FilterStats, Vec<Value>) {
        let mut output = Vec::new();
        let stats = filter_events(&enricher(), input.as_bytes(), &mut output).await.unwrap();

        let events = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (stats, events)
    }

    #[tokio::test]
    async fn enriches_events_in_order() {
        let input = concat!(
            r#"{"tag":"docker.foobar123","time":1448508594,"record":{"log":"first"}}"#,
            "\n",
            r#"{"tag":"docker.foobar123","time":1448508595.75,"record":{"log":"{\"level\":\"info\"}"}}"#,
            "\n",
            r#"{"tag":"docker.foobar124","time":1448508596,"record":{"log":"third"}}"#,
            "\n",
        );

        let (stats, events) = run(input).await;

        assert_eq!(
            stats,
            FilterStats {
                lines_read: 3,
                lines_malformed: 0,
                events_read: 3,
                events_written: 3,
            }
        );
        assert_eq!(
            events,
            [
                json!({
                    "tag": "docker.foobar123",
                    "time": 1448508594,
                    "record": {
                        "log": "first",
                        "@timestamp": "2015-11-26T03:29:54+0000",
                        "mesos_framework": "marathon",
                        "app": "hello-world",
                        "mesos_task_id": "hello-world.14b0596d-93ea-11e5-a134-124eefe69197",
                    },
                }),
                json!({
                    "tag": "docker.foobar123",
                    "time": 1448508595.75,
                    "record": {
                        "level": "info",
                        "log": "{\"level\":\"info\"}",
                        "@timestamp": "2015-11-26T03:29:55+0000",
                        "mesos_framework": "marathon",
                        "app": "hello-world",
                        "mesos_task_id": "hello-world.14b0596d-93ea-11e5-a134-124eefe69197",
                    },
                }),
                json!({
                    "tag": "docker.foobar124",
                    "time": 1448508596,
                    "record": {
                        "log": "third",
                        "@timestamp": "2015-11-26T03:29:56+0000",
                        "mesos_framework": "chronos",
                        "app": "some-task-app2",
                        "chronos_task_type": "deployTasks",
                        "mesos_task_id": "ct:1448508194000:0:recurring-transaction2:task",
                    },
                }),
            ]
        );
    }

    #[tokio::test]
    async fn skips_malformed_lines() {
        let input = concat!(
            "not json\n",
            "\n",
            r#"{"tag":"docker.foobar123","record":{"log":"no time"}}"#,
            "\n",
            r#"{"tag":"docker.foobar123","time":1448508594,"record":"not an object"}"#,
            "\n",
            r#"{"tag":"docker.foobar123","time":1448508594,"record":{"log":"valid"}}"#,
        );

        let (stats, events) = run(input).await;

        assert_eq!(stats.lines_read, 5);
        assert_eq!(stats.lines_malformed, 3);
        assert_eq!(stats.events_written, 1);
        assert_eq!(events[0]["record"]["log"], "valid");
    }

    #[tokio::test]
    async fn batches_are_capped() {
        let line = r#"{"tag":"docker.foobar123","time":1448508594,"record":{"log":"line"}}"#;
        let input = format!("{}\n", line).repeat(MAX_BATCH_SIZE + 10);

        let (stats, events) = run(&input).await;

        assert_eq!(stats.events_read, (MAX_BATCH_SIZE + 10) as u64);
        assert_eq!(events.len(), MAX_BATCH_SIZE + 10);
    }

    #[tokio::test]
    async fn event_times_pass_through() {
        let input = concat!(
            r#"{"tag":"docker.foobar123","time":1448508594.5,"record":{}}"#,
            "\n",
            r#"{"tag":"docker.foobar123","time":18446744073709551615,"record":{}}"#,
            "\n",
        );

        let (_, events) = run(input).await;

        assert_eq!(events[0]["time"], json!(1448508594.5));
        assert_eq!(events[0]["record"]["@timestamp"], "2015-11-26T03:29:54+0000");
        assert_eq!(events[1]["time"], json!(u64::MAX));
        assert!(events[1]["record"].get("@timestamp").is_none());
    }
}
