use serde_json::{Map, Value};

use crate::record::LogRecord;

/// Record field holding the raw log line.
pub const LOG_FIELD: &str = "log";

/// Record field naming the key that namespaced JSON was nested under.
pub const NAMESPACE_FIELD: &str = "namespace";

/// A JSON object embedded in the `log` field of a record.
#[derive(Debug, PartialEq)]
pub enum EmbeddedLog {
    /// The log line is a JSON object.
    Parsed(Map<String, Value>),

    /// The log line looks like a JSON object but could not be parsed as one.
    Invalid,
}

impl EmbeddedLog {
    /// Extracts the embedded JSON object from the given record's `log` field.
    ///
    /// Returns `None` if the record has no `log` field, or if its trimmed value is not enclosed in braces.
    pub fn from_record(record: &LogRecord) -> Option<Self> {
        let log = match record.get(LOG_FIELD)? {
            Value::String(log) => log.trim(),
            _ => return Some(Self::Invalid),
        };

        if !log.starts_with('{') || !log.ends_with('}') {
            return None;
        }

        match serde_json::from_str(log) {
            Ok(Value::Object(object)) => Some(Self::Parsed(object)),
            _ => Some(Self::Invalid),
        }
    }
}

/// Merges the top-level fields of `parsed` into `record`.
///
/// Fields already present in the record take precedence. Parsed fields come first in the resulting field order.
pub fn merge_flattened(record: &mut LogRecord, parsed: Map<String, Value>) {
    let mut merged = parsed;
    for (key, value) in std::mem::take(record) {
        merged.insert(key, value);
    }
    *record = merged;
}

/// Nests `parsed` under `namespace` in `record`, and records the namespace name in the `namespace` field.
///
/// Neither field is written if the record already holds it.
pub fn merge_namespaced(record: &mut LogRecord, namespace: &str, parsed: Map<String, Value>) {
    let mut merged = LogRecord::new();
    merged.insert(namespace.to_string(), Value::Object(parsed));
    merged.insert(NAMESPACE_FIELD.to_string(), Value::from(namespace));
    merge_flattened(record, merged);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> LogRecord {
        match value {
            Value::Object(object) => object,
            _ => panic!("test records must be objects"),
        }
    }

    #[test]
    fn parsed_object() {
        let record = record(json!({ "log": "  {\"test_key\":\"Hello World\"}\n" }));
        assert_eq!(
            EmbeddedLog::from_record(&record),
            Some(EmbeddedLog::Parsed(
                json!({ "test_key": "Hello World" }).as_object().cloned().unwrap()
            ))
        );
    }

    #[test]
    fn not_a_json_object() {
        assert_eq!(EmbeddedLog::from_record(&record(json!({}))), None);
        assert_eq!(
            EmbeddedLog::from_record(&record(json!({ "log": "Hello World" }))),
            None
        );
        assert_eq!(EmbeddedLog::from_record(&record(json!({ "log": "[1, 2]" }))), None);
    }

    #[test]
    fn invalid_json() {
        let unterminated = record(json!({ "log": r#"{"test_key":"Hello World""# }));
        assert_eq!(EmbeddedLog::from_record(&unterminated), None);

        let malformed = record(json!({ "log": r#"{"test_key":"Hello World", "badnews"}"# }));
        assert_eq!(EmbeddedLog::from_record(&malformed), Some(EmbeddedLog::Invalid));

        let not_a_string = record(json!({ "log": { "test_key": "Hello World" } }));
        assert_eq!(EmbeddedLog::from_record(&not_a_string), Some(EmbeddedLog::Invalid));
    }

    #[test]
    fn flattened_merge_prefers_record_fields() {
        let mut target = record(json!({ "log": "{...}", "app": "hello-world" }));
        let parsed = record(json!({ "app": "from-log", "level": "info" }));

        merge_flattened(&mut target, parsed);

        assert_eq!(
            Value::Object(target.clone()),
            json!({ "app": "hello-world", "level": "info", "log": "{...}" })
        );
        assert_eq!(target.keys().collect::<Vec<_>>(), ["app", "level", "log"]);
    }

    #[test]
    fn namespaced_merge() {
        let mut target = record(json!({ "log": "{...}", "test_key": "untouched" }));
        let parsed = record(json!({ "test_key": "Hello World" }));

        merge_namespaced(&mut target, "ns", parsed);

        assert_eq!(
            Value::Object(target),
            json!({
                "log": "{...}",
                "test_key": "untouched",
                "ns": { "test_key": "Hello World" },
                "namespace": "ns",
            })
        );
    }

    #[test]
    fn namespaced_merge_keeps_existing_fields() {
        let mut target = record(json!({ "ns": "existing", "namespace": "other" }));

        merge_namespaced(&mut target, "ns", record(json!({ "k": "v" })));

        assert_eq!(Value::Object(target), json!({ "ns": "existing", "namespace": "other" }));
    }
}
