//! Log record representation.

use serde_json::{Map, Value};

/// A log record: an ordered mapping of field name to value.
///
/// Field order is preserved, both for fields present on the incoming record and for fields added during enrichment.
pub type LogRecord = Map<String, Value>;
