//! Emitted log records and severity levels.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Named fields attached to a logger or a single record.
pub type Fields = BTreeMap<String, Value>;

/// Keys owned by the record itself. Scoped fields with these names are
/// dropped when a record is built.
pub(crate) const RESERVED_KEYS: [&str; 5] = ["name", "pid", "level", "msg", "time"];

/// Record severity, lowest to highest.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured log entry, as handed to every stream.
///
/// Serializes to a single flat JSON object: the core keys followed by every
/// scoped and per-call field.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub name: String,
    pub pid: u32,
    pub level: Level,
    pub msg: String,
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Fields,
}

impl LogRecord {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The record as a JSON value, exactly as streams serialize it.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_flattened_next_to_core_keys() {
        let mut fields = Fields::new();
        fields.insert("requestId".to_owned(), Value::from("abc"));
        let record = LogRecord {
            name: "svc_dev".to_owned(),
            pid: 7,
            level: Level::Warn,
            msg: "hello".to_owned(),
            time: Utc::now(),
            fields,
        };

        let value = record.to_value();
        assert_eq!(value["name"], "svc_dev");
        assert_eq!(value["level"], "warn");
        assert_eq!(value["msg"], "hello");
        assert_eq!(value["requestId"], "abc");
        assert!(value["time"].is_string());
    }

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(Level::Fatal > Level::Error);
        assert!(Level::Info > Level::Debug);
        assert_eq!(Level::Warn.to_string(), "warn");
    }
}
