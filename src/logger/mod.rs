//! The structured logger.
//!
//! A [`Logger`] is a cheap, immutable handle: an `Arc` to the process-wide
//! core (name, serializers, streams) plus an `Arc` to its own scoped fields.
//! [`Logger::child`] never touches the parent; it returns a new handle whose
//! fields are the parent's fields with the new ones layered on top.
//!
//! ```text
//! process logger            { version }
//!        ↓ child({requestId})
//! request logger            { version, requestId }
//!        ↓ child({user})
//! request logger            { version, requestId, user }
//! ```

pub mod record;
pub mod serializers;
pub mod stream;

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

pub use record::{Fields, Level, LogRecord};
pub use serializers::Serializers;
pub use stream::{LogSink, RingBuffer, SinkConfig, SinkStream, Stream, TracingStream, WriterStream};

use record::RESERVED_KEYS;

struct Core {
    name: String,
    pid: u32,
    serializers: Serializers,
    streams: Vec<Arc<dyn Stream>>,
}

/// A structured logger, either the process logger or a scoped child of it.
#[derive(Clone)]
pub struct Logger {
    core: Arc<Core>,
    fields: Arc<Fields>,
}

impl Logger {
    /// A root logger with no scoped fields.
    pub fn new(name: impl Into<String>, serializers: Serializers, streams: Vec<Arc<dyn Stream>>) -> Self {
        let core = Core {
            name: name.into(),
            pid: std::process::id(),
            serializers,
            streams,
        };
        Self { core: Arc::new(core), fields: Arc::new(Fields::new()) }
    }

    pub fn name(&self) -> &str { &self.core.name }

    /// Fields every record from this logger carries.
    pub fn fields(&self) -> &Fields { &self.fields }

    pub fn field(&self, key: &str) -> Option<&Value> { self.fields.get(key) }

    /// Derives a child scoped with `fields` on top of everything this logger
    /// already carries. A key that is already scoped takes the new value in
    /// the child only.
    ///
    /// Values are passed through the serializer registered for their key.
    pub fn child<K, V>(&self, fields: impl IntoIterator<Item = (K, V)>) -> Logger
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut scoped = (*self.fields).clone();
        for (key, value) in fields {
            let key = key.into();
            let value = self.core.serializers.apply(&key, &value.into());
            scoped.insert(key, value);
        }
        Logger { core: Arc::clone(&self.core), fields: Arc::new(scoped) }
    }

    /// Shorthand for a child scoped with a single field.
    pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Logger {
        self.child([(key.into(), value.into())])
    }

    /// Emits one record to every stream.
    ///
    /// Per-call `fields` are serialized and override scoped fields of the
    /// same name. Fields named after core record keys are dropped.
    pub fn log(&self, level: Level, fields: Fields, msg: impl Into<String>) {
        let mut merged = (*self.fields).clone();
        for (key, value) in fields {
            let value = self.core.serializers.apply(&key, &value);
            merged.insert(key, value);
        }
        for key in RESERVED_KEYS {
            merged.remove(key);
        }

        let record = LogRecord {
            name: self.core.name.clone(),
            pid: self.core.pid,
            level,
            msg: msg.into(),
            time: Utc::now(),
            fields: merged,
        };
        for stream in &self.core.streams {
            stream.write(&record);
        }
    }

    pub fn trace(&self, msg: impl Into<String>) { self.log(Level::Trace, Fields::new(), msg) }
    pub fn debug(&self, msg: impl Into<String>) { self.log(Level::Debug, Fields::new(), msg) }
    pub fn info(&self, msg: impl Into<String>) { self.log(Level::Info, Fields::new(), msg) }
    pub fn warn(&self, msg: impl Into<String>) { self.log(Level::Warn, Fields::new(), msg) }
    pub fn error(&self, msg: impl Into<String>) { self.log(Level::Error, Fields::new(), msg) }
    pub fn fatal(&self, msg: impl Into<String>) { self.log(Level::Fatal, Fields::new(), msg) }

    /// Flushes every stream.
    pub fn flush(&self) {
        for stream in &self.core.streams {
            stream.flush();
        }
    }

    /// Descriptors of the configured streams.
    pub fn describe_streams(&self) -> Value {
        Value::Array(self.core.streams.iter().map(|s| s.describe()).collect())
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.core.name)
            .field("fields", &self.fields)
            .field("streams", &self.core.streams.len())
            .finish()
    }
}

/// Builds a [`Fields`] map from `key => value` pairs.
///
/// ```rust
/// use reqlog::fields;
///
/// let f = fields! { "user" => "alice", "attempt" => 3 };
/// assert_eq!(f["attempt"], 3);
/// ```
#[macro_export]
macro_rules! fields {
    () => { $crate::Fields::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Fields::new();
        $( map.insert(::std::string::String::from($key), $crate::__private::Value::from($value)); )+
        map
    }};
}
