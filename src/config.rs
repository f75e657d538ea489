//! Logger configuration.
//!
//! [`LoggerConfig`] is a plain struct: fill in the fields directly or chain
//! the builder methods. Nothing is validated until
//! [`Logging::build`](crate::Logging::build), which rejects a missing name,
//! environment or stream list.
//!
//! ```rust
//! use reqlog::{LoggerConfig, RingBuffer};
//!
//! let ring = RingBuffer::new(100);
//! let config = LoggerConfig::new("billing", "staging")
//!     .stream(ring.clone())
//!     .version(serde_json::json!({ "git": "3f2a9c1" }))
//!     .stack_trace(true);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::drain::DrainConfig;
use crate::logger::{Serializers, Stream, WriterStream};

/// Service name.
pub const NAME_ENV: &str = "REQLOG_NAME";

/// Deployment environment, e.g. `production`.
pub const ENVIRONMENT_ENV: &str = "REQLOG_ENVIRONMENT";

/// `1`/`true` to include stack traces in serialized failures.
pub const STACK_TRACE_ENV: &str = "REQLOG_STACK_TRACE";

/// Fatal drain grace period in milliseconds.
pub const FATAL_GRACE_MS_ENV: &str = "REQLOG_FATAL_GRACE_MS";

/// Everything needed to build the process logger.
#[derive(Clone, Default)]
pub struct LoggerConfig {
    /// Service name. Required.
    pub name: String,
    /// Deployment environment. Required.
    pub environment: String,
    /// Serializers layered over the defaults; per kind these win.
    pub serializers: Serializers,
    /// Output streams, in write order. At least one is required.
    pub streams: Vec<Arc<dyn Stream>>,
    /// Opaque tag carried by every record when set.
    pub version: Option<Value>,
    /// Include stack traces in serialized failures.
    pub stack_trace: bool,
    /// Panic-time flush behaviour.
    pub fatal_drain: DrainConfig,
}

impl LoggerConfig {
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self { name: name.into(), environment: environment.into(), ..Self::default() }
    }

    /// Reads name, environment, stack-trace flag and drain grace period from
    /// the `REQLOG_*` environment variables and logs to stdout.
    ///
    /// Unset variables leave the defaults in place, so a missing name or
    /// environment still fails at build time.
    pub fn from_env() -> Self {
        let mut config = Self::new(env_or(NAME_ENV, ""), env_or(ENVIRONMENT_ENV, ""))
            .stream(WriterStream::stdout());
        config.stack_trace = matches!(env_or(STACK_TRACE_ENV, "").as_str(), "1" | "true");
        if let Ok(ms) = env_or(FATAL_GRACE_MS_ENV, "").parse::<u64>() {
            config.fatal_drain.grace = Duration::from_millis(ms);
        }
        config
    }

    /// Appends an output stream.
    pub fn stream(mut self, stream: impl Stream + 'static) -> Self {
        self.streams.push(Arc::new(stream));
        self
    }

    /// Registers a serializer override for `kind`.
    pub fn serializer<F>(mut self, kind: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.serializers = self.serializers.with(kind, f);
        self
    }

    pub fn version(mut self, version: impl Into<Value>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn stack_trace(mut self, enabled: bool) -> Self {
        self.stack_trace = enabled;
        self
    }

    pub fn fatal_drain(mut self, drain: DrainConfig) -> Self {
        self.fatal_drain = drain;
        self
    }
}

impl fmt::Debug for LoggerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerConfig")
            .field("name", &self.name)
            .field("environment", &self.environment)
            .field("serializers", &self.serializers)
            .field("streams", &self.streams.len())
            .field("version", &self.version)
            .field("stack_trace", &self.stack_trace)
            .field("fatal_drain", &self.fatal_drain)
            .finish()
    }
}

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
