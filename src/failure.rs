//! Request-handling failures.
//!
//! A [`Failure`] is what a handler or middleware returns when it cannot
//! produce a response. It is routed to the error middleware chain, logged,
//! and eventually turned into a bare status response by the host.
//!
//! Any `std::error::Error` converts into a `Failure`, so `?` works inside
//! handlers:
//!
//! ```rust
//! use reqlog::{Failure, Request};
//!
//! async fn read_config(_req: Request) -> Result<String, Failure> {
//!     let raw = std::fs::read_to_string("/etc/app.toml")?;
//!     Ok(raw)
//! }
//! ```

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::panic::PanicHookInfo;

use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};

/// Where in the request lifecycle a failure was raised.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Returned from an endpoint handler.
    Handler,
    /// Returned from a middleware before the handler ran.
    Middleware,
    /// A panic caught by the fatal drain.
    Panic,
    /// Not yet attributed.
    #[default]
    Unknown,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Handler => "handler",
            Self::Middleware => "middleware",
            Self::Panic => "panic",
            Self::Unknown => "unknown",
        }
    }
}

/// A structured failure: a name, a message and arbitrary extra properties.
pub struct Failure {
    name: String,
    message: String,
    kind: FailureKind,
    status: StatusCode,
    stack: Option<String>,
    props: Map<String, Value>,
}

impl Failure {
    /// A generic `Error` with status 500.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_owned(),
            message: message.into(),
            kind: FailureKind::Unknown,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            stack: capture_stack(),
            props: Map::new(),
        }
    }

    /// Wraps a Rust error. The name is the error's short type name.
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut failure = Self::new(err.to_string()).with_name(short_type_name::<E>());
        if let Some(source) = err.source() {
            failure.props.insert("cause".to_owned(), Value::String(source.to_string()));
        }
        failure
    }

    /// Builds the failure reported by the fatal drain for a panic.
    pub fn from_panic(info: &PanicHookInfo<'_>) -> Self {
        let mut failure = Self::from_panic_payload(info.payload());
        failure.stack = Some(Backtrace::force_capture().to_string());

        if let Some(location) = info.location() {
            failure.props.insert(
                "location".to_owned(),
                serde_json::json!({
                    "file": location.file(),
                    "line": location.line(),
                    "column": location.column(),
                }),
            );
        }
        if let Some(thread) = std::thread::current().name() {
            failure.props.insert("thread".to_owned(), Value::String(thread.to_owned()));
        }
        failure
    }

    /// Builds the failure for a panic the pipeline caught, from the payload
    /// `catch_unwind` returned.
    pub fn from_panic_payload(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Box<dyn Any>".to_owned());
        Self::new(message).with_name("Panic").with_kind(FailureKind::Panic)
    }

    /// The failure used when a middleware needs a request logger and none is
    /// attached yet.
    pub(crate) fn logger_missing(middleware: &str) -> Self {
        Self::new(format!(
            "`{middleware}` requires a request logger; install `attach_logger_to_req` first"
        ))
        .with_name("LoggerMissing")
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_kind(mut self, kind: FailureKind) -> Self {
        self.kind = kind;
        self
    }

    /// Status the host responds with if no error handler takes over.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Attaches an extra property, serialized alongside name and message.
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn message(&self) -> &str { &self.message }
    pub fn kind(&self) -> FailureKind { self.kind }
    pub fn status(&self) -> StatusCode { self.status }
    pub fn stack(&self) -> Option<&str> { self.stack.as_deref() }
    pub fn prop(&self, key: &str) -> Option<&Value> { self.props.get(key) }

    /// Sets the kind only when nothing attributed the failure yet.
    pub(crate) fn attribute(mut self, kind: FailureKind) -> Self {
        if self.kind == FailureKind::Unknown {
            self.kind = kind;
        }
        self
    }

    /// Raw representation handed to the `err` serializer.
    ///
    /// Extra properties come first so the core keys cannot be shadowed.
    pub fn to_value(&self) -> Value {
        let mut obj = self.props.clone();
        obj.insert("name".to_owned(), Value::String(self.name.clone()));
        obj.insert("message".to_owned(), Value::String(self.message.clone()));
        obj.insert("kind".to_owned(), Value::String(self.kind.as_str().to_owned()));
        obj.insert("status".to_owned(), Value::from(self.status.as_u16()));
        if let Some(stack) = &self.stack {
            obj.insert("stack".to_owned(), Value::String(stack.clone()));
        }
        Value::Object(obj)
    }
}

impl<E> From<E> for Failure
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::from_error(err)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("name", &self.name)
            .field("message", &self.message)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("props", &self.props)
            .finish_non_exhaustive()
    }
}

fn capture_stack() -> Option<String> {
    let bt = Backtrace::capture();
    match bt.status() {
        BacktraceStatus::Captured => Some(bt.to_string()),
        _ => None,
    }
}

// `std::io::error::Error` -> `Error`, `my::Thing<u8>` -> `Thing`
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_owned()
}
