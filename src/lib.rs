//! # reqlog
//!
//! Request-lifecycle logging for HTTP services.
//!
//! Every request gets its own structured logger, derived from one process
//! logger and scoped with a correlation id plus whatever request fields you
//! ask for. Every completed response is logged exactly once. Every failure
//! that reaches the error chain is logged with the request that caused it.
//! A panic anywhere in the process is logged at `fatal` before it exits.
//!
//! ## What you get
//!
//! - A [`Logger`] that writes JSON records to any number of [`Stream`]s,
//!   with child loggers that accumulate scoped fields
//! - [`Serializers`] that turn requests, responses and failures into
//!   portable JSON, overridable per kind
//! - Middleware from [`Logging`]: attach the logger, attach `X-Request-ID`,
//!   scope request fields, log responses, log errors
//! - A [`FatalDrain`] that flushes a last record on panic
//! - A small [`App`] / [`Server`] pipeline to run it all on hyper
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use reqlog::{App, Failure, Logging, LoggerConfig, Request, RequestIdOptions, Router, Server, WriterStream};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let logging = Logging::build(
//!         LoggerConfig::new("billing", "production").stream(WriterStream::stdout()),
//!     )?;
//!
//!     let router = Router::new()
//!         .get("/users/{id}", get_user)
//!         .get("/error", fail);
//!
//!     let app = App::new(router)
//!         .wrap(logging.attach_logger_to_req())
//!         .wrap(logging.log_responses())
//!         .wrap(logging.attach_request_id_to_req(RequestIdOptions::default()))
//!         .wrap(logging.attach_to_logger("path"))
//!         .catch(logging.log_errors());
//!
//!     Server::bind(([0, 0, 0, 0], 3000).into()).serve(app).await?;
//!     Ok(())
//! }
//!
//! async fn get_user(req: Request) -> String {
//!     if let Some(log) = req.logger() {
//!         log.info("looking up user");
//!     }
//!     format!(r#"{{"id":"{}"}}"#, req.param("id").unwrap_or("unknown"))
//! }
//!
//! async fn fail(_req: Request) -> Result<&'static str, Failure> {
//!     Err(Failure::new("Error!"))
//! }
//! ```
//!
//! Streams are added with [`LoggerConfig::stream`]. To build the whole
//! config from `REQLOG_*` variables, use [`LoggerConfig::from_env`].

mod app;
mod config;
mod drain;
mod error;
mod failure;
mod handler;
mod logging;
mod request;
mod response;
mod router;
mod server;

pub mod logger;
pub mod middleware;

pub use app::App;
pub use config::{ENVIRONMENT_ENV, FATAL_GRACE_MS_ENV, LoggerConfig, NAME_ENV, STACK_TRACE_ENV, env_or};
pub use drain::{DrainConfig, ExitPolicy, FatalDrain, is_installed};
pub use error::{ConfigError, DrainError, Error};
pub use failure::{Failure, FailureKind};
pub use handler::Handler;
pub use logger::{
    Fields, Level, LogRecord, LogSink, Logger, RingBuffer, Serializers, SinkConfig, SinkStream, Stream,
    TracingStream, WriterStream,
};
pub use logging::Logging;
pub use middleware::{
    AttachField, AttachLogger, AttachRequestId, ErrorMiddleware, ErrorPolicy, LogErrors, LogResponses,
    Middleware, REQUEST_ID_HEADER, RequestIdOptions,
};
pub use request::Request;
pub use response::{IntoOutcome, IntoResponse, Outcome, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;

#[doc(hidden)]
pub mod __private {
    pub use serde_json::Value;
}
