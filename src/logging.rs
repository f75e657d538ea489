//! The logging context: builds the process logger and hands out the
//! middleware that attach it to requests.

use crate::config::LoggerConfig;
use crate::drain::FatalDrain;
use crate::error::{ConfigError, DrainError};
use crate::logger::{Logger, Serializers};
use crate::middleware::{
    AttachField, AttachLogger, AttachRequestId, ErrorPolicy, LogErrors, LogResponses, RequestIdOptions,
};

/// A built logging context.
///
/// Install its middleware in this order: [`attach_logger_to_req`],
/// [`log_responses`], [`attach_request_id_to_req`], any number of
/// [`attach_to_logger`], your own middleware and routes, and
/// [`log_errors`] on the error chain.
///
/// ```rust
/// use reqlog::{App, DrainConfig, Logging, LoggerConfig, RequestIdOptions, RingBuffer, Router};
///
/// let ring = RingBuffer::new(100);
/// let logging = Logging::build(
///     LoggerConfig::new("billing", "dev")
///         .stream(ring.clone())
///         .fatal_drain(DrainConfig::disabled()),
/// )?;
///
/// let app = App::new(Router::new())
///     .wrap(logging.attach_logger_to_req())
///     .wrap(logging.log_responses())
///     .wrap(logging.attach_request_id_to_req(RequestIdOptions::default()))
///     .catch(logging.log_errors());
/// # Ok::<(), reqlog::ConfigError>(())
/// ```
///
/// [`attach_logger_to_req`]: Logging::attach_logger_to_req
/// [`log_responses`]: Logging::log_responses
/// [`attach_request_id_to_req`]: Logging::attach_request_id_to_req
/// [`attach_to_logger`]: Logging::attach_to_logger
/// [`log_errors`]: Logging::log_errors
#[derive(Clone, Debug)]
pub struct Logging {
    logger: Logger,
}

impl Logging {
    /// Validates `config`, builds the process logger and, unless disabled,
    /// installs the fatal drain.
    ///
    /// The logger is named `{name}_{environment}`. Caller serializers replace
    /// the defaults kind by kind. A configured `version` is scoped into the
    /// process logger so every record carries it.
    pub fn build(config: LoggerConfig) -> Result<Self, ConfigError> {
        if config.name.is_empty() {
            return Err(ConfigError::MissingName);
        }
        if config.environment.is_empty() {
            return Err(ConfigError::MissingEnvironment);
        }
        if config.streams.is_empty() {
            return Err(ConfigError::MissingStreams);
        }

        let descriptors = serde_json::Value::Array(config.streams.iter().map(|s| s.describe()).collect());
        let serializers = Serializers::defaults(config.stack_trace, descriptors).merge(config.serializers);

        let root = Logger::new(
            format!("{}_{}", config.name, config.environment),
            serializers,
            config.streams,
        );
        let logger = match config.version {
            Some(version) => root.with("version", version),
            None => root,
        };

        if config.fatal_drain.enabled {
            let drain = FatalDrain::new(logger.clone(), config.fatal_drain.grace);
            match drain.install(config.fatal_drain.exit) {
                Ok(()) => {}
                Err(DrainError::AlreadyInstalled) => {
                    tracing::debug!(logger = logger.name(), "fatal drain already installed, keeping the first one");
                }
            }
        }

        Ok(Self { logger })
    }

    /// The process logger.
    pub fn logger(&self) -> &Logger { &self.logger }

    /// Attaches the process logger to every request.
    pub fn attach_logger_to_req(&self) -> AttachLogger {
        AttachLogger::new(self.logger.clone())
    }

    /// Resolves the correlation id and scopes the request logger with it.
    pub fn attach_request_id_to_req(&self, options: RequestIdOptions) -> AttachRequestId {
        AttachRequestId::new(options)
    }

    /// Scopes the request logger with the request's `field`.
    pub fn attach_to_logger(&self, field: impl Into<String>) -> AttachField {
        AttachField::new(field)
    }

    /// Logs `"Response finished"` once per response.
    pub fn log_responses(&self) -> LogResponses {
        LogResponses
    }

    /// Logs `"Error"` for each failure and forwards it.
    pub fn log_errors(&self) -> LogErrors {
        LogErrors::new(ErrorPolicy::Forward)
    }

    /// Logs `"Error"` for each failure, then applies `policy`.
    pub fn log_errors_with(&self, policy: ErrorPolicy) -> LogErrors {
        LogErrors::new(policy)
    }
}
