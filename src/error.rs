//! Unified error types.

/// The error type returned by reqlog's fallible infrastructure operations.
///
/// Application-level failures (a handler that could not do its job) are
/// expressed as [`Failure`](crate::Failure) values and flow through the error
/// middleware chain. This type surfaces infrastructure failures: bad
/// configuration, binding to a port, accepting a connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Raised by [`Logging::build`](crate::Logging::build) when a required option
/// is missing. Never recovered: fix the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("`name` is required")]
    MissingName,

    #[error("`environment` is required")]
    MissingEnvironment,

    #[error("`streams` is required and must contain at least one stream")]
    MissingStreams,
}

/// Raised when the process-wide fatal drain is registered a second time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DrainError {
    #[error("a fatal drain is already installed for this process")]
    AlreadyInstalled,
}
