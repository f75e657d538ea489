//! Terminal log records: one per completed response, one per handled
//! failure.

use crate::failure::Failure;
use crate::fields;
use crate::logger::Level;
use crate::request::Request;
use crate::response::Response;

use super::{ErrorMiddleware, Middleware};

/// Logs `"Response finished"` once per response.
///
/// Registers a completion hook as soon as it runs, so install it right after
/// [`AttachLogger`](super::AttachLogger) and before anything that could end
/// the request early. The hook logs through whatever logger the request
/// carries when the response completes, including scope added after this
/// middleware ran.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogResponses;

impl Middleware for LogResponses {
    fn handle(&self, req: &mut Request, res: &mut Response) -> Result<(), Failure> {
        if req.logger().is_none() {
            return Err(Failure::logger_missing("log_responses"));
        }
        res.on_finish(|req, res| {
            if let Some(logger) = req.logger() {
                logger.log(
                    Level::Info,
                    fields! { "req" => req.to_value(), "res" => res.to_value() },
                    "Response finished",
                );
            }
        });
        Ok(())
    }
}

/// What [`LogErrors`] does with a failure after logging it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorPolicy {
    /// Pass it to the next error middleware.
    #[default]
    Forward,
    /// Treat it as handled; the pending response is sent as it stands.
    Swallow,
}

/// Logs `"Error"` with the serialized request and failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogErrors {
    policy: ErrorPolicy,
}

impl LogErrors {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self { policy }
    }
}

impl ErrorMiddleware for LogErrors {
    fn handle(&self, failure: Failure, req: &mut Request, _res: &mut Response) -> Result<(), Failure> {
        // Without a logger there is nothing to log with; let the next
        // handler deal with it.
        let Some(logger) = req.logger() else {
            return Err(failure);
        };
        logger.log(
            Level::Error,
            fields! { "req" => req.to_value(), "err" => failure.to_value() },
            "Error",
        );
        match self.policy {
            ErrorPolicy::Forward => Err(failure),
            ErrorPolicy::Swallow => Ok(()),
        }
    }
}
