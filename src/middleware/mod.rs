//! Middleware layer.
//!
//! Middleware runs before the routed handler, in registration order, against
//! the request and the pending response. It is synchronous: it decorates,
//! scopes and registers hooks, and leaves async work to handlers.
//!
//! Error middleware runs after a middleware or handler failed, also in
//! registration order. Each one either forwards the failure to the next
//! (`Err(failure)`) or takes it over (`Ok(())`).
//!
//! Plain closures work for both:
//!
//! ```rust
//! use reqlog::{App, Failure, Request, Response, Router};
//!
//! let app = App::new(Router::new())
//!     .wrap(|req: &mut Request, _res: &mut Response| -> Result<(), Failure> {
//!         req.set("tenant", "acme");
//!         Ok(())
//!     })
//!     .catch(|failure: Failure, _req: &mut Request, _res: &mut Response| -> Result<(), Failure> {
//!         Err(failure)
//!     });
//! ```
//!
//! # Logging middleware
//!
//! The built-ins below come from [`Logging`](crate::Logging) and depend on
//! each other in one fixed order:
//!
//! | Order | Middleware | Needs |
//! |---|---|---|
//! | 1 | [`AttachLogger`] | nothing |
//! | 2 | [`LogResponses`] | a request logger |
//! | 3 | [`AttachRequestId`] | a request logger |
//! | 4… | [`AttachField`] (any number) | a request logger |
//! | error chain | [`LogErrors`] | a request logger (skipped without one) |
//!
//! Every middleware that needs a request logger fails with a `LoggerMissing`
//! failure when none is attached.

mod context;
mod fields;
mod lifecycle;
mod request_id;

use std::sync::Arc;

use crate::failure::Failure;
use crate::request::Request;
use crate::response::Response;

pub use context::AttachLogger;
pub use fields::AttachField;
pub use lifecycle::{ErrorPolicy, LogErrors, LogResponses};
pub use request_id::{AttachRequestId, REQUEST_ID_HEADER, RequestIdOptions};

/// Request-phase middleware.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: &mut Request, res: &mut Response) -> Result<(), Failure>;
}

impl<F> Middleware for F
where
    F: Fn(&mut Request, &mut Response) -> Result<(), Failure> + Send + Sync + 'static,
{
    fn handle(&self, req: &mut Request, res: &mut Response) -> Result<(), Failure> {
        self(req, res)
    }
}

/// Error-phase middleware.
pub trait ErrorMiddleware: Send + Sync + 'static {
    /// Return `Err(failure)` to pass it on, `Ok(())` once it is handled.
    fn handle(&self, failure: Failure, req: &mut Request, res: &mut Response) -> Result<(), Failure>;
}

impl<F> ErrorMiddleware for F
where
    F: Fn(Failure, &mut Request, &mut Response) -> Result<(), Failure> + Send + Sync + 'static,
{
    fn handle(&self, failure: Failure, req: &mut Request, res: &mut Response) -> Result<(), Failure> {
        self(failure, req, res)
    }
}

pub(crate) type BoxedMiddleware = Arc<dyn Middleware>;
pub(crate) type BoxedErrorMiddleware = Arc<dyn ErrorMiddleware>;
