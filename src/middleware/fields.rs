use serde_json::Value;

use crate::failure::Failure;
use crate::request::Request;
use crate::response::Response;

use super::Middleware;

/// Scopes the request logger with one request-derived field.
///
/// The value is read when the middleware runs, so anything earlier middleware
/// attached with [`Request::set`] is visible. A missing value is scoped as
/// `null`. Chain several to accumulate scope; scoping the same field again
/// replaces its value downstream.
#[derive(Clone, Debug)]
pub struct AttachField {
    field: String,
}

impl AttachField {
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }
}

impl Middleware for AttachField {
    fn handle(&self, req: &mut Request, _res: &mut Response) -> Result<(), Failure> {
        let logger = req.logger().ok_or_else(|| Failure::logger_missing("attach_to_logger"))?;
        let value = req.field(&self.field).unwrap_or(Value::Null);
        let scoped = logger.with(self.field.as_str(), value);
        req.set_logger(scoped);
        Ok(())
    }
}
