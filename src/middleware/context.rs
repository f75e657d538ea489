use crate::failure::Failure;
use crate::logger::Logger;
use crate::request::Request;
use crate::response::Response;

use super::Middleware;

/// Attaches the process logger to every request.
///
/// Must be the first middleware: everything after it may log or narrow the
/// logger's scope.
#[derive(Clone, Debug)]
pub struct AttachLogger {
    logger: Logger,
}

impl AttachLogger {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl Middleware for AttachLogger {
    fn handle(&self, req: &mut Request, _res: &mut Response) -> Result<(), Failure> {
        req.set_logger(self.logger.clone());
        Ok(())
    }
}
