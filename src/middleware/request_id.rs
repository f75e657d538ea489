//! Correlation ids.
//!
//! Reuses the caller's `X-Request-ID` when it is present, non-empty and valid
//! UTF-8, and generates a UUID v4 otherwise. The id is stored on the request,
//! scoped into the request logger as `requestId`, and echoed back in the
//! response's `X-Request-ID` header.

use http::HeaderValue;
use http::header::HeaderName;
use uuid::Uuid;

use crate::failure::Failure;
use crate::request::Request;
use crate::response::Response;

use super::Middleware;

/// Header name for the request correlation id.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone, Copy, Debug, Default)]
pub struct RequestIdOptions {
    /// Log a warning when the caller sent no id.
    pub warn_if_missing_request_id: bool,
}

/// Resolves the correlation id and scopes the request logger with it.
#[derive(Clone, Copy, Debug, Default)]
pub struct AttachRequestId {
    options: RequestIdOptions,
}

impl AttachRequestId {
    pub fn new(options: RequestIdOptions) -> Self {
        Self { options }
    }
}

impl Middleware for AttachRequestId {
    fn handle(&self, req: &mut Request, res: &mut Response) -> Result<(), Failure> {
        let logger = req.logger().ok_or_else(|| Failure::logger_missing("attach_request_id_to_req"))?;

        let inbound = req
            .headers()
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_owned);
        let missing = inbound.is_none();
        let request_id = inbound.unwrap_or_else(|| Uuid::new_v4().to_string());

        let scoped = logger.with("requestId", request_id.as_str());
        if missing && self.options.warn_if_missing_request_id {
            scoped.warn("X-Request-ID header not present");
        }
        req.set_logger(scoped);

        match HeaderValue::from_str(&request_id) {
            Ok(value) => {
                res.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            Err(e) => tracing::warn!("cannot echo request id header: {e}"),
        }
        req.set_request_id(request_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use serde_json::{Value, json};

    use super::*;
    use crate::logger::{Level, Logger, RingBuffer, Serializers, Stream};

    fn setup(header: Option<&str>) -> (RingBuffer, Request) {
        let ring = RingBuffer::new(10);
        let logger = Logger::new(
            "svc_test",
            Serializers::defaults(false, json!([])),
            vec![Arc::new(ring.clone()) as Arc<dyn Stream>],
        );
        let mut builder = http::Request::get("/");
        if let Some(value) = header {
            builder = builder.header("x-request-id", value);
        }
        let mut req: Request = builder.body(Bytes::new()).unwrap().into();
        req.set_logger(logger);
        (ring, req)
    }

    #[test]
    fn inbound_ids_are_reused_verbatim() {
        let (_, mut req) = setup(Some("abc-123"));
        let mut res = Response::default();
        AttachRequestId::default().handle(&mut req, &mut res).unwrap();

        assert_eq!(req.request_id(), Some("abc-123"));
        assert_eq!(req.logger().unwrap().field("requestId"), Some(&json!("abc-123")));
        assert_eq!(res.headers()[&REQUEST_ID_HEADER], "abc-123");
    }

    #[test]
    fn empty_headers_get_a_generated_id() {
        let (_, mut req) = setup(Some(""));
        let mut res = Response::default();
        AttachRequestId::default().handle(&mut req, &mut res).unwrap();

        let id = req.request_id().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
        assert_eq!(res.headers()[&REQUEST_ID_HEADER], id);
    }

    #[test]
    fn missing_ids_warn_through_the_scoped_logger_when_asked() {
        let (ring, mut req) = setup(None);
        let mut res = Response::default();
        AttachRequestId::new(RequestIdOptions { warn_if_missing_request_id: true })
            .handle(&mut req, &mut res)
            .unwrap();

        let records = ring.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::Warn);
        assert_eq!(records[0].msg, "X-Request-ID header not present");
        assert_eq!(records[0].field("requestId"), Some(&Value::from(req.request_id().unwrap())));
    }

    #[test]
    fn present_ids_do_not_warn() {
        let (ring, mut req) = setup(Some("abc"));
        AttachRequestId::new(RequestIdOptions { warn_if_missing_request_id: true })
            .handle(&mut req, &mut Response::default())
            .unwrap();
        assert!(ring.is_empty());
    }

    #[test]
    fn requires_a_logger() {
        let mut req: Request = http::Request::get("/").body(Bytes::new()).unwrap().into();
        let failure = AttachRequestId::default()
            .handle(&mut req, &mut Response::default())
            .unwrap_err();
        assert_eq!(failure.name(), "LoggerMissing");
    }
}
