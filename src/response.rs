//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Handlers build a [`Response`] and return it. Middleware sees the response
//! earlier, while it is still pending: it can set headers that survive into
//! the handler's response, and it can register completion hooks.
//!
//! # Completion hooks
//!
//! [`Response::on_finish`] registers a `FnOnce(&Request, &Response)` that the
//! host runs once the response is complete, with the request as it looks at
//! that point. Hooks are taken out of the response when they fire, so a
//! second completion signal finds nothing to run.

use std::fmt;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use serde_json::{Map, Value};

use crate::failure::Failure;
use crate::request::Request;

/// Runs once when the response completes.
pub type FinishHook = Box<dyn FnOnce(&Request, &Response) + Send + 'static>;

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use reqlog::Response;
/// use http::StatusCode;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(br#"{"id":42}"#.to_vec());
/// ```
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    hooks: Vec<FinishHook>,
}

impl Response {
    /// `200 OK`, `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::builder().status(code).no_body()
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Registers a hook to run once the response completes.
    pub fn on_finish<F>(&mut self, hook: F)
    where
        F: FnOnce(&Request, &Response) + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    /// Runs every registered hook once, in registration order.
    ///
    /// Calling this again is a no-op unless new hooks were registered.
    pub fn finish(&mut self, req: &Request) {
        let hooks = std::mem::take(&mut self.hooks);
        for hook in hooks {
            hook(req, self);
        }
    }

    /// Folds the handler's response into the pending one: the handler's
    /// status and body win, its headers replace same-named pending headers,
    /// and its hooks run after the pending ones.
    pub(crate) fn merge(&mut self, other: Response) {
        self.status = other.status;
        self.body = other.body;
        self.headers.extend(other.headers);
        self.hooks.extend(other.hooks);
    }

    /// The host's bare response for a failure no error handler took over:
    /// the failure's status and its canonical reason as the body.
    pub(crate) fn fail(&mut self, failure: &Failure) {
        let status = failure.status();
        self.status = status;
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        self.body = Bytes::from_static(status.canonical_reason().unwrap_or("Error").as_bytes());
    }

    /// Raw representation handed to the `res` serializer.
    pub fn to_value(&self) -> Value {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.as_str().to_owned(), Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned())))
            .collect();
        serde_json::json!({
            "statusCode": self.status.as_u16(),
            "headers": headers,
        })
    }

    /// Converts into the `http` response hyper writes. Pending hooks are
    /// dropped without running.
    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

impl Default for Response {
    /// An empty `200 OK`, the state middleware sees before the handler runs.
    fn default() -> Self {
        Self::status(StatusCode::OK)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Appends a header. Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::warn!(header = name, "skipping invalid response header"),
        }
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish("application/json", body.into())
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish("text/plain; charset=utf-8", Bytes::from(body.into()))
    }

    /// Terminate with no body.
    pub fn no_body(self) -> Response {
        Response { status: self.status, headers: self.headers, body: Bytes::new(), hooks: Vec::new() }
    }

    fn finish(mut self, content_type: &'static str, body: Bytes) -> Response {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Response { status: self.status, headers: self.headers, body, hooks: Vec::new() }
    }
}

// ── IntoResponse / IntoOutcome ────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

/// What a handler produced: a response, or a failure for the error chain.
pub type Outcome = Result<Response, Failure>;

/// Conversion of a handler's return value into an [`Outcome`].
///
/// Implemented for every [`IntoResponse`] type in this crate and for
/// `Result<T, E>` where `T: IntoResponse` and `E: Into<Failure>`, so handlers
/// can use `?`.
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoResponse,
    E: Into<Failure>,
{
    fn into_outcome(self) -> Outcome {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}

macro_rules! infallible_outcome {
    ($($ty:ty),+) => {
        $(
            impl IntoOutcome for $ty {
                fn into_outcome(self) -> Outcome { Ok(self.into_response()) }
            }
        )+
    };
}

infallible_outcome!(Response, &'static str, String, StatusCode);
