//! Incoming HTTP request type.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version};
use serde_json::{Map, Value};

use crate::logger::Logger;

/// An incoming HTTP request.
///
/// Besides the HTTP parts it carries the per-request logging state that the
/// middleware chain builds up: the request logger, the correlation id, and
/// any attributes application middleware attached with [`Request::set`].
///
/// Cloning is cheap: the body is reference-counted and the logger is an
/// `Arc` handle.
#[derive(Clone)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) remote_addr: Option<SocketAddr>,
    logger: Option<Logger>,
    request_id: Option<String>,
    attrs: BTreeMap<String, Value>,
}

impl Request {
    pub fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            params: HashMap::new(),
            remote_addr: None,
            logger: None,
            request_id: None,
            attrs: BTreeMap::new(),
        }
    }

    /// Attaches the peer address. The server does this for every request it
    /// accepts; requests without one are not treated as live connections by
    /// the `req` serializer.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Path and query exactly as the client sent them.
    pub fn original_url(&self) -> &str {
        self.uri.path_and_query().map_or_else(|| self.uri.path(), |pq| pq.as_str())
    }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    // ── Logging state ─────────────────────────────────────────────────────────

    /// The logger currently scoped to this request, if one was attached.
    pub fn logger(&self) -> Option<&Logger> { self.logger.as_ref() }

    /// Replaces the request logger. Middleware narrows the scope by setting
    /// a child of the current logger.
    pub fn set_logger(&mut self, logger: Logger) {
        self.logger = Some(logger);
    }

    /// Correlation id resolved by the request-id middleware.
    pub fn request_id(&self) -> Option<&str> { self.request_id.as_deref() }

    pub fn set_request_id(&mut self, id: impl Into<String>) {
        self.request_id = Some(id.into());
    }

    /// An application attribute set with [`Request::set`].
    pub fn attr(&self, key: &str) -> Option<&Value> { self.attrs.get(key) }

    /// Attaches an application attribute, e.g. the authenticated user.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attrs.insert(key.into(), value.into());
    }

    /// Looks up a named request property: application attributes first,
    /// then the built-ins `requestId`, `method`, `url` and `path`.
    pub fn field(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.attrs.get(name) {
            return Some(v.clone());
        }
        match name {
            "requestId" => self.request_id.clone().map(Value::String),
            "method" => Some(Value::String(self.method.to_string())),
            "url" => Some(Value::String(self.original_url().to_owned())),
            "path" => Some(Value::String(self.path().to_owned())),
            _ => None,
        }
    }

    /// Raw representation handed to the `req` serializer.
    ///
    /// `connection` is present only when the peer address is known.
    pub fn to_value(&self) -> Value {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.as_str().to_owned(), Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned())))
            .collect();
        let params: Map<String, Value> = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let mut obj = Map::new();
        obj.insert("method".to_owned(), Value::String(self.method.to_string()));
        obj.insert("url".to_owned(), Value::String(self.original_url().to_owned()));
        obj.insert("originalUrl".to_owned(), Value::String(self.original_url().to_owned()));
        obj.insert("httpVersion".to_owned(), Value::String(format!("{:?}", self.version)));
        obj.insert("headers".to_owned(), Value::Object(headers));
        obj.insert("params".to_owned(), Value::Object(params));
        if let Some(id) = &self.request_id {
            obj.insert("requestId".to_owned(), Value::String(id.clone()));
        }
        if let Some(addr) = self.remote_addr {
            obj.insert(
                "connection".to_owned(),
                serde_json::json!({ "remoteAddress": addr.ip().to_string(), "remotePort": addr.port() }),
            );
        }
        Value::Object(obj)
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request {
        http::Request::get(uri)
            .header("user-agent", "test/1.0")
            .body(Bytes::new())
            .unwrap()
            .into()
    }

    #[test]
    fn original_url_keeps_the_query() {
        assert_eq!(request("/a/b?c=1").original_url(), "/a/b?c=1");
        assert_eq!(request("/a/b").original_url(), "/a/b");
    }

    #[test]
    fn fields_prefer_application_attributes() {
        let mut req = request("/x");
        assert_eq!(req.field("method"), Some(Value::from("GET")));
        assert_eq!(req.field("user"), None);

        req.set("user", "alice");
        req.set("method", "overridden");
        req.set_request_id("r-1");
        assert_eq!(req.field("user"), Some(Value::from("alice")));
        assert_eq!(req.field("method"), Some(Value::from("overridden")));
        assert_eq!(req.field("requestId"), Some(Value::from("r-1")));
    }

    #[test]
    fn connection_appears_only_with_a_peer_address() {
        let req = request("/x");
        assert!(req.to_value().get("connection").is_none());

        let req = req.with_remote_addr("10.0.0.1:4000".parse().unwrap());
        let value = req.to_value();
        assert_eq!(value["connection"]["remoteAddress"], "10.0.0.1");
        assert_eq!(value["headers"]["user-agent"], "test/1.0");
    }
}
