//! Serializers: reduce raw runtime objects to compact, loggable values.
//!
//! Request, response and failure values are first turned into their raw JSON
//! form (`Request::to_value`, `Response::to_value`, `Failure::to_value`) and
//! then run through the serializer registered under the field's key. A field
//! named `req` goes through the `req` serializer, `err` through `err`, and so
//! on. Keys without a serializer are logged as-is.
//!
//! Every default serializer is total: input it does not recognise is passed
//! through unchanged rather than rejected.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

/// A serializer function.
pub type SerializerFn = dyn Fn(&Value) -> Value + Send + Sync + 'static;

/// Serializers keyed by record field name.
#[derive(Clone, Default)]
pub struct Serializers {
    map: BTreeMap<String, Arc<SerializerFn>>,
}

impl Serializers {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default `err`, `req`, `res` and `streams` serializers.
    ///
    /// `streams` is the descriptor list reported by the `streams` serializer.
    pub fn defaults(stack_trace: bool, streams: Value) -> Self {
        Self::new()
            .with("err", move |v: &Value| err(v, stack_trace))
            .with("req", req)
            .with("res", res)
            .with("streams", move |_: &Value| streams.clone())
    }

    /// Registers `f` for `kind`, replacing any serializer already there.
    pub fn with<F>(mut self, kind: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.map.insert(kind.into(), Arc::new(f));
        self
    }

    /// Layers `overrides` on top of `self`. Per kind the override wins
    /// outright; sub-fields are never merged.
    pub fn merge(mut self, overrides: Serializers) -> Self {
        self.map.extend(overrides.map);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.map.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    /// Serializes `value` for field `key`, or clones it if no serializer is
    /// registered under that key.
    pub fn apply(&self, key: &str, value: &Value) -> Value {
        match self.map.get(key) {
            Some(f) => f(value),
            None => value.clone(),
        }
    }
}

impl fmt::Debug for Serializers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.map.keys()).finish()
    }
}

// ── Default serializers ───────────────────────────────────────────────────────

/// Portable failure representation.
///
/// Only objects with a non-empty `name` and `message` are treated as
/// failures; anything else passes through. The nested transport handle at
/// `response.request` is removed before conversion, and `stack` is kept only
/// when `stack_trace` is set.
pub fn err(value: &Value, stack_trace: bool) -> Value {
    let Some(obj) = value.as_object() else {
        return value.clone();
    };
    if !non_empty_str(obj.get("name")) || !non_empty_str(obj.get("message")) {
        return value.clone();
    }

    let mut rest = obj.clone();
    if let Some(Value::Object(response)) = rest.get_mut("response") {
        response.remove("request");
    }

    let mut out = Map::new();
    for key in ["name", "message", "kind"] {
        if let Some(v) = rest.remove(key) {
            out.insert(key.to_owned(), v);
        }
    }
    let stack = rest.remove("stack");
    if stack_trace {
        if let Some(stack) = stack {
            out.insert("stack".to_owned(), stack);
        }
    }
    out.extend(rest);
    Value::Object(out)
}

/// `{method, url, userAgent}` for live requests; anything without a
/// connection context passes through.
pub fn req(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return value.clone();
    };
    if obj.get("connection").is_none_or(Value::is_null) {
        return value.clone();
    }

    let mut out = Map::new();
    if let Some(method) = obj.get("method") {
        out.insert("method".to_owned(), method.clone());
    }
    if let Some(url) = obj.get("originalUrl").or_else(|| obj.get("url")) {
        out.insert("url".to_owned(), url.clone());
    }
    if let Some(agent) = obj.get("headers").and_then(|h| h.get("user-agent")) {
        out.insert("userAgent".to_owned(), agent.clone());
    }
    Value::Object(out)
}

/// `{statusCode}` for responses; anything without a status passes through.
pub fn res(value: &Value) -> Value {
    match value.get("statusCode") {
        Some(code) if code.as_u64().is_some_and(|c| c != 0) => {
            serde_json::json!({ "statusCode": code })
        }
        _ => value.clone(),
    }
}

fn non_empty_str(v: Option<&Value>) -> bool {
    v.and_then(Value::as_str).is_some_and(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn err_passes_through_values_that_are_not_failures() {
        assert_eq!(err(&json!("plain"), false), json!("plain"));
        assert_eq!(err(&json!({"name": "", "message": "x"}), false), json!({"name": "", "message": "x"}));
        assert_eq!(err(&json!({"message": "x"}), false), json!({"message": "x"}));
    }

    #[test]
    fn err_strips_the_nested_transport_handle() {
        let raw = json!({
            "name": "UpstreamError",
            "message": "bad gateway",
            "kind": "handler",
            "response": { "statusCode": 502, "request": { "_ca": "secret" } },
        });
        let out = err(&raw, false);
        assert_eq!(out["name"], "UpstreamError");
        assert_eq!(out["response"]["statusCode"], 502);
        assert!(out["response"].get("request").is_none());
    }

    #[test]
    fn err_keeps_stack_only_when_enabled() {
        let raw = json!({ "name": "Error", "message": "m", "stack": "at main" });
        assert!(err(&raw, false).get("stack").is_none());
        assert_eq!(err(&raw, true)["stack"], "at main");
    }

    #[test]
    fn req_reduces_live_requests() {
        let raw = json!({
            "method": "GET",
            "url": "/a?b=1",
            "originalUrl": "/a?b=1",
            "headers": { "user-agent": "curl/8", "accept": "*/*" },
            "connection": { "remoteAddress": "127.0.0.1" },
        });
        assert_eq!(req(&raw), json!({ "method": "GET", "url": "/a?b=1", "userAgent": "curl/8" }));
    }

    #[test]
    fn req_passes_through_without_connection() {
        let raw = json!({ "method": "GET", "url": "/" });
        assert_eq!(req(&raw), raw);
        assert_eq!(req(&Value::Null), Value::Null);
    }

    #[test]
    fn res_reduces_to_status_code() {
        assert_eq!(res(&json!({ "statusCode": 204, "headers": {} })), json!({ "statusCode": 204 }));
        assert_eq!(res(&json!({ "statusCode": 0 })), json!({ "statusCode": 0 }));
        assert_eq!(res(&json!("done")), json!("done"));
    }

    #[test]
    fn overrides_replace_whole_kinds() {
        let set = Serializers::defaults(false, json!([]))
            .merge(Serializers::new().with("req", |_: &Value| json!("bar")));
        assert_eq!(set.apply("req", &json!({ "connection": {} })), json!("bar"));
        assert_eq!(set.apply("res", &json!({ "statusCode": 200, "x": 1 })), json!({ "statusCode": 200 }));
        assert_eq!(set.apply("other", &json!(1)), json!(1));
    }

    #[test]
    fn streams_reports_the_configured_descriptors() {
        let set = Serializers::defaults(false, json!([{ "type": "raw" }]));
        assert_eq!(set.apply("streams", &Value::Null), json!([{ "type": "raw" }]));
    }
}
