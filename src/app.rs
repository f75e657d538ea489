//! The request pipeline: middleware, routing, error middleware, completion.
//!
//! ```text
//! Request ──▶ middleware 1 … n ──▶ router ──▶ handler
//!                  │ Err                        │ Err
//!                  └──────────────┬─────────────┘
//!                                 ▼
//!                      error middleware 1 … m ──▶ default error response
//!                                 │
//!                                 ▼
//!                   completion hooks (exactly once) ──▶ Response
//! ```
//!
//! The handler receives a clone of the request; the original stays with the
//! pipeline so error middleware and completion hooks see the request as the
//! middleware chain left it.
//!
//! A panic in a handler or middleware is caught and enters the error chain
//! as a [`Failure`] of kind `panic`; the fatal drain leaves it alone.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures_util::FutureExt;
use http::StatusCode;

use crate::drain::{Contained, contained};
use crate::failure::{Failure, FailureKind};
use crate::middleware::{BoxedErrorMiddleware, BoxedMiddleware, ErrorMiddleware, Middleware};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

/// A router plus the middleware wrapped around it. Hand it to
/// [`Server::serve`](crate::Server::serve).
pub struct App {
    router: Router,
    middleware: Vec<BoxedMiddleware>,
    error_middleware: Vec<BoxedErrorMiddleware>,
}

impl App {
    pub fn new(router: Router) -> Self {
        Self { router, middleware: Vec::new(), error_middleware: Vec::new() }
    }

    /// Appends request-phase middleware. Runs in registration order.
    pub fn wrap(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Appends error-phase middleware. Runs in registration order.
    pub fn catch(mut self, middleware: impl ErrorMiddleware) -> Self {
        self.error_middleware.push(Arc::new(middleware));
        self
    }

    /// Runs one request through the pipeline and returns the finished
    /// response.
    ///
    /// Completion hooks have already fired when this returns. If the future
    /// is dropped first (the client went away), they never fire.
    ///
    /// The handler works on a clone: attributes it sets and loggers it scopes
    /// on its own `Request` are not visible to error middleware or completion
    /// hooks. Scope in middleware for anything the `"Response finished"`
    /// record should carry.
    pub async fn handle(&self, mut req: Request) -> Response {
        let mut res = Response::default();
        let mut failure = self.run_middleware(&mut req, &mut res);

        if failure.is_none() {
            match self.router.lookup(req.method(), req.path()) {
                Some((handler, params)) => {
                    req.params = params;
                    let call = AssertUnwindSafe(Contained(handler.call(req.clone())));
                    match call.catch_unwind().await {
                        Ok(Ok(out)) => res.merge(out),
                        Ok(Err(f)) => failure = Some(f.attribute(FailureKind::Handler)),
                        Err(payload) => failure = Some(Failure::from_panic_payload(payload.as_ref())),
                    }
                }
                None => res.set_status(StatusCode::NOT_FOUND),
            }
        }

        if let Some(f) = failure {
            if let Some(unhandled) = self.run_error_middleware(f, &mut req, &mut res) {
                res.fail(&unhandled);
            }
        }

        res.finish(&req);
        res
    }

    fn run_middleware(&self, req: &mut Request, res: &mut Response) -> Option<Failure> {
        self.middleware
            .iter()
            .find_map(|m| {
                match contained(|| catch_unwind(AssertUnwindSafe(|| m.handle(req, res)))) {
                    Ok(result) => result.err(),
                    Err(payload) => Some(Failure::from_panic_payload(payload.as_ref())),
                }
            })
            .map(|f| f.attribute(FailureKind::Middleware))
    }

    /// Returns the failure if it is still forwarded after the last handler.
    fn run_error_middleware(&self, failure: Failure, req: &mut Request, res: &mut Response) -> Option<Failure> {
        let mut pending = failure;
        for m in &self.error_middleware {
            match m.handle(pending, req, res) {
                Ok(()) => return None,
                Err(f) => pending = f,
            }
        }
        Some(pending)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use super::*;

    fn get(uri: &str) -> Request {
        http::Request::get(uri).body(Bytes::new()).unwrap().into()
    }

    async fn ok(_req: Request) -> &'static str { "ok" }

    async fn broken(_req: Request) -> Result<&'static str, Failure> {
        Err(Failure::new("broken").with_status(StatusCode::SERVICE_UNAVAILABLE))
    }

    #[tokio::test]
    async fn middleware_runs_in_order_before_the_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&seen), Arc::clone(&seen));
        let app = App::new(Router::new().get("/", ok))
            .wrap(move |_: &mut Request, _: &mut Response| -> Result<(), Failure> {
                a.lock().unwrap().push("first");
                Ok(())
            })
            .wrap(move |_: &mut Request, _: &mut Response| -> Result<(), Failure> {
                b.lock().unwrap().push("second");
                Ok(())
            });

        let res = app.handle(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body(), b"ok");
        assert_eq!(*seen.lock().unwrap(), ["first", "second"]);
    }

    #[tokio::test]
    async fn middleware_failures_skip_the_handler() {
        let app = App::new(Router::new().get("/", ok))
            .wrap(|_: &mut Request, _: &mut Response| -> Result<(), Failure> {
                Err(Failure::new("denied").with_status(StatusCode::FORBIDDEN))
            });

        let res = app.handle(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn error_middleware_sees_attributed_failures_in_order() {
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&kinds), Arc::clone(&kinds));
        let app = App::new(Router::new().get("/", broken))
            .catch(move |f: Failure, _: &mut Request, _: &mut Response| -> Result<(), Failure> {
                a.lock().unwrap().push(f.kind());
                Err(f)
            })
            .catch(move |f: Failure, _: &mut Request, _: &mut Response| -> Result<(), Failure> {
                b.lock().unwrap().push(f.kind());
                Err(f)
            });

        let res = app.handle(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(*kinds.lock().unwrap(), [FailureKind::Handler, FailureKind::Handler]);
    }

    #[tokio::test]
    async fn handled_failures_keep_the_error_middleware_response() {
        let app = App::new(Router::new().get("/", broken))
            .catch(|_: Failure, _: &mut Request, res: &mut Response| -> Result<(), Failure> {
                res.set_status(StatusCode::IM_A_TEAPOT);
                Ok(())
            });

        let res = app.handle(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn unknown_routes_are_404() {
        let app = App::new(Router::new().get("/", ok));
        assert_eq!(app.handle(get("/missing")).await.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn handlers_see_route_params() {
        async fn echo(req: Request) -> String {
            req.param("id").unwrap_or("none").to_owned()
        }
        let app = App::new(Router::new().get("/users/{id}", echo));
        assert_eq!(app.handle(get("/users/42")).await.body(), b"42");
    }

    #[tokio::test]
    async fn handler_panics_enter_the_error_chain() {
        async fn explode(_req: Request) -> &'static str {
            panic!("handler exploded")
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let slot = Arc::clone(&seen);
        let app = App::new(Router::new().get("/", explode))
            .catch(move |f: Failure, _: &mut Request, _: &mut Response| -> Result<(), Failure> {
                slot.lock().unwrap().push((f.kind(), f.message().to_owned()));
                Err(f)
            });

        let res = app.handle(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(*seen.lock().unwrap(), [(FailureKind::Panic, "handler exploded".to_owned())]);
    }

    #[tokio::test]
    async fn middleware_panics_skip_the_handler() {
        let app = App::new(Router::new().get("/", ok))
            .wrap(|_: &mut Request, _: &mut Response| -> Result<(), Failure> {
                panic!("middleware exploded")
            });

        let res = app.handle(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn handler_changes_stay_on_the_handler_clone() {
        async fn tag(mut req: Request) -> &'static str {
            req.set("stage", "handler");
            "ok"
        }
        let seen = Arc::new(Mutex::new(Some(serde_json::Value::Null)));
        let slot = Arc::clone(&seen);
        let app = App::new(Router::new().get("/", tag))
            .wrap(move |req: &mut Request, res: &mut Response| -> Result<(), Failure> {
                req.set("stage", "middleware");
                let slot = Arc::clone(&slot);
                res.on_finish(move |req, _| *slot.lock().unwrap() = req.attr("stage").cloned());
                Ok(())
            });

        app.handle(get("/")).await;
        assert_eq!(*seen.lock().unwrap(), Some(serde_json::json!("middleware")));
    }
}
