//! Minimal reqlog example: a couple of JSON endpoints with request logging.
//!
//! Run with:
//!   REQLOG_NAME=users REQLOG_ENVIRONMENT=dev RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -H 'x-request-id: abc-123' http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users -d '{"name":"alice"}'
//!   curl http://localhost:3000/error

use http::StatusCode;
use reqlog::{
    App, Failure, Logging, LoggerConfig, Request, RequestIdOptions, Response, Router, Server,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let logging = Logging::build(LoggerConfig::from_env().version(env!("CARGO_PKG_VERSION")))?;

    let router = Router::new()
        .get("/users/{id}", get_user)
        .post("/users", create_user)
        .get("/error", always_fails);

    let app = App::new(router)
        .wrap(logging.attach_logger_to_req())
        .wrap(logging.log_responses())
        .wrap(logging.attach_request_id_to_req(RequestIdOptions { warn_if_missing_request_id: true }))
        .wrap(|req: &mut Request, _: &mut Response| -> Result<(), Failure> {
            let route = req.path().split('/').nth(1).unwrap_or_default().to_owned();
            req.set("route", route);
            Ok(())
        })
        .wrap(logging.attach_to_logger("route"))
        .catch(logging.log_errors());

    Server::bind(([0, 0, 0, 0], 3000).into()).serve(app).await?;
    Ok(())
}

// GET /users/{id}
async fn get_user(req: Request) -> Response {
    let id = req.param("id").unwrap_or("unknown");
    if let Some(log) = req.logger() {
        log.with("userId", id).debug("loading user");
    }
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#))
}

// POST /users
async fn create_user(req: Request) -> Result<Response, Failure> {
    if req.body().is_empty() {
        return Err(Failure::new("empty body").with_name("ValidationError").with_status(StatusCode::BAD_REQUEST));
    }
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json(r#"{"id":"99","name":"new_user"}"#))
}

// GET /error
async fn always_fails(_req: Request) -> Result<Response, Failure> {
    Err(Failure::new("Error!"))
}
