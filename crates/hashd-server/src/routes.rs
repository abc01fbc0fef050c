//! Request routing and handlers.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/hash` | submit the `password` form field |
//! | `GET` | `/hash/{id}` | fetch a committed digest |
//! | `GET` | `/stats` | processing statistics as JSON |
//! | `GET`, `POST` | `/shutdown` | request graceful shutdown |
//! | `GET` | `/health` | liveness plus current shutdown phase |
//!
//! Engine errors are answered with a `text/plain` body holding the error
//! message. Unknown paths and wrong methods get the JSON error envelope.

use bytes::Bytes;
use http::{header, HeaderValue, Method, Response, StatusCode};
use http_body_util::Full;
use serde::Deserialize;

use hashd_core::{HashEngine, HashError, ShutdownCoordinator};

/// Type alias for HTTP response body.
pub type ResponseBody = Full<Bytes>;

/// Type alias for the HTTP response.
pub type HttpResponse = Response<ResponseBody>;

/// Body returned by `/shutdown`.
pub const SHUTDOWN_ACK: &str = "Shutdown requested.";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// A resolved route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// `POST /hash`
    Submit,
    /// `GET /hash/{id}` with the raw id segment.
    Fetch(&'a str),
    /// `GET /stats`
    Stats,
    /// `GET|POST /shutdown`
    Shutdown,
    /// `GET /health`
    Health,
}

impl Route<'_> {
    /// Whether the handler reads the request body.
    pub fn needs_body(&self) -> bool {
        matches!(self, Self::Submit)
    }
}

/// Why a request did not resolve to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    /// No such path.
    NotFound,
    /// Path exists; the value is the `Allow` header.
    MethodNotAllowed(&'static str),
}

/// Resolves a method and path to a [`Route`].
pub fn resolve<'a>(method: &Method, path: &'a str) -> Result<Route<'a>, RouteError> {
    let route = match path {
        "/hash" => (Route::Submit, "POST"),
        "/stats" => (Route::Stats, "GET"),
        "/shutdown" => (Route::Shutdown, "GET, POST"),
        "/health" => (Route::Health, "GET"),
        _ => match path.strip_prefix("/hash/") {
            Some(raw) if !raw.contains('/') => (Route::Fetch(raw), "GET"),
            _ => return Err(RouteError::NotFound),
        },
    };

    let allowed = match route.0 {
        Route::Submit => method == Method::POST,
        Route::Shutdown => method == Method::GET || method == Method::POST,
        Route::Fetch(_) | Route::Stats | Route::Health => method == Method::GET,
    };

    if allowed {
        Ok(route.0)
    } else {
        Err(RouteError::MethodNotAllowed(route.1))
    }
}

/// Form body of `POST /hash`.
#[derive(Debug, Default, Deserialize)]
struct HashForm {
    #[serde(default)]
    password: String,
}

/// Dispatches a resolved route.
pub fn dispatch(
    engine: &HashEngine,
    coordinator: &ShutdownCoordinator,
    route: Route<'_>,
    body: &[u8],
) -> HttpResponse {
    match route {
        Route::Submit => submit(engine, body),
        Route::Fetch(raw) => fetch(engine, raw),
        Route::Stats => stats(engine),
        Route::Shutdown => shutdown(coordinator),
        Route::Health => health(coordinator),
    }
}

fn submit(engine: &HashEngine, body: &[u8]) -> HttpResponse {
    // An unparseable body is treated as an empty value so the engine still
    // times and counts the rejection.
    let form: HashForm = serde_urlencoded::from_bytes(body).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "unparseable hash form");
        HashForm::default()
    });

    match engine.submit(&form.password) {
        Ok(id) => text(StatusCode::OK, id.to_string()),
        Err(e) => engine_error(&e),
    }
}

fn fetch(engine: &HashEngine, raw: &str) -> HttpResponse {
    match engine.fetch_str(raw) {
        Ok(digest) => text(StatusCode::OK, digest),
        Err(e) => engine_error(&e),
    }
}

fn stats(engine: &HashEngine) -> HttpResponse {
    match serde_json::to_string(&engine.stats()) {
        Ok(body) => json(StatusCode::OK, body),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize stats");
            error_envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                "failed to serialize stats",
            )
        }
    }
}

fn shutdown(coordinator: &ShutdownCoordinator) -> HttpResponse {
    if !coordinator.request_shutdown() {
        tracing::debug!("shutdown already requested");
    }
    text(StatusCode::OK, SHUTDOWN_ACK)
}

fn health(coordinator: &ShutdownCoordinator) -> HttpResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "phase": coordinator.phase().as_str(),
    });
    json(StatusCode::OK, body.to_string())
}

/// Renders an engine error as a plain-text response.
///
/// `NotReady` carries `Retry-After: 1`.
pub fn engine_error(error: &HashError) -> HttpResponse {
    if error.is_invariant_violation() {
        tracing::error!(error = %error, "invariant violation surfaced to caller");
    }

    let mut response = text(error.status_code(), error.to_string());
    if error.is_retryable() {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    }
    response
}

/// Renders a routing failure.
pub fn route_error(error: RouteError, method: &Method, path: &str) -> HttpResponse {
    match error {
        RouteError::NotFound => error_envelope(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            &format!("no route for {path}"),
        ),
        RouteError::MethodNotAllowed(allow) => {
            let mut response = error_envelope(
                StatusCode::METHOD_NOT_ALLOWED,
                "METHOD_NOT_ALLOWED",
                &format!("{method} is not allowed on {path}"),
            );
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static(allow));
            response
        }
    }
}

/// Creates a JSON error envelope response.
pub fn error_envelope(status: StatusCode, code: &str, message: &str) -> HttpResponse {
    let body = serde_json::json!({
        "error": {
            "code": code,
            "message": message
        }
    });
    json(status, body.to_string())
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    respond(status, TEXT_PLAIN, body.into())
}

fn json(status: StatusCode, body: String) -> HttpResponse {
    respond(status, APPLICATION_JSON, Bytes::from(body))
}

fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Full::new(body))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
