//! HTTP routes of the gateway.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::content::{ContentInfo, serve_content};
use super::session::{BackendState, Session};
use crate::error::RelayError;

/// State shared by all HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub session: Arc<Session>,
    pub content: Arc<ContentInfo>,
    /// Bytes fetched from the holder per body chunk.
    pub chunk_size: usize,
}

/// Build the gateway router: `/health`, and the content on every other path.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .fallback(download)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_check(State(state): State<GatewayState>) -> impl IntoResponse {
    let backend = state.session.refresh();
    let status = if backend == BackendState::Connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        format!(
            "holder: {}, bytes relayed: {}",
            backend,
            state.session.bytes_received()
        ),
    )
}

/// Serve the holder's file with range support.
async fn download(
    State(state): State<GatewayState>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(AppError::MethodNotAllowed);
    }

    let file = Arc::new(state.session.open()?);
    let mut response =
        serve_content(file, &state.content, &method, &headers, state.chunk_size).await?;

    if let Ok(value) = HeaderValue::from_str(&content_disposition(&state.content.name)) {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// `attachment; filename="<name>"` with quotes, backslashes and control
/// characters neutralised.
fn content_disposition(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '"' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            c if c.is_control() => escaped.push('_'),
            c => escaped.push(c),
        }
    }
    format!("attachment; filename=\"{escaped}\"")
}

/// Application error types
#[derive(Debug)]
enum AppError {
    NoBackend,
    MethodNotAllowed,
    GatewayTimeout(String),
    BadGateway(String),
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NoBackendAvailable => AppError::NoBackend,
            RelayError::Timeout(_) => AppError::GatewayTimeout(err.to_string()),
            other => AppError::BadGateway(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NoBackend => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no holder connected".to_string(),
            ),
            AppError::MethodNotAllowed => {
                let mut response =
                    (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
                return response;
            }
            AppError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        warn!(status = status.as_u16(), "request failed: {message}");
        (status, message).into_response()
    }
}
