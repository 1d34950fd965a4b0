//! HTTP routing.
//!
//! * `GET /metrics` runs a scrape and returns the exposition.
//! * `GET /` redirects to `/metrics`.
//! * `GET /version` returns the exporter name and version as JSON.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::{debug, error};

use crate::encoding::text;
use crate::exporter::{Exporter, Exposition};

/// Header carrying the connection error of a degraded scrape.
pub const ERROR_HEADER: &str = "x-error";

/// Build the router serving `exporter`.
pub fn router(exporter: Arc<Exporter>) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::to("/metrics") }))
        .route("/metrics", get(metrics_handler))
        .route("/version", get(version_handler))
        .with_state(exporter)
}

/// Serialization of the registry failed.
#[derive(Debug)]
pub struct EncodingError;

impl IntoResponse for EncodingError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
    }
}

async fn metrics_handler(State(exporter): State<Arc<Exporter>>) -> Result<Response, EncodingError> {
    debug!("received /metrics request");
    let exposition = exporter.scrape().await.map_err(|_| {
        error!("failed to encode metrics");
        EncodingError
    })?;

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, text::CONTENT_TYPE);
    if let Exposition::Degraded { error, .. } = &exposition {
        response = response.header(ERROR_HEADER, header_value(error));
    }

    let body = match exposition {
        Exposition::Complete(body) | Exposition::Degraded { body, .. } => body,
    };
    response.body(Body::from(body)).map_err(|_| EncodingError)
}

/// Driver messages may contain line breaks or non-ASCII text, neither of
/// which is allowed in a header value.
fn header_value(message: &str) -> HeaderValue {
    let sanitized: String = message
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { ' ' })
        .collect();
    HeaderValue::from_str(sanitized.trim()).unwrap_or_else(|_| HeaderValue::from_static("error"))
}

#[derive(Debug, Serialize)]
struct Version {
    name: &'static str,
    version: &'static str,
}

async fn version_handler() -> Json<Version> {
    Json(Version {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}
