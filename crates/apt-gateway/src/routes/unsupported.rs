//! Handlers documented in the HTTP surface but out of the core pool's
//! scope (analysis, generation, coverage, language ID, wiki feedback,
//! and friends). Each responds with a clear "not implemented" body
//! rather than a bare 404, since the route itself is a real part of the
//! documented surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub async fn handle() -> Response {
    let body = json!({
        "status": "error",
        "code": StatusCode::NOT_IMPLEMENTED.as_u16(),
        "message": "not implemented",
        "explanation": "this endpoint is outside the translation-pipeline pool's core scope",
    });
    (StatusCode::NOT_IMPLEMENTED, axum::Json(body)).into_response()
}

pub async fn not_found() -> Response {
    apt_core::GatewayError::RouteNotFound.into_response()
}
