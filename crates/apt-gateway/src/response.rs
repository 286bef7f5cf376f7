//! The JSON response envelope shared by every route, plus the mapping
//! from `GatewayError` to HTTP status and the JSONP wrapping convention.

use apt_core::GatewayError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{json, Value};

/// Success envelope: `{responseData, responseDetails, responseStatus}`.
pub fn envelope(data: impl Serialize, status: StatusCode) -> Value {
    json!({
        "responseData": data,
        "responseDetails": Value::Null,
        "responseStatus": status.as_u16(),
    })
}

/// Error body: `{status:"error", code, message, explanation}`.
pub fn error_body(err: &GatewayError) -> Value {
    json!({
        "status": "error",
        "code": status_for(err).as_u16(),
        "message": short_message(err),
        "explanation": err.explanation(),
    })
}

/// Maps each error kind to the HTTP status the façade reports, per the
/// propagation policy: pipeline errors surface as 500 (408 for deadlines),
/// and never leak into requests routed through other pipes.
pub fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::UnknownPair(_)
        | GatewayError::MissingArgument(_)
        | GatewayError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
        GatewayError::RouteNotFound => StatusCode::NOT_FOUND,
        GatewayError::DeadlineExceeded(_) => StatusCode::REQUEST_TIMEOUT,
        GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        GatewayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        GatewayError::ModeNotFound(_)
        | GatewayError::ParseError { .. }
        | GatewayError::SpawnError { .. }
        | GatewayError::PipeBroken { .. }
        | GatewayError::DecodeError(_)
        | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn short_message(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::UnknownPair(_) => "unknown pair",
        GatewayError::MissingArgument(_) => "missing argument",
        GatewayError::InvalidArgument { .. } => "invalid argument",
        GatewayError::RouteNotFound => "not found",
        GatewayError::DeadlineExceeded(_) => "request timeout",
        GatewayError::PayloadTooLarge { .. } => "payload too large",
        GatewayError::MethodNotAllowed => "method not allowed",
        GatewayError::ModeNotFound(_) => "mode not found",
        GatewayError::ParseError { .. } => "mode parse error",
        GatewayError::SpawnError { .. } => "failed to start pipeline",
        GatewayError::PipeBroken { .. } => "pipe broken",
        GatewayError::DecodeError(_) => "decode error",
        GatewayError::Io(_) => "I/O error",
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let body = error_body(&self);
        (status, axum::Json(body)).into_response()
    }
}

/// Wrap a JSON value per the JSONP convention when `callback` is present;
/// otherwise return it as plain `application/json`.
pub fn respond_json(value: Value, status: StatusCode, callback: Option<&str>) -> Response {
    match callback {
        Some(cb) if is_safe_callback_name(cb) => {
            let body = format!("{cb}({value})");
            (
                status,
                [(header::CONTENT_TYPE, "application/javascript")],
                body,
            )
                .into_response()
        }
        _ => (status, axum::Json(value)).into_response(),
    }
}

/// JSONP callback names are interpolated directly into a script response;
/// restrict them to identifier characters so a crafted `callback` query
/// parameter can't break out of the wrapping function call.
fn is_safe_callback_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_exceeded_maps_to_408() {
        let err = GatewayError::DeadlineExceeded(std::time::Duration::from_secs(1));
        assert_eq!(status_for(&err), StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn unknown_pair_maps_to_400() {
        let err = GatewayError::UnknownPair(apt_core::PairKey::new(
            apt_core::LangCode::parse("eng").unwrap(),
            apt_core::LangCode::parse("spa").unwrap(),
        ));
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn spawn_error_maps_to_500() {
        let err = GatewayError::SpawnError {
            program: "lt-proc".into(),
            reason: "boom".into(),
        };
        assert_eq!(status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn rejects_unsafe_callback_names() {
        assert!(!is_safe_callback_name("alert(1)"));
        assert!(is_safe_callback_name("myCallback_1"));
    }
}
