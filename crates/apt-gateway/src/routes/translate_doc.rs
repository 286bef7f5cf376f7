//! `/translateDoc` (POST): multipart document upload, capped at 32,000,000
//! bytes, MIME-sniffed against a fixed allow list before translation.

use apt_core::{GatewayError, PairKey};
use apt_modes::ModeOptions;
use apt_service::RequestOpts;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::response::envelope;
use crate::routes::MAX_DOC_BYTES;
use crate::server::SharedServer;

const ALLOWED_MIME: &[&str] = &["text/plain", "text/html", "application/xhtml+xml"];

/// Parse a declared `Content-Length`, if present. Absent or unparseable
/// headers defer entirely to the route's `DefaultBodyLimit` backstop.
fn declared_content_length(headers: &HeaderMap) -> Option<usize> {
    headers.get(header::CONTENT_LENGTH)?.to_str().ok()?.parse().ok()
}

/// Sniff the document's actual type from its leading bytes rather than
/// trusting the client-declared `Content-Type`, which a crafted multipart
/// part can set to anything.
fn sniff_mime(bytes: &[u8]) -> &'static str {
    let head = &bytes[..bytes.len().min(512)];
    let lower = String::from_utf8_lossy(head).to_ascii_lowercase();
    if lower.trim_start().starts_with("<!doctype html") || lower.contains("<html") {
        "text/html"
    } else if lower.trim_start().starts_with("<?xml") && lower.contains("xhtml") {
        "application/xhtml+xml"
    } else {
        "text/plain"
    }
}

#[derive(Serialize)]
struct TranslatedText {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

pub async fn handle(State(server): State<SharedServer>, headers: HeaderMap, mut multipart: Multipart) -> Response {
    if let Some(actual) = declared_content_length(&headers) {
        if actual > MAX_DOC_BYTES {
            return GatewayError::PayloadTooLarge {
                actual,
                limit: MAX_DOC_BYTES,
            }
            .into_response();
        }
    }

    let mut langpair: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(_) => {
                return GatewayError::InvalidArgument {
                    name: "file",
                    reason: "malformed multipart body".into(),
                }
                .into_response();
            }
        };

        match field.name().unwrap_or_default() {
            "langpair" => {
                langpair = field.text().await.ok();
            }
            "file" => {
                file_bytes = field.bytes().await.ok().map(|b| b.to_vec());
            }
            _ => {}
        }
    }

    let Some(langpair) = langpair else {
        return GatewayError::MissingArgument("langpair").into_response();
    };
    let Some(bytes) = file_bytes else {
        return GatewayError::MissingArgument("file").into_response();
    };

    let sniffed = sniff_mime(&bytes);
    if !ALLOWED_MIME.contains(&sniffed) {
        return GatewayError::InvalidArgument {
            name: "file",
            reason: format!("unsupported document type '{sniffed}'"),
        }
        .into_response();
    }

    let pair = match PairKey::parse(&langpair) {
        Some(p) => p,
        None => {
            return GatewayError::InvalidArgument {
                name: "langpair",
                reason: format!("malformed language pair '{langpair}'"),
            }
            .into_response()
        }
    };

    let text = match String::from_utf8(bytes) {
        Ok(t) => t,
        Err(_) => {
            return GatewayError::InvalidArgument {
                name: "file",
                reason: "document is not valid UTF-8".into(),
            }
            .into_response()
        }
    };

    let opts = RequestOpts {
        mark_unknown: false,
        mode_opts: ModeOptions {
            deformat: Some("html".to_string()),
            reformat: Some("html".to_string()),
            nosplit: false,
        },
    };

    match server.service.translate(&pair, &text, opts).await {
        Ok(translated) => axum::Json(envelope(
            TranslatedText { translated_text: translated },
            StatusCode::OK,
        ))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_html_by_doctype() {
        assert_eq!(sniff_mime(b"<!DOCTYPE html><html></html>"), "text/html");
    }

    #[test]
    fn sniffs_plain_text_as_fallback() {
        assert_eq!(sniff_mime(b"just some words"), "text/plain");
    }

    #[test]
    fn sniffs_xhtml_from_xml_declaration() {
        let doc = br#"<?xml version="1.0"?><html xmlns="http://www.w3.org/1999/xhtml"></html>"#;
        assert_eq!(sniff_mime(doc), "application/xhtml+xml");
    }

    #[test]
    fn declared_content_length_is_parsed_from_the_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, "12345".parse().unwrap());
        assert_eq!(declared_content_length(&headers), Some(12345));
    }

    #[test]
    fn missing_content_length_defers_to_the_body_limit_layer() {
        assert_eq!(declared_content_length(&HeaderMap::new()), None);
    }
}
