//! `/translate`, `/translateRaw`: the core request path.

use apt_core::{GatewayError, PairKey};
use apt_modes::ModeOptions;
use apt_service::RequestOpts;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::response::{envelope, respond_json};
use crate::server::SharedServer;

#[derive(Deserialize)]
pub struct TranslateQuery {
    #[serde(default)]
    langpair: Option<String>,
    #[serde(default)]
    q: String,
    #[serde(rename = "markUnknown", default)]
    mark_unknown: Option<String>,
    /// Overrides both `deformat` and `reformat` with a single formatter type.
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    deformat: Option<String>,
    #[serde(default)]
    reformat: Option<String>,
    #[serde(default)]
    nosplit: Option<String>,
    callback: Option<String>,
}

const DEFAULT_DEFORMAT: &str = "html";
const DEFAULT_REFORMAT: &str = "html-noent";

#[derive(Serialize)]
struct TranslatedText {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

fn truthy(v: &Option<String>) -> bool {
    matches!(
        v.as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("yes") | Some("true") | Some("1")
    )
}

/// Resolve the `format`/`deformat`/`reformat` option surface into the
/// formatter types the mode parser selects stages from. `format`, when
/// given, names a single type used for both directions; otherwise
/// `deformat`/`reformat` are considered independently, each defaulting to
/// the type the original HTML-centric behavior assumed.
fn resolve_format(params: &TranslateQuery) -> (Option<String>, Option<String>) {
    match params.format.as_deref() {
        Some(kind) => (Some(kind.to_string()), Some(kind.to_string())),
        None => (
            Some(params.deformat.clone().unwrap_or_else(|| DEFAULT_DEFORMAT.to_string())),
            Some(params.reformat.clone().unwrap_or_else(|| DEFAULT_REFORMAT.to_string())),
        ),
    }
}

fn parse_request(params: &TranslateQuery) -> Result<(PairKey, RequestOpts), GatewayError> {
    let langpair = params
        .langpair
        .as_deref()
        .ok_or(GatewayError::MissingArgument("langpair"))?;
    let pair = PairKey::parse(langpair).ok_or_else(|| GatewayError::InvalidArgument {
        name: "langpair",
        reason: format!("malformed language pair '{langpair}'"),
    })?;
    let (deformat, reformat) = resolve_format(params);
    let opts = RequestOpts {
        mark_unknown: truthy(&params.mark_unknown),
        mode_opts: ModeOptions {
            deformat,
            reformat,
            nosplit: truthy(&params.nosplit),
        },
    };
    Ok((pair, opts))
}

pub async fn handle(State(server): State<SharedServer>, Query(params): Query<TranslateQuery>) -> Response {
    let (pair, opts) = match parse_request(&params) {
        Ok(v) => v,
        Err(e) => return e.into_response(),
    };

    match server.service.translate(&pair, &params.q, opts).await {
        Ok(translated) => respond_json(
            envelope(TranslatedText { translated_text: translated }, StatusCode::OK),
            StatusCode::OK,
            params.callback.as_deref(),
        ),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_raw(State(server): State<SharedServer>, Query(params): Query<TranslateQuery>) -> Response {
    let (pair, opts) = match parse_request(&params) {
        Ok(v) => v,
        Err(e) => return e.into_response(),
    };

    match server.service.translate(&pair, &params.q, opts).await {
        Ok(translated) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            translated,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
