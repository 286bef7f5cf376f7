//! `/translatePage`: fetch a URL (20s timeout) and translate its body as
//! HTML. Link rewriting is out of scope for the core pipeline pool this
//! gateway is built around; the page is translated as plain markup.

use apt_core::{GatewayError, PairKey};
use apt_modes::ModeOptions;
use apt_service::RequestOpts;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::server::SharedServer;

#[derive(Deserialize)]
pub struct TranslatePageQuery {
    #[serde(default)]
    langpair: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

pub async fn handle(State(server): State<SharedServer>, Query(params): Query<TranslatePageQuery>) -> Response {
    let Some(langpair) = params.langpair.as_deref() else {
        return GatewayError::MissingArgument("langpair").into_response();
    };
    let Some(url) = params.url.as_deref() else {
        return GatewayError::MissingArgument("url").into_response();
    };

    let pair = match PairKey::parse(langpair) {
        Some(p) => p,
        None => {
            return GatewayError::InvalidArgument {
                name: "langpair",
                reason: format!("malformed language pair '{langpair}'"),
            }
            .into_response()
        }
    };

    let client = match reqwest::Client::builder().timeout(server.page_fetch_timeout).build() {
        Ok(c) => c,
        Err(e) => {
            return GatewayError::Io(std::io::Error::other(e.to_string())).into_response();
        }
    };

    let fetched = match client.get(url).send().await {
        Ok(resp) => resp,
        Err(e) => {
            return GatewayError::InvalidArgument {
                name: "url",
                reason: format!("failed to fetch page: {e}"),
            }
            .into_response()
        }
    };

    let body = match fetched.text().await {
        Ok(b) => b,
        Err(e) => {
            return GatewayError::InvalidArgument {
                name: "url",
                reason: format!("failed to read page body: {e}"),
            }
            .into_response()
        }
    };

    let opts = RequestOpts {
        mark_unknown: false,
        mode_opts: ModeOptions {
            deformat: Some("html".to_string()),
            reformat: Some("html".to_string()),
            // A fetched page is translated as one markup document: splitting
            // it into independently-dispatched sentences would let the
            // pipeline pool interleave unrelated output through the same
            // markup structure, corrupting tags that span a split point.
            nosplit: true,
        },
    };

    match server.service.translate(&pair, &body, opts).await {
        Ok(translated) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/html")], translated).into_response(),
        Err(e) => e.into_response(),
    }
}
