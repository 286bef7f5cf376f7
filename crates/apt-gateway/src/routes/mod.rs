mod list;
mod stats;
mod translate;
mod translate_doc;
mod translate_page;
mod unsupported;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::server::SharedServer;

/// 32,000,000 bytes, the `/translateDoc` body limit. `translate_doc::handle`
/// checks a declared `Content-Length` against this up front so an oversized
/// upload gets the documented error envelope; this layer is the backstop
/// for chunked bodies with no declared length, and its own rejection bypasses
/// that envelope.
pub(crate) const MAX_DOC_BYTES: usize = 32_000_000;

pub fn build(server: SharedServer) -> Router {
    let doc_route = Router::new()
        .route("/translateDoc", post(translate_doc::handle))
        .route_layer(DefaultBodyLimit::max(MAX_DOC_BYTES));

    Router::new()
        .route("/list", get(list::handle))
        .route("/listPairs", get(list::handle))
        .route("/stats", get(stats::handle))
        .route("/translate", get(translate::handle))
        .route("/translateRaw", get(translate::handle_raw))
        .route("/translatePage", get(translate_page::handle))
        .merge(doc_route)
        .route("/analyze", get(unsupported::handle))
        .route("/analyse", get(unsupported::handle))
        .route("/generate", get(unsupported::handle))
        .route("/perWord", get(unsupported::handle))
        .route("/calcCoverage", get(unsupported::handle))
        .route("/identifyLang", get(unsupported::handle))
        .route("/listLanguageNames", get(unsupported::handle))
        .route("/getLocale", get(unsupported::handle))
        .route("/pipedebug", get(unsupported::handle))
        .route("/suggest", post(unsupported::handle))
        .fallback(unsupported::not_found)
        .with_state(server)
}
