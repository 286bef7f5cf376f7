//! `/list`, `/listPairs`: enumerate installed modes by category.

use apt_core::GatewayError;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::response::{envelope, respond_json};
use crate::server::SharedServer;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    q: String,
    callback: Option<String>,
}

#[derive(Serialize)]
struct PairEntry {
    #[serde(rename = "sourceLanguage")]
    source_language: String,
    #[serde(rename = "targetLanguage")]
    target_language: String,
}

#[derive(Serialize)]
struct ModeEntry {
    name: String,
    lang: String,
}

pub async fn handle(State(server): State<SharedServer>, Query(params): Query<ListQuery>) -> Response {
    let category = match resolve_category(&params.q) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };

    let data = match category {
        Category::Pairs => {
            let pairs: Vec<PairEntry> = server
                .inventory
                .pairs
                .iter()
                .map(|p| PairEntry {
                    source_language: p.src.to_string(),
                    target_language: p.tgt.to_string(),
                })
                .collect();
            serde_json::to_value(pairs).expect("pair list serializes")
        }
        Category::Analyzers => modes_json(&server.inventory.analyzers),
        Category::Generators => modes_json(&server.inventory.generators),
        Category::Taggers => modes_json(&server.inventory.taggers),
    };

    respond_json(
        envelope(data, StatusCode::OK),
        StatusCode::OK,
        params.callback.as_deref(),
    )
}

#[derive(Clone, Copy)]
enum Category {
    Pairs,
    Analyzers,
    Generators,
    Taggers,
}

fn resolve_category(q: &str) -> Result<Category, GatewayError> {
    match q {
        "" => Err(GatewayError::MissingArgument("q")),
        "pairs" => Ok(Category::Pairs),
        "analyzers" | "analysers" => Ok(Category::Analyzers),
        "generators" => Ok(Category::Generators),
        "taggers" | "disambiguators" => Ok(Category::Taggers),
        other => Err(GatewayError::InvalidArgument {
            name: "q",
            reason: format!("unknown category '{other}'"),
        }),
    }
}

fn modes_json(modes: &[apt_modes::DiscoveredMode]) -> serde_json::Value {
    let entries: Vec<ModeEntry> = modes
        .iter()
        .map(|m| ModeEntry {
            name: m.name.clone(),
            lang: m.lang.to_string(),
        })
        .collect();
    serde_json::to_value(entries).expect("mode list serializes")
}
