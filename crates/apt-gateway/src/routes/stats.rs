//! `/stats`: uptime, per-pair usage, live pipe counts, and period aggregates.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::response::{envelope, respond_json};
use crate::server::SharedServer;

#[derive(Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_requests")]
    requests: usize,
    callback: Option<String>,
}

fn default_requests() -> usize {
    1000
}

#[derive(Serialize)]
struct StatsBody {
    #[serde(rename = "uptimeSeconds")]
    uptime_seconds: f64,
    pairs: HashMap<String, u64>,
    #[serde(rename = "runningPipes")]
    running_pipes: HashMap<String, usize>,
    #[serde(rename = "holdingPipes")]
    holding_pipes: usize,
    period: PeriodBody,
}

#[derive(Serialize)]
struct PeriodBody {
    requests: usize,
    chars: u64,
    #[serde(rename = "charsPerSec")]
    chars_per_sec: f64,
    #[serde(rename = "oldestSampleAgeSeconds")]
    oldest_sample_age_seconds: Option<f64>,
}

pub async fn handle(State(server): State<SharedServer>, Query(params): Query<StatsQuery>) -> Response {
    let snapshot = server.service.snapshot_stats().await;
    let recent = server.service.stats().recent_samples(params.requests).await;

    let mut running_pipes = HashMap::new();
    for pair in server.service.pool().installed_pairs() {
        let count = server.service.pool().running_pipes(&pair).await;
        running_pipes.insert(pair.to_string(), count);
    }

    let period_requests = recent.len();
    let period_chars: u64 = recent.iter().map(|s| s.input_bytes as u64).sum();

    let body = StatsBody {
        uptime_seconds: snapshot.uptime.as_secs_f64(),
        pairs: snapshot
            .usage
            .into_iter()
            .map(|(pair, count)| (pair.to_string(), count))
            .collect(),
        running_pipes,
        holding_pipes: server.service.pool().holding_count().await,
        period: PeriodBody {
            requests: period_requests,
            chars: period_chars,
            chars_per_sec: snapshot.chars_per_sec,
            oldest_sample_age_seconds: snapshot.oldest_sample_age.map(|d| d.as_secs_f64()),
        },
    };

    respond_json(
        envelope(body, StatusCode::OK),
        StatusCode::OK,
        params.callback.as_deref(),
    )
}
