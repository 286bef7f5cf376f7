//! Translation Service: the request-level operation that ties the pool,
//! the pipeline wire protocol, stats, and the missing-token store together.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use apt_core::{GatewayError, PairKey};
use apt_modes::ModeOptions;
use apt_pool::{Outcome, PairPool};
use regex::Regex;

use crate::missing_tokens::MissingTokenStore;
use crate::stats::{Stats, StatsSnapshot, TimingSample};

/// Request-level options. `mode_opts` affects which pipeline is selected
/// (spawn-time stages); `mark_unknown` is purely post-processing.
#[derive(Clone, Debug, Default)]
pub struct RequestOpts {
    pub mark_unknown: bool,
    pub mode_opts: ModeOptions,
}

pub struct ServiceConfig {
    pub request_timeout: Duration,
    pub stat_period_max_age: Duration,
    pub unknown_memory_limit: usize,
    pub missing_tokens_path: Option<PathBuf>,
}

pub struct TranslationService {
    pool: PairPool,
    stats: Stats,
    missing_tokens: MissingTokenStore,
    request_timeout: Duration,
}

impl TranslationService {
    pub fn new(pool: PairPool, config: ServiceConfig) -> Self {
        Self {
            pool,
            stats: Stats::new(config.stat_period_max_age),
            missing_tokens: MissingTokenStore::new(config.unknown_memory_limit, config.missing_tokens_path),
            request_timeout: config.request_timeout,
        }
    }

    pub fn pool(&self) -> &PairPool {
        &self.pool
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// `translate(pair, text, opts)`, per the request-level operation: the
    /// one entry point every HTTP handler that produces translated text
    /// calls into.
    pub async fn translate(&self, pair: &PairKey, text: &str, opts: RequestOpts) -> Result<String, GatewayError> {
        let pipe = self.pool.acquire_with_options(pair, opts.mode_opts.clone()).await?;
        let before = Instant::now();

        let result = pipe.translate(text, self.request_timeout).await;
        let after = Instant::now();

        let outcome = if result.is_ok() { Outcome::Success } else { Outcome::Failed };
        self.pool.release(pair, opts.mode_opts, &pipe, outcome).await;
        self.pool.tick_janitor().await;

        let translated = result?;

        self.stats
            .record(
                pair,
                TimingSample {
                    start: before,
                    end: after,
                    input_bytes: text.len(),
                },
            )
            .await;

        Ok(strip_or_keep_unknown_markers(&translated, opts.mark_unknown, pair, &self.missing_tokens).await)
    }

    pub async fn snapshot_stats(&self) -> StatsSnapshot {
        self.stats.snapshot().await
    }

    /// Flush the missing-token store and let the caller drop the service;
    /// called during graceful shutdown.
    pub async fn close(&self) {
        self.missing_tokens.close().await;
    }
}

fn unknown_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*[^.,;:\t* ]+").expect("static regex is valid"))
}

/// Strip the leading `*` marker from every unknown-token match unless the
/// caller opted into seeing it, and unconditionally record each such token
/// in the missing-token store, tagged with `pair`.
async fn strip_or_keep_unknown_markers(
    text: &str,
    mark_unknown: bool,
    pair: &PairKey,
    store: &MissingTokenStore,
) -> String {
    let re = unknown_token_re();
    if !re.is_match(text) {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in re.find_iter(text) {
        out.push_str(&text[last..m.start()]);
        let token = m.as_str();
        let surface = &token[1..];
        store.insert(pair, surface).await;
        if mark_unknown {
            out.push_str(token);
        } else {
            out.push_str(surface);
        }
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idn_pair() -> PairKey {
        PairKey::new(
            apt_core::LangCode::parse("idn").unwrap(),
            apt_core::LangCode::parse("idn").unwrap(),
        )
    }

    #[tokio::test]
    async fn strips_unknown_marker_by_default() {
        let store = MissingTokenStore::new(100, None);
        let out = strip_or_keep_unknown_markers("*foo bar", false, &idn_pair(), &store).await;
        assert_eq!(out, "foo bar");
    }

    #[tokio::test]
    async fn keeps_unknown_marker_when_requested() {
        let store = MissingTokenStore::new(100, None);
        let out = strip_or_keep_unknown_markers("*foo bar", true, &idn_pair(), &store).await;
        assert_eq!(out, "*foo bar");
    }

    #[tokio::test]
    async fn records_missing_token_regardless_of_mark_unknown() {
        let store = MissingTokenStore::new(100, None);
        strip_or_keep_unknown_markers("*foo bar", true, &idn_pair(), &store).await;
        assert_eq!(store.buffered_len().await, 1);
    }

    #[tokio::test]
    async fn text_without_markers_passes_through_unchanged() {
        let store = MissingTokenStore::new(100, None);
        let out = strip_or_keep_unknown_markers("hello world", false, &idn_pair(), &store).await;
        assert_eq!(out, "hello world");
    }
}
