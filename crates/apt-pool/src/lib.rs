//! Pair Pool: a bounded multiset of warm [`Pipeline`]s per language pair
//! (and per spawn-time mode option combination), with admission, selection,
//! and eviction rules, plus the Holding Area and Janitor that reclaim
//! pipelines once nothing references them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use apt_core::{GatewayError, PairKey};
use apt_modes::{DiscoveredPair, ModeOptions, ParsedMode};
use apt_pipeline::Pipeline;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Runtime knobs, one-to-one with the CLI surface in `apt-config`.
#[derive(Clone, Debug)]
pub struct PoolLimits {
    pub max_pipes_per_pair: usize,
    pub min_pipes_per_pair: usize,
    pub max_users_per_pipe: usize,
    pub max_idle: Option<Duration>,
    pub restart_pipe_after: u64,
    pub shutdown_grace: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_pipes_per_pair: 1,
            min_pipes_per_pair: 0,
            max_users_per_pipe: 5,
            max_idle: None,
            restart_pipe_after: 1000,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Why a pipeline was released, so the pool knows whether to evict it
/// immediately rather than wait for the next janitor pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
}

/// A pair plus the spawn-time options applied to it; distinct combinations
/// get distinct pipeline pools since the options change the spawned chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PoolKey {
    pair: PairKey,
    opts: ModeOptions,
}

struct ModeCacheEntry {
    #[allow(dead_code)] // kept for a future reload-on-mtime-change hook
    mode_path: std::path::PathBuf,
    parsed: Arc<ParsedMode>,
}

pub struct PairPool {
    limits: PoolLimits,
    mode_paths: HashMap<PairKey, std::path::PathBuf>,
    mode_cache: Mutex<HashMap<PairKey, ModeCacheEntry>>,
    pools: Mutex<HashMap<PoolKey, Vec<Arc<Pipeline>>>>,
    holding: Mutex<Vec<Arc<Pipeline>>>,
}

impl PairPool {
    pub fn new(limits: PoolLimits, pairs: &[DiscoveredPair]) -> Self {
        let mode_paths = pairs
            .iter()
            .map(|p| (PairKey::new(p.src.clone(), p.tgt.clone()), p.mode_path.clone()))
            .collect();
        Self {
            limits,
            mode_paths,
            mode_cache: Mutex::new(HashMap::new()),
            pools: Mutex::new(HashMap::new()),
            holding: Mutex::new(Vec::new()),
        }
    }

    pub fn installed_pairs(&self) -> Vec<PairKey> {
        self.mode_paths.keys().cloned().collect()
    }

    async fn cached_mode(&self, pair: &PairKey) -> Result<Arc<ParsedMode>, GatewayError> {
        let mode_path = self
            .mode_paths
            .get(pair)
            .ok_or_else(|| GatewayError::UnknownPair(pair.clone()))?;

        let mut cache = self.mode_cache.lock().await;
        if let Some(entry) = cache.get(pair) {
            return Ok(entry.parsed.clone());
        }
        let parsed = Arc::new(ParsedMode::parse(mode_path)?);
        cache.insert(
            pair.clone(),
            ModeCacheEntry {
                mode_path: mode_path.clone(),
                parsed: parsed.clone(),
            },
        );
        Ok(parsed)
    }

    /// Acquire a pipeline for `pair` under the default (no formatter)
    /// options. See [`Self::acquire_with_options`] for `deformat`/
    /// `reformat`/`nosplit`.
    pub async fn acquire(&self, pair: &PairKey) -> Result<Arc<Pipeline>, GatewayError> {
        self.acquire_with_options(pair, ModeOptions::default()).await
    }

    pub async fn acquire_with_options(
        &self,
        pair: &PairKey,
        opts: ModeOptions,
    ) -> Result<Arc<Pipeline>, GatewayError> {
        let mode = self.cached_mode(pair).await?;
        let key = PoolKey {
            pair: pair.clone(),
            opts: opts.clone(),
        };

        let mut pools = self.pools.lock().await;
        let entry = pools.entry(key.clone()).or_default();

        // Spawn reactively: a fresh pipe is only created when the pool is
        // empty, or the least-loaded pipe is already saturated and there's
        // still headroom under max_pipes_per_pair. This can leave a newly
        // spawned pipe oversubscribed if the heap ordering places it ahead
        // of an idler one on the very next acquire -- that's the accepted
        // behavior of the reactive rule, not a bug.
        let need_new = match least_loaded(entry) {
            None => true,
            Some(p) => {
                p.users() as usize >= self.limits.max_users_per_pipe
                    && entry.len() < self.limits.max_pipes_per_pair
            }
        };

        if need_new {
            let stages = mode.with_options(&opts);
            let pipe = Arc::new(Pipeline::start(pair.clone(), &stages).await?);
            info!(pair = %pair, pipeline_id = pipe.id(), "spawned new pipeline");
            entry.push(pipe);
        }

        let chosen = least_loaded(entry)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownPair(pair.clone()))?;
        chosen.mark_acquired();
        Ok(chosen)
    }

    /// Release a pipeline acquired via [`Self::acquire`]. Failures move the
    /// pipe to the Holding Area immediately rather than waiting for the
    /// next janitor pass, since a broken pipe must never be handed to
    /// another request.
    pub async fn release(&self, pair: &PairKey, opts: ModeOptions, pipe: &Arc<Pipeline>, outcome: Outcome) {
        pipe.mark_released();
        if outcome == Outcome::Failed || pipe.state() == apt_core::PipelineState::Dead {
            self.evict_one(pair, opts, pipe).await;
        }
    }

    async fn evict_one(&self, pair: &PairKey, opts: ModeOptions, pipe: &Arc<Pipeline>) {
        let key = PoolKey {
            pair: pair.clone(),
            opts,
        };
        let mut pools = self.pools.lock().await;
        if let Some(entry) = pools.get_mut(&key) {
            entry.retain(|p| !Arc::ptr_eq(p, pipe));
        }
        pipe.mark_draining();
        self.holding.lock().await.push(pipe.clone());
    }

    /// Run one eviction and drain pass. Called after every request and on
    /// a periodic timer.
    pub async fn tick_janitor(&self) {
        let now = Instant::now();
        let mut evicted = Vec::new();

        {
            let mut pools = self.pools.lock().await;
            for pipes in pools.values_mut() {
                pipes.sort_by(|a, b| {
                    a.users()
                        .cmp(&b.users())
                        .then_with(|| a.last_usage().cmp(&b.last_usage()))
                });
                let min_keep = self.limits.min_pipes_per_pair;
                let mut keep = Vec::with_capacity(pipes.len());
                for (idx, pipe) in pipes.drain(..).enumerate() {
                    let rotation_due = pipe.use_count() > self.limits.restart_pipe_after;
                    let idle_due = idx >= min_keep
                        && self
                            .limits
                            .max_idle
                            .is_some_and(|max_idle| now.duration_since(pipe.last_usage()) > max_idle);
                    if rotation_due || idle_due {
                        pipe.mark_draining();
                        evicted.push(pipe);
                    } else {
                        keep.push(pipe);
                    }
                }
                *pipes = keep;
            }
        }

        if !evicted.is_empty() {
            let mut holding = self.holding.lock().await;
            holding.extend(evicted);
        }

        let mut holding = self.holding.lock().await;
        let mut still_holding = Vec::with_capacity(holding.len());
        for pipe in holding.drain(..) {
            if pipe.users() == 0 {
                warn!(pipeline_id = pipe.id(), "shutting down evicted pipeline");
                pipe.shutdown(self.limits.shutdown_grace).await;
            } else {
                still_holding.push(pipe);
            }
        }
        *holding = still_holding;
    }

    pub async fn running_pipes(&self, pair: &PairKey) -> usize {
        let pools = self.pools.lock().await;
        pools
            .iter()
            .filter(|(k, _)| &k.pair == pair)
            .map(|(_, v)| v.len())
            .sum()
    }

    pub async fn holding_count(&self) -> usize {
        self.holding.lock().await.len()
    }
}

fn least_loaded(pipes: &[Arc<Pipeline>]) -> Option<&Arc<Pipeline>> {
    pipes
        .iter()
        .min_by(|a, b| a.users().cmp(&b.users()).then_with(|| a.last_usage().cmp(&b.last_usage())))
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

    fn pool_with(dir: &std::path::Path, limits: PoolLimits) -> PairPool {
        pool_with_mode(dir, limits, "cat\n")
    }

    fn pool_with_mode(dir: &std::path::Path, limits: PoolLimits, mode_line: &str) -> PairPool {
        let mode_path = dir.join("idn-idn.mode");
        std::fs::write(&mode_path, mode_line).unwrap();
        let pairs = vec![DiscoveredPair {
            mode_path,
            src: apt_core::LangCode::parse("idn").unwrap(),
            tgt: apt_core::LangCode::parse("idn").unwrap(),
        }];
        PairPool::new(limits, &pairs)
    }

    #[tokio::test]
    async fn acquire_spawns_lazily_on_first_request() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), PoolLimits::default());
        let pair = idn_pair();

        assert_eq!(pool.running_pipes(&pair).await, 0);
        let pipe = pool.acquire(&pair).await.unwrap();
        assert_eq!(pool.running_pipes(&pair).await, 1);
        pool.release(&pair, ModeOptions::default(), &pipe, Outcome::Success).await;
    }

    #[tokio::test]
    async fn unknown_pair_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), PoolLimits::default());
        let unknown = PairKey::new(
            apt_core::LangCode::parse("eng").unwrap(),
            apt_core::LangCode::parse("spa").unwrap(),
        );
        let err = pool.acquire(&unknown).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownPair(_)));
    }

    #[tokio::test]
    async fn restart_pipe_after_rotates_the_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let mut limits = PoolLimits::default();
        limits.restart_pipe_after = 3;
        limits.max_pipes_per_pair = 1;
        let pool = pool_with(dir.path(), limits);
        let pair = idn_pair();

        let mut last_id = None;
        for _ in 0..5 {
            let pipe = pool.acquire(&pair).await.unwrap();
            let id = pipe.id();
            pipe.translate("hello", Duration::from_secs(2)).await.unwrap();
            pool.release(&pair, ModeOptions::default(), &pipe, Outcome::Success).await;
            pool.tick_janitor().await;
            last_id = Some(id);
        }
        let _ = last_id;
        assert_eq!(pool.running_pipes(&pair).await, 1);
    }

    #[tokio::test]
    async fn evicted_pipe_with_users_zero_is_shut_down_by_janitor() {
        let dir = tempfile::tempdir().unwrap();
        let mut limits = PoolLimits::default();
        limits.restart_pipe_after = 0;
        let pool = pool_with(dir.path(), limits);
        let pair = idn_pair();

        let pipe = pool.acquire(&pair).await.unwrap();
        pipe.translate("x", Duration::from_secs(2)).await.unwrap();
        pool.release(&pair, ModeOptions::default(), &pipe, Outcome::Success).await;
        pool.tick_janitor().await;

        assert_eq!(pool.running_pipes(&pair).await, 0);
        assert_eq!(pool.holding_count().await, 0);
    }

    #[tokio::test]
    async fn pool_size_never_exceeds_max_pipes_per_pair() {
        let dir = tempfile::tempdir().unwrap();
        let mut limits = PoolLimits::default();
        limits.max_pipes_per_pair = 2;
        limits.max_users_per_pipe = 1;
        let pool = pool_with(dir.path(), limits);
        let pair = idn_pair();

        let a = pool.acquire(&pair).await.unwrap();
        let b = pool.acquire(&pair).await.unwrap();
        let c = pool.acquire(&pair).await.unwrap();
        assert!(pool.running_pipes(&pair).await <= 2);
        pool.release(&pair, ModeOptions::default(), &a, Outcome::Success).await;
        pool.release(&pair, ModeOptions::default(), &b, Outcome::Success).await;
        pool.release(&pair, ModeOptions::default(), &c, Outcome::Success).await;
    }

    #[tokio::test]
    async fn deadline_exceeded_translation_evicts_the_pipe_into_holding() {
        let dir = tempfile::tempdir().unwrap();
        // `sleep` never writes the sentinel, so the call times out.
        let pool = pool_with_mode(dir.path(), PoolLimits::default(), "sleep 5\n");
        let pair = idn_pair();

        let pipe = pool.acquire(&pair).await.unwrap();
        let result = pipe.translate("hello", Duration::from_millis(50)).await;
        assert!(matches!(result, Err(GatewayError::DeadlineExceeded(_))));

        pool.release(&pair, ModeOptions::default(), &pipe, Outcome::Failed).await;

        assert_eq!(pool.holding_count().await, 1);
        assert_eq!(pool.running_pipes(&pair).await, 0);
    }
}
