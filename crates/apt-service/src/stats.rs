//! Stats & Metering: sliding-window request timings and per-pair usage
//! counts, consulted by the `/stats` route.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use apt_core::PairKey;
use tokio::sync::Mutex;

/// One completed request, kept only long enough to feed period aggregates.
#[derive(Clone, Copy, Debug)]
pub struct TimingSample {
    pub start: Instant,
    pub end: Instant,
    pub input_bytes: usize,
}

struct Inner {
    samples: VecDeque<TimingSample>,
    usage: HashMap<PairKey, u64>,
}

/// Point-in-time view handed to the `/stats` route; cheap to construct
/// since it clones a bounded window rather than locking for the whole
/// response.
#[derive(Clone, Debug)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub usage: HashMap<PairKey, u64>,
    pub period_requests: usize,
    pub period_chars: u64,
    pub chars_per_sec: f64,
    pub oldest_sample_age: Option<Duration>,
}

pub struct Stats {
    started_at: Instant,
    window: Duration,
    inner: Mutex<Inner>,
}

impl Stats {
    pub fn new(window: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            window,
            inner: Mutex::new(Inner {
                samples: VecDeque::new(),
                usage: HashMap::new(),
            }),
        }
    }

    /// Record one completed request and prune samples older than the
    /// configured window (`STAT_PERIOD_MAX_AGE`, default 3600s).
    pub async fn record(&self, pair: &PairKey, sample: TimingSample) {
        let mut inner = self.inner.lock().await;
        *inner.usage.entry(pair.clone()).or_insert(0) += 1;
        inner.samples.push_back(sample);

        let cutoff = Instant::now().checked_sub(self.window);
        if let Some(cutoff) = cutoff {
            while let Some(front) = inner.samples.front() {
                if front.end < cutoff {
                    inner.samples.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    pub async fn use_count(&self, pair: &PairKey) -> u64 {
        self.inner.lock().await.usage.get(pair).copied().unwrap_or(0)
    }

    /// The last `n` samples within the current window, oldest first.
    pub async fn recent_samples(&self, n: usize) -> Vec<TimingSample> {
        let inner = self.inner.lock().await;
        let len = inner.samples.len();
        let start = len.saturating_sub(n);
        inner.samples.iter().skip(start).copied().collect()
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock().await;
        let period_requests = inner.samples.len();
        let period_chars: u64 = inner.samples.iter().map(|s| s.input_bytes as u64).sum();
        let oldest_sample_age = inner.samples.front().map(|s| s.start.elapsed());
        let period_secs = oldest_sample_age.map(|d| d.as_secs_f64()).filter(|s| *s > 0.0);
        let chars_per_sec = match period_secs {
            Some(secs) => period_chars as f64 / secs,
            None => 0.0,
        };

        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            usage: inner.usage.clone(),
            period_requests,
            period_chars,
            chars_per_sec,
            oldest_sample_age,
        }
    }
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
    async fn use_count_increments_by_exactly_one_per_record() {
        let stats = Stats::new(Duration::from_secs(3600));
        let pair = idn_pair();
        for _ in 0..3 {
            let now = Instant::now();
            stats
                .record(&pair, TimingSample { start: now, end: now, input_bytes: 5 })
                .await;
        }
        assert_eq!(stats.use_count(&pair).await, 3);
    }

    #[tokio::test]
    async fn snapshot_reports_period_requests_and_chars() {
        let stats = Stats::new(Duration::from_secs(3600));
        let pair = idn_pair();
        let now = Instant::now();
        stats
            .record(&pair, TimingSample { start: now, end: now, input_bytes: 10 })
            .await;
        stats
            .record(&pair, TimingSample { start: now, end: now, input_bytes: 20 })
            .await;

        let snap = stats.snapshot().await;
        assert_eq!(snap.period_requests, 2);
        assert_eq!(snap.period_chars, 30);
    }

    #[tokio::test]
    async fn uptime_is_monotonic_across_calls() {
        let stats = Stats::new(Duration::from_secs(3600));
        let first = stats.snapshot().await.uptime;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = stats.snapshot().await.uptime;
        assert!(second >= first);
    }

    #[tokio::test]
    async fn recent_samples_returns_at_most_n_newest() {
        let stats = Stats::new(Duration::from_secs(3600));
        let pair = idn_pair();
        for i in 0..5 {
            let now = Instant::now();
            stats
                .record(&pair, TimingSample { start: now, end: now, input_bytes: i })
                .await;
        }
        let recent = stats.recent_samples(2).await;
        assert_eq!(recent.len(), 2);
    }
}
