//! Pipeline: a running instance of a parsed mode, serving translations one
//! at a time (or strictly serialized) over its shared stdin/stdout.
//!
//! The wire protocol is a null-byte sentinel: the caller writes the input
//! text, a `0x00` byte, flushes, then reads from the last stage's stdout
//! until it sees `0x00`. Because that framing is the only synchronization
//! primitive available, the whole write-then-read exchange is one critical
//! section per pipe -- this module takes the per-pipe lock for the entire
//! `translate` call rather than trying to interleave concurrent writers,
//! which the reference design explicitly allows as the simpler correct
//! choice (`max_users_per_pipe` is a spawn-another hint, not a true
//! concurrency limit enforced inside the pipe).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use apt_core::{GatewayError, PairKey, PipelineState};
use apt_process::{CommandSpec, ProcessChain};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, warn};

const SENTINEL: u8 = 0x00;
const READ_CHUNK: usize = 8 * 1024;

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// Per-request options that affect a single translation but not the
/// spawned process chain (contrast with `apt_modes::ModeOptions`, which
/// affects spawn-time stages).
#[derive(Clone, Copy, Debug, Default)]
pub struct TranslateOpts {
    pub mark_unknown: bool,
}

/// A running chain of processes plus the bookkeeping the pool needs to
/// schedule and evict it.
pub struct Pipeline {
    id: u64,
    pair: PairKey,
    chain: AsyncMutex<ProcessChain>,
    state: AtomicBool, // true while Ready; false once Dead. Draining tracked separately.
    draining: AtomicBool,
    use_count: AtomicU64,
    users: AtomicU64,
    last_usage: StdMutex<Instant>,
}

impl Pipeline {
    /// Spawn every stage of `stages` and wire them into a running chain.
    /// On partial spawn failure, `ProcessChain::spawn` has already killed
    /// whatever started before returning the error.
    pub async fn start(pair: PairKey, stages: &[CommandSpec]) -> Result<Self, GatewayError> {
        let chain = ProcessChain::spawn(stages).await.map_err(|e| {
            let program = stages.first().map(|s| s.program.clone()).unwrap_or_default();
            GatewayError::SpawnError {
                program,
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            id: NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed),
            pair,
            chain: AsyncMutex::new(chain),
            state: AtomicBool::new(true),
            draining: AtomicBool::new(false),
            use_count: AtomicU64::new(0),
            users: AtomicU64::new(0),
            last_usage: StdMutex::new(Instant::now()),
        })
    }

    /// Stable identity for log lines and the test hook that distinguishes
    /// pipeline instances across restarts.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> PipelineState {
        if !self.state.load(Ordering::Acquire) {
            PipelineState::Dead
        } else if self.draining.load(Ordering::Acquire) {
            PipelineState::Draining
        } else {
            PipelineState::Ready
        }
    }

    pub fn mark_draining(&self) {
        self.draining.store(true, Ordering::Release);
    }

    fn mark_dead(&self) {
        self.state.store(false, Ordering::Release);
    }

    pub fn use_count(&self) -> u64 {
        self.use_count.load(Ordering::Relaxed)
    }

    pub fn users(&self) -> u64 {
        self.users.load(Ordering::Relaxed)
    }

    pub fn last_usage(&self) -> Instant {
        *self.last_usage.lock().expect("last_usage mutex poisoned")
    }

    /// Called by the pool at acquisition time: increments the in-flight
    /// user count and bumps `lastUsage` to the acquisition time. `lastUsage`
    /// is monotonically non-decreasing because `Instant` only moves forward.
    pub fn mark_acquired(&self) {
        self.users.fetch_add(1, Ordering::AcqRel);
        *self.last_usage.lock().expect("last_usage mutex poisoned") = Instant::now();
    }

    /// Called by the pool on every exit path of a request (success or
    /// error) to release the logical slot.
    pub fn mark_released(&self) {
        self.users.fetch_sub(1, Ordering::AcqRel);
    }

    /// Run one request through the pipe: write the sentinel-framed input,
    /// read the sentinel-framed output, all within `deadline`.
    ///
    /// On `DeadlineExceeded` or `PipeBroken` the pipeline is marked Dead;
    /// the caller (the pool) is responsible for moving it to the holding
    /// area, since in-flight peers sharing the same pipe must also fail --
    /// there is no way to resynchronize sentinels across an aborted frame.
    pub async fn translate(&self, text: &str, deadline: Duration) -> Result<String, GatewayError> {
        let fut = self.translate_inner(text);
        match tokio::time::timeout(deadline, fut).await {
            Ok(Ok(result)) => {
                self.use_count.fetch_add(1, Ordering::Relaxed);
                Ok(result)
            }
            Ok(Err(e)) => {
                self.mark_dead();
                error!(pipeline_id = self.id, error = %e, "pipe broken during translate");
                Err(e)
            }
            Err(_) => {
                self.mark_dead();
                warn!(pipeline_id = self.id, ?deadline, "translation deadline exceeded");
                Err(GatewayError::DeadlineExceeded(deadline))
            }
        }
    }

    async fn translate_inner(&self, text: &str) -> Result<String, GatewayError> {
        let mut chain = self.chain.lock().await;

        // Dropped after `chain` so that if this future is cancelled mid-await
        // (the deadline in `translate` fires), the pipe is marked dead before
        // the mutex guard releases -- a peer queued on the same pipe then
        // sees `Dead` below instead of reading/writing a desynchronized
        // stream. Disarmed on the success path.
        let mut poison = PoisonOnDrop::new(self);

        if self.state() == PipelineState::Dead {
            return Err(GatewayError::PipeBroken {
                pair: self.pair.clone(),
                reason: "pipe already marked dead by a prior failed exchange".into(),
            });
        }

        chain
            .stdin()
            .write_all(text.as_bytes())
            .await
            .map_err(|e| self.broken(e))?;
        chain
            .stdin()
            .write_all(&[SENTINEL])
            .await
            .map_err(|e| self.broken(e))?;
        chain.stdin().flush().await.map_err(|e| self.broken(e))?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = chain
                .stdout()
                .read(&mut chunk)
                .await
                .map_err(|e| self.broken(e))?;
            if n == 0 {
                return Err(GatewayError::PipeBroken {
                    pair: self.pair.clone(),
                    reason: "stream closed before sentinel".into(),
                });
            }
            if let Some(pos) = chunk[..n].iter().position(|&b| b == SENTINEL) {
                buf.extend_from_slice(&chunk[..pos]);
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        poison.disarm();
        String::from_utf8(buf).map_err(GatewayError::DecodeError)
    }

    fn broken(&self, io_err: std::io::Error) -> GatewayError {
        GatewayError::PipeBroken {
            pair: self.pair.clone(),
            reason: io_err.to_string(),
        }
    }

    /// Close stdin, wait up to `grace` for every stage to exit in order,
    /// then force-terminate. Idempotent.
    pub async fn shutdown(&self, grace: Duration) {
        self.mark_dead();
        let mut chain = self.chain.lock().await;
        chain.shutdown(grace).await;
    }
}

/// Marks its pipeline dead on drop unless `disarm`ed, regardless of whether
/// that drop is an ordinary return or a future cancellation. Declared after
/// the `chain` mutex guard in `translate_inner` so it runs first on unwind,
/// poisoning the pipe before the lock is released.
struct PoisonOnDrop<'a> {
    pipeline: &'a Pipeline,
    disarmed: bool,
}

impl<'a> PoisonOnDrop<'a> {
    fn new(pipeline: &'a Pipeline) -> Self {
        Self { pipeline, disarmed: false }
    }

    fn disarm(&mut self) {
        self.disarmed = true;
    }
}

impl Drop for PoisonOnDrop<'_> {
    fn drop(&mut self) {
        if !self.disarmed {
            self.pipeline.mark_dead();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn cat_stage() -> CommandSpec {
        CommandSpec::new("cat", vec![], PathBuf::from("."))
    }

    fn idn_pair() -> apt_core::PairKey {
        apt_core::PairKey::new(
            apt_core::LangCode::parse("idn").unwrap(),
            apt_core::LangCode::parse("idn").unwrap(),
        )
    }

    #[tokio::test]
    async fn identity_pipeline_echoes_input_verbatim() {
        let pipe = Pipeline::start(idn_pair(), &[cat_stage()]).await.unwrap();
        let out = pipe.translate("hello", Duration::from_secs(2)).await.unwrap();
        assert_eq!(out, "hello");
        assert_eq!(pipe.use_count(), 1);
        pipe.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn repeated_translations_increment_use_count() {
        let pipe = Pipeline::start(idn_pair(), &[cat_stage()]).await.unwrap();
        for i in 0..3 {
            let out = pipe
                .translate(&format!("msg{i}"), Duration::from_secs(2))
                .await
                .unwrap();
            assert_eq!(out, format!("msg{i}"));
        }
        assert_eq!(pipe.use_count(), 3);
        pipe.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn empty_input_returns_empty_output_and_still_counts() {
        let pipe = Pipeline::start(idn_pair(), &[cat_stage()]).await.unwrap();
        let out = pipe.translate("", Duration::from_secs(2)).await.unwrap();
        assert_eq!(out, "");
        assert_eq!(pipe.use_count(), 1);
        pipe.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn acquire_and_release_tracks_users() {
        let pipe = Pipeline::start(idn_pair(), &[cat_stage()]).await.unwrap();
        assert_eq!(pipe.users(), 0);
        pipe.mark_acquired();
        assert_eq!(pipe.users(), 1);
        pipe.mark_released();
        assert_eq!(pipe.users(), 0);
        pipe.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn deadline_exceeded_marks_pipeline_dead() {
        // `sleep` never writes a sentinel, so the read half blocks until
        // the deadline fires.
        let stage = CommandSpec::new("sleep", vec!["5".into()], PathBuf::from("."));
        let pipe = Pipeline::start(idn_pair(), &[stage]).await.unwrap();
        let err = pipe
            .translate("hello", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DeadlineExceeded(_)));
        assert_eq!(pipe.state(), PipelineState::Dead);
        pipe.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_as_spawn_error() {
        let bad = CommandSpec::new("no-such-binary-xyz", vec![], PathBuf::from("."));
        let err = Pipeline::start(idn_pair(), &[bad]).await.unwrap_err();
        assert!(matches!(err, GatewayError::SpawnError { .. }));
    }

    #[tokio::test]
    async fn concurrent_calls_on_the_same_pipe_do_not_cross_contaminate() {
        let pipe = Arc::new(Pipeline::start(idn_pair(), &[cat_stage()]).await.unwrap());

        let a = {
            let pipe = pipe.clone();
            tokio::spawn(async move { pipe.translate("alpha", Duration::from_secs(2)).await })
        };
        let b = {
            let pipe = pipe.clone();
            tokio::spawn(async move { pipe.translate("beta", Duration::from_secs(2)).await })
        };

        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap().unwrap(), "alpha");
        assert_eq!(rb.unwrap().unwrap(), "beta");
        assert_eq!(pipe.use_count(), 2);
        pipe.shutdown(Duration::from_secs(1)).await;
    }

    /// A peer queued behind a pipe that times out must observe `PipeBroken`
    /// rather than touching the now-desynchronized stream: the deadline's
    /// `timeout` future drops `translate_inner`'s stack (including its
    /// mutex guard) on cancellation, and without poisoning the pipe first,
    /// the queued peer's own lock acquisition would have raced straight
    /// into reading/writing a stream no longer in a known frame.
    #[tokio::test]
    async fn queued_peer_on_a_timed_out_pipe_gets_pipe_broken() {
        let stage = CommandSpec::new("sleep", vec!["5".into()], PathBuf::from("."));
        let pipe = Arc::new(Pipeline::start(idn_pair(), &[stage]).await.unwrap());

        let first = {
            let pipe = pipe.clone();
            tokio::spawn(async move { pipe.translate("a", Duration::from_millis(50)).await })
        };
        // Give the first call a head start so it holds the chain lock when
        // the second queues behind it.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let pipe = pipe.clone();
            tokio::spawn(async move { pipe.translate("b", Duration::from_secs(2)).await })
        };

        assert!(matches!(first.await.unwrap(), Err(GatewayError::DeadlineExceeded(_))));
        assert!(matches!(second.await.unwrap(), Err(GatewayError::PipeBroken { .. })));

        pipe.shutdown(Duration::from_secs(1)).await;
    }
}
