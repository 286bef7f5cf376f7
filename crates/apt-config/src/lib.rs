//! Command-line surface and startup environment checks for the gateway.
//!
//! Everything here is deliberately thin: this crate owns flag parsing and
//! the handful of startup assertions (locale, path existence) that must
//! run before any pool or pipeline is created. The runtime knobs it parses
//! flow straight into `apt-pool::PoolLimits` and `apt-service::ServiceConfig`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// CLI flags, matching the wire-compatible surface of the reference
/// gateway so existing deployment scripts keep working unmodified.
#[derive(Parser, Debug, Clone)]
#[command(name = "apt-gateway", version, about = "MT pipeline gateway")]
pub struct Cli {
    /// Root directory containing installed language-pair modes.
    pub pairs_path: PathBuf,

    /// Additional root directory for analyzers/generators/taggers.
    #[arg(long)]
    pub nonpairs_path: Option<PathBuf>,

    #[arg(long, default_value_t = 2737)]
    pub port: u16,

    /// Per-request deadline, in seconds.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    #[arg(long, default_value_t = 1)]
    pub max_pipes_per_pair: usize,

    #[arg(long, default_value_t = 0)]
    pub min_pipes_per_pair: usize,

    #[arg(long, default_value_t = 5)]
    pub max_users_per_pipe: usize,

    /// Idle eviction threshold in seconds; 0 disables idle eviction.
    #[arg(long, default_value_t = 0)]
    pub max_idle_secs: u64,

    #[arg(long, default_value_t = 1000)]
    pub restart_pipe_after: u64,

    #[arg(long, default_value_t = 3600)]
    pub stat_period_max_age: u64,

    #[arg(long, default_value_t = 1000)]
    pub unknown_memory_limit: usize,

    /// 0 means one worker per core; this gateway otherwise runs a single
    /// process with internal concurrency (see the design notes on why
    /// the reference implementation's prefork model doesn't transfer).
    #[arg(long, default_value_t = 1)]
    pub num_processes: usize,

    #[arg(long)]
    pub ssl_cert: Option<PathBuf>,

    #[arg(long)]
    pub ssl_key: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub daemon: bool,

    #[arg(long)]
    pub log_path: Option<PathBuf>,
}

impl Cli {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn max_idle(&self) -> Option<Duration> {
        if self.max_idle_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.max_idle_secs))
        }
    }

    pub fn stat_period_max_age(&self) -> Duration {
        Duration::from_secs(self.stat_period_max_age)
    }
}

/// Checked at startup, before any pipeline is spawned: the locale must
/// declare UTF-8, since the sentinel wire protocol decodes pipeline output
/// as UTF-8 and a non-UTF-8 locale would make child processes (which
/// inherit the environment) emit bytes the gateway can't trust.
pub fn require_utf8_locale() -> anyhow::Result<()> {
    let candidates = ["LANG", "LC_ALL"];
    for key in candidates {
        if let Ok(val) = std::env::var(key) {
            if val.to_ascii_uppercase().contains("UTF-8") || val.to_ascii_uppercase().contains("UTF8") {
                return Ok(());
            }
            if !val.is_empty() {
                // A locale var is set but doesn't declare UTF-8; keep
                // checking the others before giving up.
                continue;
            }
        }
    }
    anyhow::bail!(
        "no UTF-8 locale found in LANG/LC_ALL; refusing to start \
         (pipeline output is decoded as UTF-8 and depends on it)"
    )
}
