//! Process-chain spawning: launches an ordered sequence of child processes
//! and wires each one's stdout into the next one's stdin.
//!
//! This is the lowest layer of the pipeline stack. It knows nothing about
//! translation, sentinels, or pools -- just how to get N programs connected
//! by pipes, running, and eventually torn down without leaving orphans.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One stage of a mode's command chain: a program, its argument vector, and
/// the working directory it should run in (resolved relative to the mode
/// file that named it).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: PathBuf) -> Self {
        Self {
            program: program.into(),
            args,
            cwd,
        }
    }
}

const CHAIN_COPY_BUF: usize = 64 * 1024;

/// A running chain of child processes, stage 0's stdin feeding through to
/// the last stage's stdout. Intermediate stages are pumped by background
/// copy tasks spawned at construction time.
pub struct ProcessChain {
    children: Vec<Child>,
    pumps: Vec<JoinHandle<()>>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl ProcessChain {
    /// Spawn every stage in `specs`, in order, wiring stdout(i) -> stdin(i+1).
    /// If any stage fails to spawn, every already-started child is killed
    /// before the error is returned -- a partially-started chain is never
    /// left running.
    pub async fn spawn(specs: &[CommandSpec]) -> Result<Self> {
        anyhow::ensure!(!specs.is_empty(), "process chain must have at least one stage");

        let mut children = Vec::with_capacity(specs.len());
        let mut pumps = Vec::new();
        let mut prev_stdout: Option<ChildStdout> = None;

        for (i, spec) in specs.iter().enumerate() {
            let is_first = i == 0;
            let is_last = i == specs.len() - 1;

            let mut cmd = Command::new(&spec.program);
            cmd.args(&spec.args);
            cmd.current_dir(&spec.cwd);
            cmd.stdin(std::process::Stdio::piped());
            cmd.stdout(std::process::Stdio::piped());
            cmd.stderr(std::process::Stdio::null());
            cmd.kill_on_drop(true);

            // Each stage gets its own session so a stuck stage can be
            // signaled without taking down its neighbors.
            #[cfg(unix)]
            unsafe {
                cmd.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }

            let spawned = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    Self::kill_all(&mut children).await;
                    return Err(e).with_context(|| {
                        format!("failed to spawn pipeline stage '{}'", spec.program)
                    });
                }
            };
            children.push(spawned);
            let child = children.last_mut().expect("just pushed");

            let this_stdin = child.stdin.take().context("child stdin not piped")?;
            let this_stdout = child.stdout.take().context("child stdout not piped")?;

            if let Some(prev) = prev_stdout.take() {
                // Bridge the previous stage's stdout into this stage's stdin.
                let handle = tokio::spawn(pump(prev, this_stdin));
                pumps.push(handle);
            } else if is_first {
                // Stash stage 0's stdin for the caller; it isn't fed by a pump.
                children[0].stdin = Some(this_stdin);
            }

            if is_last {
                children.last_mut().expect("just pushed").stdout = Some(this_stdout);
            } else {
                prev_stdout = Some(this_stdout);
            }
        }

        let first = children.first_mut().expect("non-empty");
        let stdin = first.stdin.take();
        let last = children.last_mut().expect("non-empty");
        let stdout = last.stdout.take();

        Ok(Self {
            children,
            pumps,
            stdin,
            stdout,
        })
    }

    /// Stage 0's stdin, the pipeline's input stream.
    pub fn stdin(&mut self) -> &mut ChildStdin {
        self.stdin.as_mut().expect("stdin taken twice")
    }

    /// The last stage's stdout, the pipeline's output stream.
    pub fn stdout(&mut self) -> &mut ChildStdout {
        self.stdout.as_mut().expect("stdout taken twice")
    }

    /// Best-effort liveness check: true if every stage is still running.
    pub fn all_alive(&mut self) -> bool {
        self.children
            .iter_mut()
            .all(|c| matches!(c.try_wait(), Ok(None)))
    }

    /// Close stage 0's stdin, wait up to `grace` for every stage to exit in
    /// order, then force-kill whatever remains. Idempotent: safe to call
    /// more than once (later calls are no-ops once children are gone).
    pub async fn shutdown(&mut self, grace: Duration) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        for child in &mut self.children {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => debug!(?status, "pipeline stage exited"),
                Ok(Err(e)) => warn!(error = %e, "error waiting for pipeline stage"),
                Err(_) => {
                    if let Some(pid) = child.id() {
                        // SAFETY: pid is a valid child pid owned by this process;
                        // sending SIGKILL to its own session group is safe.
                        unsafe {
                            libc::kill(-(pid as i32), libc::SIGKILL);
                        }
                    }
                    let _ = child.kill().await;
                }
            }
        }

        for handle in self.pumps.drain(..) {
            handle.abort();
        }
    }

    async fn kill_all(children: &mut [Child]) {
        for child in children.iter_mut() {
            let _ = child.kill().await;
        }
    }
}

async fn pump(mut from: ChildStdout, mut to: ChildStdin) {
    let mut buf = vec![0u8; CHAIN_COPY_BUF];
    use tokio::io::AsyncReadExt;
    loop {
        match from.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if to.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    let _ = to.shutdown().await;
}
