//! Streaming subprocess execution.
//!
//! [`ProcessRunner::run`] spawns `<shell> -c <command>` in its own process
//! group with stdout and stderr attached to the same pipe, then races four
//! events in one `select!`: the abort signal, the timeout, new output, and
//! process exit. Whichever fires first is the terminal transition. On every
//! terminal transition the process group is killed, the pipe is drained for
//! a short grace period and the child is reaped.

use std::os::fd::OwnedFd;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_core::{AbortSignal, ToolCallId, ToolError};
use conduit_settings::ExecSettings;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, histogram};
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::output::{OutputAccumulator, OutputLimits, RenderedOutput};
use crate::process_group::ProcessGroup;

const READ_CHUNK: usize = 8192;

/// Minimum spacing between streamed previews.
const PREVIEW_INTERVAL: Duration = Duration::from_millis(50);

/// One command to run.
#[derive(Clone, Debug)]
pub struct ExecRequest<'a> {
    /// Call id; at most one execution per id is active at a time.
    pub call_id: &'a ToolCallId,
    /// Shell command line.
    pub command: &'a str,
    /// Working directory.
    pub cwd: &'a Path,
    /// `None` runs without a deadline.
    pub timeout: Option<Duration>,
    /// Whether `on_output` wants previews. When false nothing is rendered
    /// until the command ends.
    pub stream: bool,
}

/// How an execution ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The process exited. Signal deaths are reported as `128 + signal`.
    Exited(i32),
    /// The deadline passed first.
    TimedOut(Duration),
    /// The abort signal was set first.
    Aborted,
    /// The shell could not be started.
    SpawnFailed(String),
}

impl Termination {
    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exited(0) => "success",
            Self::Exited(_) => "failure",
            Self::TimedOut(_) => "timeout",
            Self::Aborted => "aborted",
            Self::SpawnFailed(_) => "spawn_error",
        }
    }
}

/// Final state of an execution.
#[derive(Clone, Debug)]
pub struct ExecOutcome {
    /// Terminal transition.
    pub termination: Termination,
    /// Output rendered after the pipe was drained.
    pub output: RenderedOutput,
    /// Wall-clock time from spawn to reap.
    pub duration: Duration,
}

/// Runs shell commands. Cheap to clone; clones share the active-call table.
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    settings: Arc<ExecSettings>,
    active: Arc<DashMap<ToolCallId, ()>>,
}

/// Removes a call id from the active table when dropped.
struct ActiveCall {
    active: Arc<DashMap<ToolCallId, ()>>,
    call_id: ToolCallId,
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        let _ = self.active.remove(&self.call_id);
    }
}

impl ProcessRunner {
    /// Create a runner with the given settings.
    pub fn new(settings: ExecSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            active: Arc::new(DashMap::new()),
        }
    }

    /// Settings in effect.
    pub fn settings(&self) -> &ExecSettings {
        &self.settings
    }

    /// Number of executions currently running.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Resolve a requested timeout in seconds against the configured default
    /// and cap. `Some(0)` and a zero default both disable the deadline.
    pub fn resolve_timeout(&self, requested_secs: Option<u64>) -> Option<Duration> {
        let secs = requested_secs.unwrap_or(self.settings.default_timeout_secs);
        if secs == 0 {
            return None;
        }
        let max = self.settings.max_timeout_secs;
        let secs = if max > 0 { secs.min(max) } else { secs };
        Some(Duration::from_secs(secs))
    }

    /// Run a command to completion, timeout or abort.
    ///
    /// With `request.stream` set, `on_output` receives a preview at most
    /// every [`PREVIEW_INTERVAL`]; preview sizes never go down. Only
    /// input-level problems are errors: a set abort signal before spawn, a
    /// duplicate call id, or a failure to create the pipe. A shell that
    /// cannot be started is reported as [`Termination::SpawnFailed`].
    pub async fn run<F>(
        &self,
        request: ExecRequest<'_>,
        signal: &AbortSignal,
        mut on_output: F,
    ) -> Result<ExecOutcome, ToolError>
    where
        F: FnMut(&RenderedOutput) + Send,
    {
        if signal.is_set() {
            return Err(ToolError::Aborted);
        }
        let _active = self.register(request.call_id)?;

        let (reader, writer) = std::io::pipe()?;
        let stderr_writer = writer.try_clone()?;

        let mut cmd = Command::new(&self.settings.shell);
        let _ = cmd
            .arg("-c")
            .arg(request.command)
            .current_dir(request.cwd)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer)
            .process_group(0)
            .kill_on_drop(true);

        let start = Instant::now();
        let spawned = cmd.spawn();
        // Closes the parent's copies of the write end so EOF is observable.
        drop(cmd);

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(call_id = %request.call_id, shell = %self.settings.shell, error = %e, "failed to spawn command");
                counter!("exec_commands_total", "outcome" => "spawn_error").increment(1);
                return Ok(ExecOutcome {
                    termination: Termination::SpawnFailed(e.to_string()),
                    output: RenderedOutput::default(),
                    duration: start.elapsed(),
                });
            }
        };
        let mut group = ProcessGroup::of(&child);
        debug!(call_id = %request.call_id, pid = ?group.id(), command = request.command, "spawned command");

        let mut rx = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
        let mut output = OutputAccumulator::new(request.call_id.as_str(), self.output_limits());
        let mut buf = vec![0u8; READ_CHUNK];
        let mut eof = false;
        let mut last_len = 0usize;
        let mut last_preview: Option<Instant> = None;

        let deadline = async {
            match request.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let termination = loop {
            tokio::select! {
                biased;
                () = signal.aborted() => break Termination::Aborted,
                () = &mut deadline => {
                    break Termination::TimedOut(request.timeout.unwrap_or_default());
                }
                read = rx.read(&mut buf), if !eof => match read {
                    Ok(0) => eof = true,
                    Ok(n) => {
                        output.push(&buf[..n]).await;
                        if request.stream
                            && last_preview.is_none_or(|at| at.elapsed() >= PREVIEW_INTERVAL)
                        {
                            last_preview = Some(Instant::now());
                            let preview = output.preview();
                            if preview.text.len() >= last_len {
                                last_len = preview.text.len();
                                on_output(&preview);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(call_id = %request.call_id, error = %e, "output pipe read failed");
                        eof = true;
                    }
                },
                status = child.wait() => break Termination::Exited(exit_code(status?)),
            }
        };

        group.kill();
        if !eof {
            self.drain(&mut rx, &mut buf, &mut output).await;
        }
        reap(&mut child, self.drain_grace()).await;
        output.finish().await;

        let duration = start.elapsed();
        match &termination {
            Termination::TimedOut(_) => {
                warn!(call_id = %request.call_id, command = request.command, "command timed out");
            }
            Termination::Aborted => debug!(call_id = %request.call_id, "command aborted"),
            _ => {
                debug!(call_id = %request.call_id, outcome = termination.label(), duration_ms = duration.as_millis(), "command finished");
            }
        }
        counter!("exec_commands_total", "outcome" => termination.label()).increment(1);
        histogram!("exec_duration_seconds").record(duration.as_secs_f64());

        Ok(ExecOutcome {
            termination,
            output: output.render(),
            duration,
        })
    }

    fn register(&self, call_id: &ToolCallId) -> Result<ActiveCall, ToolError> {
        match self.active.entry(call_id.clone()) {
            Entry::Occupied(_) => Err(ToolError::DuplicateCall {
                call_id: call_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                let _ = slot.insert(());
                Ok(ActiveCall {
                    active: Arc::clone(&self.active),
                    call_id: call_id.clone(),
                })
            }
        }
    }

    fn output_limits(&self) -> OutputLimits {
        OutputLimits {
            max_lines: self.settings.max_lines,
            max_line_bytes: self.settings.max_line_bytes,
            spill_dir: self.settings.spill_enabled.then(|| self.settings.spill_dir()),
        }
    }

    fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.settings.drain_grace_ms)
    }

    /// Read what is left in the pipe until EOF or the grace period ends.
    async fn drain(&self, rx: &mut pipe::Receiver, buf: &mut [u8], output: &mut OutputAccumulator) {
        let until = tokio::time::Instant::now() + self.drain_grace();
        loop {
            match tokio::time::timeout_at(until, rx.read(buf)).await {
                Ok(Ok(n)) if n > 0 => output.push(&buf[..n]).await,
                Ok(Ok(_) | Err(_)) => break,
                Err(_) => {
                    debug!("output pipe still open after drain grace");
                    break;
                }
            }
        }
    }
}

/// Wait briefly for the killed leader so it does not linger as a zombie.
/// Anything left is reaped by tokio once `kill_on_drop` fires.
async fn reap(child: &mut Child, grace: Duration) {
    let _ = child.start_kill();
    let _ = tokio::time::timeout(grace, child.wait()).await;
}

/// Exit code, mapping a signal death to `128 + signal` as shells do.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}
