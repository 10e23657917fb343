//! Process-group ownership for spawned commands.
//!
//! Every command is spawned as the leader of a new process group. Killing
//! the group with `SIGKILL` takes its descendants down with it, including
//! anything a shell left running in the background.

use tokio::process::Child;
use tracing::debug;

/// Kills the whole process group on [`ProcessGroup::kill`] or on drop.
#[derive(Debug)]
pub struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    /// Track the group led by `child`. The child must have been spawned with
    /// `process_group(0)`.
    pub fn of(child: &Child) -> Self {
        Self {
            pgid: child.id().and_then(|pid| i32::try_from(pid).ok()),
        }
    }

    /// Group id, until the group has been killed.
    pub fn id(&self) -> Option<i32> {
        self.pgid
    }

    /// Send `SIGKILL` to every member. Later calls are no-ops.
    pub fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            match kill_group(pgid) {
                Ok(()) => debug!(pgid, "killed process group"),
                // ESRCH: every member already exited.
                Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {}
                Err(e) => debug!(pgid, error = %e, "failed to kill process group"),
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[allow(unsafe_code)]
fn kill_group(pgid: i32) -> std::io::Result<()> {
    // SAFETY: killpg only sends a signal; it has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
