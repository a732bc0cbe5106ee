//! Signal-level helpers for hypervisor processes.

use tracing::debug;

/// Send SIGTERM to `pid`. Returns false when the signal cannot be
/// delivered, typically because the process is already gone.
pub(crate) fn terminate(pid: u32) -> bool {
    debug!(pid, "Sending SIGTERM");
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

/// Send SIGKILL to `pid`.
pub(crate) fn kill(pid: u32) -> bool {
    debug!(pid, "Sending SIGKILL");
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) == 0 }
}
