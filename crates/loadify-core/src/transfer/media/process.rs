//! Child process control for the extractor.

use std::process::Child;

/// Stops the child in place while the item is paused.
#[cfg(unix)]
pub(super) fn suspend(child: &Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet.
    let rc = unsafe { libc::kill(pid, libc::SIGSTOP) };
    if rc != 0 {
        tracing::warn!(pid, "SIGSTOP failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
pub(super) fn suspend(_child: &Child) {}

/// Kills and reaps the child. Works on a stopped child too.
pub(super) fn terminate(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("kill extractor: {}", e);
    }
    let _ = child.wait();
}
