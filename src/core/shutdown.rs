//! # OS signals: observing interrupts and asking children to stop.
//!
//! - [`wait_for_shutdown_signal`] completes when this process is asked to stop.
//! - [`request_terminate`] asks a child process to stop gracefully.
//!
//! ## Signals observed
//! **Unix:** `SIGINT` (Ctrl-C), `SIGTERM` (systemd, Kubernetes), `SIGQUIT`.
//! **Other platforms:** Ctrl-C via [`tokio::signal::ctrl_c`].

/// Waits for a termination signal.
///
/// Returns `Err` if the listeners cannot be installed.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Result of [`request_terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The request was delivered.
    Sent,
    /// The process is already gone.
    NotRunning,
    /// The platform has no graceful stop request; the caller should kill.
    Unsupported,
}

/// Sends `SIGTERM` to `pid`.
#[cfg(unix)]
pub fn request_terminate(pid: u32) -> std::io::Result<TerminateOutcome> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(TerminateOutcome::NotRunning);
        }
        return Err(err);
    }
    Ok(TerminateOutcome::Sent)
}

/// Graceful termination is not available; callers fall back to a kill.
#[cfg(not(unix))]
pub fn request_terminate(_pid: u32) -> std::io::Result<TerminateOutcome> {
    Ok(TerminateOutcome::Unsupported)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminate_reaches_a_child_process() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        assert_eq!(request_terminate(pid).unwrap(), TerminateOutcome::Sent);
        let status = child.wait().await.unwrap();
        assert!(status.code().is_none());
    }
}
