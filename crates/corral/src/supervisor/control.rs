//! Process-table operations used by the supervisor.

#![allow(unsafe_code)]

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// What the supervisor needs from the process table.
pub trait ProcessControl {
    /// Reap one terminated descendant without blocking.
    ///
    /// Returns the reaped pid and its wait status, or `None` when nothing is
    /// pending.
    fn reap_one(&self) -> Option<(u32, ExitStatus)>;

    /// Send `signal` to every process the caller may signal.
    ///
    /// # Errors
    ///
    /// Returns the OS error, `ESRCH` when no process is left.
    fn signal_all(&self, signal: i32) -> io::Result<()>;

    /// Terminate the calling process with `SIGKILL`.
    fn kill_self(&self);
}

impl<T: ProcessControl + ?Sized> ProcessControl for &T {
    fn reap_one(&self) -> Option<(u32, ExitStatus)> {
        (**self).reap_one()
    }

    fn signal_all(&self, signal: i32) -> io::Result<()> {
        (**self).signal_all(signal)
    }

    fn kill_self(&self) {
        (**self).kill_self();
    }
}

/// The real process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemControl;

impl ProcessControl for SystemControl {
    fn reap_one(&self) -> Option<(u32, ExitStatus)> {
        let mut status: libc::c_int = 0;
        // SAFETY: `status` is a valid out pointer.
        let reaped = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        let pid = u32::try_from(reaped).ok().filter(|&pid| pid != 0)?;
        Some((pid, ExitStatus::from_raw(status)))
    }

    fn signal_all(&self, signal: i32) -> io::Result<()> {
        // SAFETY: kill takes plain integers.
        if unsafe { libc::kill(-1, signal) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn kill_self(&self) {
        // SAFETY: kill and getpid take plain integers.
        unsafe {
            libc::kill(libc::getpid(), libc::SIGKILL);
        }
    }
}

/// Reap every terminated descendant, the container process included.
///
/// Returns each reaped pid with its wait status, in reaping order.
pub fn drain_zombies<C: ProcessControl + ?Sized>(control: &C) -> Vec<(u32, ExitStatus)> {
    let mut reaped = Vec::new();
    while let Some((pid, status)) = control.reap_one() {
        tracing::debug!(pid, %status, "Reaped zombie process");
        reaped.push((pid, status));
    }
    reaped
}
