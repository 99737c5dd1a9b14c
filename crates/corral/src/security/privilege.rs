//! Temporary root identity for privileged bookkeeping.
//!
//! The launcher may run setuid root with an unprivileged real identity. To
//! write state under root-owned directories it swaps its real and saved ids
//! with root for the duration of one operation, then swaps back. Escalation
//! raises the uid first and the gid second; release runs in the reverse order
//! so the gid is dropped while root can still change it.

use std::io;

use corral_common::{CorralError, CorralResult};

/// Raw identity switching, `setresuid(2)` and `setresgid(2)`.
pub trait IdentityOps {
    /// Set real, effective and saved user ids.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the kernel refuses the change.
    fn set_res_uid(&self, real: u32, effective: u32, saved: u32) -> io::Result<()>;

    /// Set real, effective and saved group ids.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the kernel refuses the change.
    fn set_res_gid(&self, real: u32, effective: u32, saved: u32) -> io::Result<()>;
}

/// The real identity switch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdentityOps for SystemIdentity {
    fn set_res_uid(&self, real: u32, effective: u32, saved: u32) -> io::Result<()> {
        // SAFETY: setresuid takes plain integers.
        if unsafe { libc::setresuid(real, effective, saved) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn set_res_gid(&self, real: u32, effective: u32, saved: u32) -> io::Result<()> {
        // SAFETY: setresgid takes plain integers.
        if unsafe { libc::setresgid(real, effective, saved) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Real user and group id of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    /// Real user id.
    pub uid: u32,
    /// Real group id.
    pub gid: u32,
}

impl Credentials {
    /// The calling process's real ids.
    #[must_use]
    pub fn current() -> Self {
        Self {
            uid: rustix::process::getuid().as_raw(),
            gid: rustix::process::getgid().as_raw(),
        }
    }
}

/// A root identity held for one scoped operation.
///
/// Call [`release`](Self::release) to drop back and observe failures. A guard
/// dropped while still elevated restores on its own, and aborts the process
/// when it cannot.
#[must_use = "the elevated identity is released when the guard is dropped"]
pub struct ElevatedIdentity<'a> {
    ops: &'a dyn IdentityOps,
    original: Credentials,
    uid_raised: bool,
    gid_raised: bool,
}

impl<'a> ElevatedIdentity<'a> {
    /// Swap the real and saved ids with root.
    ///
    /// If raising the gid fails, the uid is put back before returning.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::PrivilegeEscalation`] naming the failed step, or
    /// [`CorralError::PrivilegeRestore`] if undoing a partial escalation fails.
    pub fn acquire(ops: &'a dyn IdentityOps, original: Credentials) -> CorralResult<Self> {
        let mut guard = Self {
            ops,
            original,
            uid_raised: false,
            gid_raised: false,
        };

        ops.set_res_uid(0, 0, original.uid)
            .map_err(|source| CorralError::PrivilegeEscalation { step: "uid", source })?;
        guard.uid_raised = true;

        if let Err(source) = ops.set_res_gid(0, 0, original.gid) {
            guard.release()?;
            return Err(CorralError::PrivilegeEscalation { step: "gid", source });
        }
        guard.gid_raised = true;

        tracing::debug!(uid = original.uid, gid = original.gid, "Identity elevated");
        Ok(guard)
    }

    /// Drop back to the original identity.
    ///
    /// Both ids are put back even when the first step fails. On failure the
    /// caller owns the outcome: the guard does not retry, and a
    /// [`CorralError::is_privilege_leak`] error must end the process.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::PrivilegeRestore`] naming the first failed step.
    pub fn release(mut self) -> CorralResult<()> {
        let result = self.restore();
        self.uid_raised = false;
        self.gid_raised = false;
        result
    }

    fn restore(&mut self) -> CorralResult<()> {
        let Credentials { uid, gid } = self.original;
        let mut first_error = None;

        if self.gid_raised {
            match self.ops.set_res_gid(gid, gid, 0) {
                Ok(()) => self.gid_raised = false,
                Err(source) => {
                    first_error = Some(CorralError::PrivilegeRestore { step: "gid", source });
                }
            }
        }

        // Attempted regardless of the gid step.
        if self.uid_raised {
            match self.ops.set_res_uid(uid, uid, 0) {
                Ok(()) => self.uid_raised = false,
                Err(source) if first_error.is_none() => {
                    first_error = Some(CorralError::PrivilegeRestore { step: "uid", source });
                }
                Err(source) => {
                    tracing::error!(error = %source, "Failed to restore uid privileges");
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                tracing::debug!(uid, gid, "Identity restored");
                Ok(())
            }
        }
    }
}

impl Drop for ElevatedIdentity<'_> {
    fn drop(&mut self) {
        if !self.uid_raised && !self.gid_raised {
            return;
        }
        if let Err(e) = self.restore() {
            tracing::error!(error = %e, "Cannot drop elevated identity, aborting");
            std::process::abort();
        }
    }
}

/// Run `operation` as root, then drop back before returning its result.
///
/// A failure to drop back wins over the operation's own error.
///
/// # Errors
///
/// Returns escalation and restore failures, or the operation's error.
pub fn with_elevated_identity<T>(
    ops: &dyn IdentityOps,
    original: Credentials,
    operation: impl FnOnce() -> CorralResult<T>,
) -> CorralResult<T> {
    let guard = ElevatedIdentity::acquire(ops, original)?;
    let result = operation();
    guard.release()?;
    result
}
