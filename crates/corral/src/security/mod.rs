//! Security setup for the container process.
//!
//! - the security policy applied right before launch ([`SecurityPolicy`])
//! - Linux capability sets ([`CapabilityPlan`])
//! - temporary root identity for privileged bookkeeping ([`ElevatedIdentity`])

#![allow(unsafe_code)]

mod capabilities;
pub(crate) mod privilege;

pub use capabilities::{CapabilityPlan, parse_capability};
pub use privilege::{
    Credentials, ElevatedIdentity, IdentityOps, SystemIdentity, with_elevated_identity,
};

use corral_common::{CorralError, CorralResult};
use corral_oci::Spec;

/// Applies the container's security configuration to the current process.
pub trait SecurityPolicy {
    /// Configure the calling process according to `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if any part of the policy cannot be applied.
    fn configure(&self, spec: &Spec) -> CorralResult<()>;
}

/// Security policy backed by `prctl(2)` and the capability syscalls.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSecurity;

impl SecurityPolicy for ProcessSecurity {
    fn configure(&self, spec: &Spec) -> CorralResult<()> {
        let Some(process) = spec.process.as_ref() else {
            return Ok(());
        };

        // Set before the capability sets are reduced.
        if process.no_new_privileges {
            set_no_new_privs()?;
        }

        if let Some(caps) = &process.capabilities {
            CapabilityPlan::from_oci(caps)?.apply()?;
        }

        Ok(())
    }
}

/// Set the `no_new_privs` flag.
///
/// # Errors
///
/// Returns [`CorralError::SecurityPolicy`] if `prctl(2)` fails.
pub fn set_no_new_privs() -> CorralResult<()> {
    // SAFETY: PR_SET_NO_NEW_PRIVS takes only integer arguments.
    let result = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };

    if result != 0 {
        return Err(CorralError::SecurityPolicy {
            message: format!(
                "prctl(PR_SET_NO_NEW_PRIVS) failed: {}",
                std::io::Error::last_os_error()
            ),
        });
    }

    tracing::debug!("no_new_privs flag set");
    Ok(())
}
