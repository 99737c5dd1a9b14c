//! Linux capability sets from the OCI process section.

use caps::{CapSet, Capability, CapsHashSet};
use corral_common::{CorralError, CorralResult};
use corral_oci::runtime::Capabilities;

/// Capability sets the container process will hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityPlan {
    /// Bounding set; everything else is dropped from it.
    pub bounding: CapsHashSet,
    /// Effective set.
    pub effective: CapsHashSet,
    /// Inheritable set.
    pub inheritable: CapsHashSet,
    /// Permitted set.
    pub permitted: CapsHashSet,
    /// Ambient set.
    pub ambient: CapsHashSet,
}

impl CapabilityPlan {
    /// Translate OCI capability names into a plan.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::SecurityPolicy`] for an unknown capability name.
    pub fn from_oci(caps: &Capabilities) -> CorralResult<Self> {
        Ok(Self {
            bounding: parse_set(&caps.bounding)?,
            effective: parse_set(&caps.effective)?,
            inheritable: parse_set(&caps.inheritable)?,
            permitted: parse_set(&caps.permitted)?,
            ambient: parse_set(&caps.ambient)?,
        })
    }

    /// Apply the plan to the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the effective, inheritable or permitted set cannot
    /// be set. Bounding and ambient failures are only logged.
    pub fn apply(&self) -> CorralResult<()> {
        tracing::debug!("Applying capability sets");

        for cap in caps::all()
            .into_iter()
            .filter(|cap| !self.bounding.contains(cap))
        {
            if let Err(e) = caps::drop(None, CapSet::Bounding, cap) {
                tracing::warn!(capability = %cap, error = %e, "Failed to drop bounding capability");
            }
        }

        // Inheritable additions need the capability still permitted.
        for (set, wanted, name) in [
            (CapSet::Effective, &self.effective, "effective"),
            (CapSet::Inheritable, &self.inheritable, "inheritable"),
            (CapSet::Permitted, &self.permitted, "permitted"),
        ] {
            caps::set(None, set, wanted).map_err(|e| CorralError::SecurityPolicy {
                message: format!("failed to set {name} capabilities: {e}"),
            })?;
        }

        if let Err(e) = caps::set(None, CapSet::Ambient, &self.ambient) {
            tracing::warn!(error = %e, "Failed to set ambient capabilities");
        }

        Ok(())
    }
}

/// Look up a capability by name; the `CAP_` prefix and case are optional.
#[must_use]
pub fn parse_capability(name: &str) -> Option<Capability> {
    let upper = name.trim().to_ascii_uppercase();
    let wanted = if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{upper}")
    };
    caps::all().into_iter().find(|cap| cap.to_string() == wanted)
}

fn parse_set(names: &[String]) -> CorralResult<CapsHashSet> {
    names
        .iter()
        .map(|name| {
            parse_capability(name).ok_or_else(|| CorralError::SecurityPolicy {
                message: format!("unknown capability {name}"),
            })
        })
        .collect()
}
