//! Standard filesystem paths for Corral.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory for Corral data.
pub static CORRAL_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("CORRAL_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/corral"))
});

/// Default runtime directory, home of privileged instance records.
pub static CORRAL_RUNTIME_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("CORRAL_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/run/corral"))
});

/// Per-user state directory, home of unprivileged instance records.
pub static CORRAL_USER_STATE: Lazy<PathBuf> = Lazy::new(|| {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".corral")
});

/// Standard paths used by the launcher.
#[derive(Debug, Clone)]
pub struct CorralPaths {
    /// Root data directory (default: /var/lib/corral).
    pub root: PathBuf,
    /// Runtime directory (default: /run/corral).
    pub runtime: PathBuf,
    /// Per-user state directory (default: ~/.corral).
    pub user_state: PathBuf,
}

impl CorralPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with everything under a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let runtime = root.join("run");
        let user_state = root.join("user");
        Self {
            root,
            runtime,
            user_state,
        }
    }

    /// Instance records that require root to write, for one user.
    #[must_use]
    pub fn privileged_instances(&self, user: &str) -> PathBuf {
        self.runtime.join("instances").join(user)
    }

    /// Instance records owned by the user themselves.
    #[must_use]
    pub fn user_instances(&self, user: &str) -> PathBuf {
        self.user_state.join("instances").join(user)
    }
}

impl Default for CorralPaths {
    fn default() -> Self {
        Self {
            root: CORRAL_ROOT.clone(),
            runtime: CORRAL_RUNTIME_DIR.clone(),
            user_state: CORRAL_USER_STATE.clone(),
        }
    }
}
