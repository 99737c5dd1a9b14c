//! Launch specification and strategy selection.

use std::path::PathBuf;

use corral_common::{CorralError, CorralResult};
use corral_oci::NamespaceType;
use serde::Serialize;

use super::EngineConfig;

/// How the container process is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchStrategy {
    /// Exec the target in place of the launcher.
    Replace,
    /// Fork the target and stay behind as its init.
    Supervise,
}

impl LaunchStrategy {
    /// Pick the strategy for a launch.
    ///
    /// Non-instances without a surrogate init, full-system boots and joins
    /// into a running instance all replace the launcher; everything else is
    /// supervised.
    #[must_use]
    pub const fn select(
        is_instance: bool,
        boot_instance: bool,
        join_instance: bool,
        shim: bool,
    ) -> Self {
        if (!is_instance && !shim) || boot_instance || join_instance {
            Self::Replace
        } else {
            Self::Supervise
        }
    }
}

/// The resolved description of what to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Argument vector; `args[0]` is the executable.
    pub args: Vec<String>,
    /// Environment, `KEY=VALUE`.
    pub env: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// The container persists detached.
    pub is_instance: bool,
    /// The instance boots a full system.
    pub boot_instance: bool,
    /// Attaching to a running instance.
    pub join_instance: bool,
    /// Surrogate init disabled.
    pub no_init: bool,
    /// Running in a new PID namespace.
    pub has_pid_namespace: bool,
    /// Running in a user namespace.
    pub has_user_namespace: bool,
}

impl LaunchSpec {
    /// Build the launch specification from the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the spec has no process or an empty
    /// argument vector.
    pub fn from_config(config: &EngineConfig) -> CorralResult<Self> {
        let process = config.spec.require_process()?;
        if process.args.is_empty() {
            return Err(CorralError::Config {
                message: "container process has no arguments".to_string(),
            });
        }

        Ok(Self {
            args: process.args.clone(),
            env: process.env.clone(),
            cwd: process.cwd.clone(),
            is_instance: config.instance,
            boot_instance: config.instance && config.boot_instance,
            join_instance: config.instance_join,
            no_init: config.no_init,
            has_pid_namespace: config.spec.has_namespace(NamespaceType::Pid),
            has_user_namespace: config.spec.has_namespace(NamespaceType::User),
        })
    }

    /// The executable, `args[0]`.
    #[must_use]
    pub fn executable(&self) -> &str {
        self.args.first().map_or("", String::as_str)
    }

    /// Environment entries split into key and value; malformed entries are skipped.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter_map(|entry| entry.split_once('='))
    }

    /// `PATH` from the launch environment.
    #[must_use]
    pub fn search_path(&self) -> Option<&str> {
        self.env_pairs()
            .find(|(key, _)| *key == "PATH")
            .map(|(_, value)| value)
    }

    /// Whether the launcher must act as the namespace's init.
    #[must_use]
    pub const fn is_shim(&self) -> bool {
        self.has_pid_namespace && !self.no_init
    }

    /// The strategy for this launch.
    #[must_use]
    pub const fn strategy(&self) -> LaunchStrategy {
        LaunchStrategy::select(
            self.is_instance,
            self.boot_instance,
            self.join_instance,
            self.is_shim(),
        )
    }
}
