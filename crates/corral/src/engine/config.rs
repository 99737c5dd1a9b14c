//! Engine configuration handed over by the parent launcher.

use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use corral_common::{CorralError, CorralResult};
use corral_oci::Spec;
use serde::{Deserialize, Serialize};

/// How much of `/dev` the container sees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountDev {
    /// Host `/dev` is not mounted.
    #[default]
    No,
    /// A minimal `/dev` with only the standard devices.
    Minimal,
    /// The host `/dev` is bind mounted.
    Yes,
}

/// An open image file inherited from the parent launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Path of the image on the host.
    pub path: PathBuf,
    /// Descriptor number in this process.
    pub fd: RawFd,
}

/// Everything the launcher needs to start one container process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Container identifier, used as the instance name.
    pub container_id: String,
    /// OCI runtime spec of the container.
    pub spec: Spec,
    /// Shell used by the shell and start actions.
    pub shell: Option<String>,
    /// Home directory inside the container.
    pub home_dest: PathBuf,
    /// `/dev` mount mode.
    pub mount_dev: MountDev,
    /// Whether the container is fully contained.
    pub contain: bool,
    /// Run as a detached instance.
    pub instance: bool,
    /// The instance boots a full system (its own init).
    pub boot_instance: bool,
    /// Join an already running instance.
    pub instance_join: bool,
    /// Never act as init, even in a PID namespace.
    pub no_init: bool,
    /// Image path recorded for instances.
    pub image: PathBuf,
    /// Image descriptors to close before launch.
    pub image_list: Vec<ImageDescriptor>,
    /// Other inherited descriptors to close before launch.
    pub open_fds: Vec<RawFd>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            container_id: String::new(),
            spec: Spec::default(),
            shell: None,
            home_dest: PathBuf::from("/"),
            mount_dev: MountDev::default(),
            contain: false,
            instance: false,
            boot_instance: false,
            instance_join: false,
            no_init: false,
            image: PathBuf::new(),
            image_list: Vec::new(),
            open_fds: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> CorralResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| CorralError::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let config: Self = serde_json::from_str(&json)?;

        tracing::debug!(
            path = %path.display(),
            container_id = %config.container_id,
            "Loaded engine configuration"
        );

        Ok(config)
    }

    /// Whether the console fixup applies to this launch.
    #[must_use]
    pub fn wants_console(&self) -> bool {
        self.mount_dev == MountDev::Minimal || self.contain
    }
}
