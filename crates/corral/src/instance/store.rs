//! Instance record store.

use std::path::PathBuf;

use corral_common::{ContainerId, CorralError, CorralPaths, CorralResult};

use super::{InstanceFile, InstanceRecord};

/// Locates instance records of one user.
#[derive(Debug, Clone)]
pub struct InstanceStore {
    /// Root-owned records.
    privileged_dir: PathBuf,
    /// Records owned by the user.
    user_dir: PathBuf,
}

impl InstanceStore {
    /// Create a store over explicit directories.
    pub fn new(privileged_dir: impl Into<PathBuf>, user_dir: impl Into<PathBuf>) -> Self {
        Self {
            privileged_dir: privileged_dir.into(),
            user_dir: user_dir.into(),
        }
    }

    /// The store for `user` under the standard paths.
    #[must_use]
    pub fn for_user(paths: &CorralPaths, user: &str) -> Self {
        Self::new(paths.privileged_instances(user), paths.user_instances(user))
    }

    /// Path of the record for `name`.
    #[must_use]
    pub fn record_path(&self, name: &ContainerId, privileged: bool) -> PathBuf {
        let base = if privileged {
            &self.privileged_dir
        } else {
            &self.user_dir
        };
        base.join(name.as_str()).join(format!("{name}.json"))
    }

    /// Reserve a record for a new instance. Nothing is written yet.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid name, or
    /// [`CorralError::InstanceExists`] if a record is already present.
    pub fn add(&self, name: &str, privileged: bool) -> CorralResult<InstanceFile> {
        let id = ContainerId::new(name)?;
        let path = self.record_path(&id, privileged);

        if path.exists() {
            return Err(CorralError::InstanceExists {
                name: name.to_string(),
            });
        }

        Ok(InstanceFile::new(path, InstanceRecord::new(name, privileged)))
    }

    /// Read a stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or unreadable.
    pub fn load(&self, name: &str, privileged: bool) -> CorralResult<InstanceRecord> {
        let id = ContainerId::new(name)?;
        let path = self.record_path(&id, privileged);

        let json = std::fs::read_to_string(&path)?;
        let record: InstanceRecord = serde_json::from_str(&json)?;

        tracing::debug!(instance = %name, path = %path.display(), "Loaded instance record");

        Ok(record)
    }
}
