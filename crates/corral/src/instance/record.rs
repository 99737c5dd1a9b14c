//! Persisted instance records.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use corral_common::CorralResult;
use serde::{Deserialize, Serialize};

/// What is known about one running instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Instance name (the container id).
    pub name: String,
    /// Login name of the owner.
    pub user: String,
    /// Pid of the container process.
    pub pid: u32,
    /// Pid of the launcher that registered it.
    pub ppid: u32,
    /// Whether the record lives in the root-owned tree.
    pub privileged: bool,
    /// Image the instance runs from.
    pub image: PathBuf,
    /// The full engine configuration of the launch.
    pub config: serde_json::Value,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl InstanceRecord {
    /// A fresh record with only the name and privilege mode set.
    #[must_use]
    pub fn new(name: impl Into<String>, privileged: bool) -> Self {
        Self {
            name: name.into(),
            user: String::new(),
            pid: 0,
            ppid: 0,
            privileged,
            image: PathBuf::new(),
            config: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }
}

/// An instance record bound to its location on disk.
#[derive(Debug, Clone)]
pub struct InstanceFile {
    path: PathBuf,
    /// The record to persist.
    pub record: InstanceRecord,
}

impl InstanceFile {
    pub(crate) const fn new(path: PathBuf, record: InstanceRecord) -> Self {
        Self { path, record }
    }

    /// Where the record is stored.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the record, replacing any previous content atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub fn update(&self) -> CorralResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&self.record)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::debug!(
            instance = %self.record.name,
            path = %self.path.display(),
            "Saved instance record"
        );

        Ok(())
    }
}
