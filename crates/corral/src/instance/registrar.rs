//! Registration of a started instance.

use std::path::PathBuf;

use corral_common::{CorralPaths, CorralResult};
use corral_oci::NamespaceType;

use super::InstanceStore;
use crate::engine::EngineConfig;
use crate::security::{Credentials, IdentityOps, with_elevated_identity};
use crate::user::UserLookup;

/// Writes the instance record for a launch.
pub struct Registrar<'a> {
    config: &'a EngineConfig,
    paths: &'a CorralPaths,
    users: &'a dyn UserLookup,
    identity: &'a dyn IdentityOps,
    credentials: Credentials,
    ppid: u32,
}

impl<'a> Registrar<'a> {
    /// A registrar acting for the calling user.
    #[must_use]
    pub fn new(
        config: &'a EngineConfig,
        paths: &'a CorralPaths,
        users: &'a dyn UserLookup,
        identity: &'a dyn IdentityOps,
    ) -> Self {
        Self {
            config,
            paths,
            users,
            identity,
            credentials: Credentials::current(),
            ppid: std::process::id(),
        }
    }

    /// Act for another user identity.
    #[must_use]
    pub const fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Record `ppid` as the parent of the container process instead of the
    /// calling process.
    #[must_use]
    pub const fn with_ppid(mut self, ppid: u32) -> Self {
        self.ppid = ppid;
        self
    }

    /// Record the instance whose container process is `pid`.
    ///
    /// Without a user namespace the record goes to the root-owned tree and is
    /// written with a temporary root identity, which is always dropped before
    /// a write error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the working directory cannot be reset, the user is
    /// unknown, the instance exists, the write fails, or the identity switch
    /// fails.
    pub fn register(&self, pid: u32) -> CorralResult<PathBuf> {
        std::env::set_current_dir("/")?;

        let privileged = !self.config.spec.has_namespace(NamespaceType::User);
        let user = self.users.user_name(self.credentials.uid)?;
        let store = InstanceStore::for_user(self.paths, &user);

        let mut file = store.add(&self.config.container_id, privileged)?;
        file.record.config = serde_json::to_value(self.config)?;
        file.record.user = user;
        file.record.pid = pid;
        file.record.ppid = self.ppid;
        file.record.image.clone_from(&self.config.image);

        if privileged {
            with_elevated_identity(self.identity, self.credentials, || file.update())?;
        } else {
            file.update()?;
        }

        tracing::info!(
            instance = %file.record.name,
            pid,
            ppid = self.ppid,
            privileged,
            path = %file.path().display(),
            "Registered instance"
        );

        Ok(file.path().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::privilege::tests::{IdCall, RecordingIdentity};
    use corral_common::CorralError;
    use corral_oci::runtime::{Linux, Namespace};
    use std::path::Path;

    struct FixedUser;

    impl UserLookup for FixedUser {
        fn user_name(&self, _uid: u32) -> CorralResult<String> {
            Ok("alice".to_string())
        }
    }

    const ALICE: Credentials = Credentials {
        uid: 1000,
        gid: 1000,
    };

    fn config(user_namespace: bool) -> EngineConfig {
        let mut config = EngineConfig {
            container_id: "web".to_string(),
            instance: true,
            image: PathBuf::from("/images/web.sif"),
            ..EngineConfig::default()
        };
        if user_namespace {
            config.spec.linux = Some(Linux {
                namespaces: vec![Namespace::new(NamespaceType::User)],
            });
        }
        config
    }

    fn register(
        config: &EngineConfig,
        root: &Path,
        identity: &RecordingIdentity,
    ) -> CorralResult<PathBuf> {
        let paths = CorralPaths::with_root(root);
        Registrar::new(config, &paths, &FixedUser, identity)
            .with_credentials(ALICE)
            .register(77)
    }

    #[test]
    fn unprivileged_record_is_written_without_escalation() {
        let temp = tempfile::tempdir().unwrap();
        let identity = RecordingIdentity::default();

        let path = register(&config(true), temp.path(), &identity).unwrap();

        assert_eq!(path, temp.path().join("user/instances/alice/web/web.json"));
        assert!(identity.calls.borrow().is_empty());

        let paths = CorralPaths::with_root(temp.path());
        let record = InstanceStore::for_user(&paths, "alice")
            .load("web", false)
            .unwrap();
        assert_eq!(record.pid, 77);
        assert_eq!(record.ppid, std::process::id());
        assert_eq!(record.user, "alice");
        assert_eq!(record.image, PathBuf::from("/images/web.sif"));
        assert_eq!(record.config["containerId"], "web");
    }

    #[test]
    fn privileged_record_is_written_elevated() {
        let temp = tempfile::tempdir().unwrap();
        let identity = RecordingIdentity::default();

        let path = register(&config(false), temp.path(), &identity).unwrap();

        assert_eq!(path, temp.path().join("run/instances/alice/web/web.json"));
        assert_eq!(
            *identity.calls.borrow(),
            vec![
                IdCall::Uid(0, 0, 1000),
                IdCall::Gid(0, 0, 1000),
                IdCall::Gid(1000, 1000, 0),
                IdCall::Uid(1000, 1000, 0),
            ]
        );
    }

    #[test]
    fn write_failure_still_drops_privileges_first() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("not-a-dir");
        std::fs::write(&root, "").unwrap();
        let identity = RecordingIdentity::default();

        let err = register(&config(false), &root, &identity).unwrap_err();

        assert!(matches!(err, CorralError::Io(_)));
        assert_eq!(identity.calls.borrow().len(), 4);
        assert_eq!(
            identity.calls.borrow().last().copied(),
            Some(IdCall::Uid(1000, 1000, 0))
        );
    }

    #[test]
    fn escalation_failure_writes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let identity = RecordingIdentity::failing(vec![IdCall::Uid(0, 0, 1000)]);

        let err = register(&config(false), temp.path(), &identity).unwrap_err();

        assert!(matches!(err, CorralError::PrivilegeEscalation { .. }));
        assert!(!temp.path().join("run").exists());
    }

    #[test]
    fn explicit_parent_is_recorded() {
        let temp = tempfile::tempdir().unwrap();
        let paths = CorralPaths::with_root(temp.path());
        let identity = RecordingIdentity::default();

        Registrar::new(&config(true), &paths, &FixedUser, &identity)
            .with_credentials(ALICE)
            .with_ppid(4)
            .register(77)
            .unwrap();

        let record = InstanceStore::for_user(&paths, "alice")
            .load("web", false)
            .unwrap();
        assert_eq!((record.pid, record.ppid), (77, 4));
    }

    #[test]
    fn second_registration_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let identity = RecordingIdentity::default();

        register(&config(true), temp.path(), &identity).unwrap();
        let err = register(&config(true), temp.path(), &identity).unwrap_err();

        assert!(matches!(err, CorralError::InstanceExists { .. }));
    }
}
