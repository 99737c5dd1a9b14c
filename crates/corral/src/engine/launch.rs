//! Launch orchestration: environment setup, then replace or supervise.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use corral_common::{CorralPaths, CorralResult};

use super::{EngineConfig, LaunchSpec, LaunchStrategy};
use crate::exec::{
    CONSOLE_PATH, EntryPointResolver, close_inherited, exec_in_place, reopen_console_on_ttys,
    resolver::effective_search_path,
};
use crate::instance::Registrar;
use crate::security::{IdentityOps, ProcessSecurity, SecurityPolicy, SystemIdentity};
use crate::supervisor;
use crate::user::{PasswdLookup, UserLookup};

/// Starts one container process and registers it when it is an instance.
pub struct Engine {
    config: EngineConfig,
    paths: CorralPaths,
    resolver_root: PathBuf,
    security: Box<dyn SecurityPolicy>,
    users: Box<dyn UserLookup>,
    identity: Box<dyn IdentityOps>,
}

impl Engine {
    /// Create an engine backed by the real system collaborators.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            paths: CorralPaths::default(),
            resolver_root: PathBuf::from("/"),
            security: Box::new(ProcessSecurity),
            users: Box::new(PasswdLookup),
            identity: Box::new(SystemIdentity),
        }
    }

    /// Use another state tree for instance records.
    #[must_use]
    pub fn with_paths(mut self, paths: CorralPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Resolve entry points under another filesystem root.
    #[must_use]
    pub fn with_resolver_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resolver_root = root.into();
        self
    }

    /// Replace the security policy.
    #[must_use]
    pub fn with_security(mut self, security: impl SecurityPolicy + 'static) -> Self {
        self.security = Box::new(security);
        self
    }

    /// Replace the user database.
    #[must_use]
    pub fn with_users(mut self, users: impl UserLookup + 'static) -> Self {
        self.users = Box::new(users);
        self
    }

    /// Replace the identity switcher used for privileged registration.
    #[must_use]
    pub fn with_identity(mut self, identity: impl IdentityOps + 'static) -> Self {
        self.identity = Box::new(identity);
        self
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build the launch specification with its entry point resolved.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unusable spec, or an entry point
    /// error when nothing runnable is found.
    pub fn resolve_launch(&self) -> CorralResult<LaunchSpec> {
        let mut launch = LaunchSpec::from_config(&self.config)?;
        let resolver = EntryPointResolver::new(self.config.shell.as_deref())
            .with_root(&self.resolver_root);
        let search_path = effective_search_path(launch.search_path());

        resolver
            .resolve(&launch.args, &search_path)?
            .apply(&mut launch.args);

        Ok(launch)
    }

    /// Prepare the process environment and start the container process.
    ///
    /// A supervised instance is registered as soon as its process exists,
    /// with the supervisor recorded as its parent.
    ///
    /// Returns the exit code the launcher must terminate with when it stays
    /// behind as a supervisor. When the launcher is replaced this only returns
    /// on failure.
    ///
    /// # Errors
    ///
    /// Returns the first setup failure: entry point resolution, descriptor
    /// cleanup, security policy, exec/spawn, or registration of a supervised
    /// instance.
    pub async fn start_process(&self, channel: Option<UnixStream>) -> CorralResult<i32> {
        let process = self.config.spec.require_process()?;
        enter_working_directory(&process.cwd, &self.config.home_dest);

        let launch = self.resolve_launch()?;

        if self.config.wants_console() {
            let replaced = reopen_console_on_ttys(Path::new(CONSOLE_PATH));
            tracing::debug!(replaced, "Console fixup done");
        }

        tracing::debug!(
            shim = launch.is_shim(),
            instance = launch.is_instance,
            "Determined init role"
        );

        close_inherited(&self.config.image_list, &self.config.open_fds)?;

        self.security.configure(&self.config.spec)?;

        match launch.strategy() {
            LaunchStrategy::Replace => Err(exec_in_place(&launch)),
            LaunchStrategy::Supervise => {
                supervisor::supervise(&launch, channel, |pid| self.post_start_process(pid)).await
            }
        }
    }

    /// Register a started instance parented by the calling process; a no-op
    /// for plain launches.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written or the identity switch
    /// fails.
    pub fn post_start_process(&self, pid: u32) -> CorralResult<()> {
        self.register_instance(pid, std::process::id())
    }

    /// Register a started instance whose container process `pid` is parented
    /// by `ppid`; a no-op for plain launches.
    ///
    /// Aborts the process if the temporary root identity cannot be dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written or the identity switch
    /// fails.
    pub fn register_instance(&self, pid: u32, ppid: u32) -> CorralResult<()> {
        if !self.config.instance {
            return Ok(());
        }

        let result = Registrar::new(
            &self.config,
            &self.paths,
            self.users.as_ref(),
            self.identity.as_ref(),
        )
        .with_ppid(ppid)
        .register(pid);

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_privilege_leak() => {
                tracing::error!(error = %e, "Elevated identity could not be dropped, aborting");
                std::process::abort();
            }
            Err(e) => Err(e),
        }
    }
}

/// Enter `cwd`, else `home`, else `/`. Returns the directory entered.
pub fn enter_working_directory(cwd: &Path, home: &Path) -> PathBuf {
    for dir in [cwd, home] {
        match std::env::set_current_dir(dir) {
            Ok(()) => return dir.to_path_buf(),
            Err(e) => tracing::debug!(dir = %dir.display(), error = %e, "Cannot enter directory"),
        }
    }

    let root = PathBuf::from("/");
    if let Err(e) = std::env::set_current_dir(&root) {
        tracing::warn!(error = %e, "Cannot enter /");
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Action;
    use crate::security::Credentials;
    use crate::security::privilege::tests::{IdCall, RecordingIdentity};
    use corral_common::CorralError;
    use corral_oci::Spec;
    use corral_oci::runtime::Process;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::process::ExitStatusExt;

    fn install(root: &Path, path: &str) {
        let full = root.join(path.trim_start_matches('/'));
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(&full, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&full, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn engine(root: &Path, args: &[&str]) -> Engine {
        let config = EngineConfig {
            spec: Spec {
                process: Some(Process {
                    args: args.iter().map(ToString::to_string).collect(),
                    env: vec!["PATH=/bin:/usr/bin".to_string()],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..EngineConfig::default()
        };
        Engine::new(config).with_resolver_root(root)
    }

    #[test]
    fn shell_action_falls_back_to_bash() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "/bin/bash");

        let mut engine = engine(dir.path(), &[Action::Shell.path()]);
        engine.config.shell = Some("/bin/bash".to_string());

        let launch = engine.resolve_launch().unwrap();
        assert_eq!(launch.args, vec!["/bin/bash".to_string()]);
        assert_eq!(launch.strategy(), LaunchStrategy::Replace);
    }

    #[test]
    fn unresolvable_entry_point_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = engine(dir.path(), &["/opt/missing"])
            .resolve_launch()
            .unwrap_err();
        assert!(matches!(err, CorralError::EntryPoint { .. }));
    }

    #[test]
    fn post_start_is_a_noop_for_plain_launches() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), &["/bin/sh"]).with_paths(CorralPaths::with_root(dir.path()));
        engine.post_start_process(42).unwrap();
        assert!(!dir.path().join("user").exists());
    }

    struct NamedUser;

    impl UserLookup for NamedUser {
        fn user_name(&self, _uid: u32) -> CorralResult<String> {
            Ok("alice".to_string())
        }
    }

    #[test]
    fn identity_leak_aborts_the_launcher() {
        if std::env::var_os("CORRAL_TEST_LEAK").is_some() {
            let dir = tempfile::tempdir().unwrap();
            let gid = Credentials::current().gid;
            let mut engine = engine(dir.path(), &["/bin/sh"])
                .with_paths(CorralPaths::with_root(dir.path()))
                .with_users(NamedUser)
                .with_identity(RecordingIdentity::failing(vec![IdCall::Gid(gid, gid, 0)]));
            engine.config.instance = true;

            let result = engine.register_instance(42, 1);
            panic!("registration returned instead of aborting: {result:?}");
        }

        let status = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "--exact",
                "engine::launch::tests::identity_leak_aborts_the_launcher",
                "--nocapture",
            ])
            .env("CORRAL_TEST_LEAK", "1")
            .status()
            .unwrap();

        assert_eq!(status.signal(), Some(libc::SIGABRT));
    }
}
