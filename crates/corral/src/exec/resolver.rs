//! Entry-point resolution.
//!
//! Images built for the singularity action layout ship their entry points as
//! scripts under `/.singularity.d/actions/`. Older or hand-built images may
//! lack them, so each action has a fallback chain. Everything here is a pure
//! lookup: the search path is passed in explicitly and no process-wide state
//! is read or written.

use std::path::{Path, PathBuf};

use corral_common::CorralError;
use miette::Diagnostic;
use thiserror::Error;

/// Shell used when the configuration does not name one.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Search path used when neither the container nor the launcher has `PATH`.
pub const DEFAULT_SEARCH_PATH: &str =
    "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

const EXEC_FALLBACK: &str = "/.exec";
const SHELL_FALLBACK: &str = "/.shell";
const RUN_FALLBACK: &str = "/.run";
const RUN_DRIVER: &str = "/singularity";
const TEST_FALLBACK: &str = "/.test";
const MISSING_START_SCRIPT: &str = r#"echo "instance start script not found""#;

/// Well-known convenience entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run a user-supplied program.
    Exec,
    /// Interactive shell.
    Shell,
    /// The image's runscript.
    Run,
    /// Instance start script.
    Start,
    /// The image's test script.
    Test,
}

impl Action {
    const ALL: [Self; 5] = [Self::Exec, Self::Shell, Self::Run, Self::Start, Self::Test];

    /// In-container path of the action script.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Exec => "/.singularity.d/actions/exec",
            Self::Shell => "/.singularity.d/actions/shell",
            Self::Run => "/.singularity.d/actions/run",
            Self::Start => "/.singularity.d/actions/start",
            Self::Test => "/.singularity.d/actions/test",
        }
    }

    /// The action whose script lives at `path`, if any.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.path() == path)
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// `args[0]` is runnable as given.
    Unchanged,
    /// The argument vector must be replaced.
    Substituted(Vec<String>),
}

impl Resolution {
    /// Apply the resolution to an argument vector.
    pub fn apply(self, args: &mut Vec<String>) {
        if let Self::Substituted(new_args) = self {
            *args = new_args;
        }
    }
}

/// Why an entry point could not be resolved.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The argument vector is empty.
    #[error("no command to run")]
    #[diagnostic(code(corral::exec::no_command))]
    EmptyArgs,

    /// Neither `/.exec` nor the requested program exist.
    #[error("no executable {program} found")]
    #[diagnostic(code(corral::exec::no_executable))]
    NoExecutable {
        /// The program the user asked for.
        program: String,
    },

    /// Neither `/.shell` nor the configured shell exist.
    #[error("no {shell} found inside container")]
    #[diagnostic(code(corral::exec::no_shell))]
    NoShell {
        /// The configured shell.
        shell: String,
    },

    /// No runscript driver exists.
    #[error("no run driver found inside container")]
    #[diagnostic(code(corral::exec::no_run_driver))]
    NoRunDriver,

    /// An instance cannot start without a shell.
    #[error("no {shell} found inside container, can't run instance")]
    #[diagnostic(code(corral::exec::no_start_shell))]
    NoStartShell {
        /// The configured shell.
        shell: String,
    },

    /// No test driver exists.
    #[error("no test driver found inside container")]
    #[diagnostic(code(corral::exec::no_test_driver))]
    NoTestDriver,

    /// `args[0]` is neither runnable nor a known action.
    #[error("no {path} found inside container")]
    #[diagnostic(code(corral::exec::not_found))]
    NotFound {
        /// The requested path.
        path: String,
    },
}

impl From<ResolveError> for CorralError {
    fn from(err: ResolveError) -> Self {
        Self::EntryPoint {
            message: err.to_string(),
        }
    }
}

/// Pick the search path for a launch: the container's own `PATH`, then the
/// launcher's, then [`DEFAULT_SEARCH_PATH`].
#[must_use]
pub fn effective_search_path(container_path: Option<&str>) -> String {
    container_path
        .map(str::to_owned)
        .or_else(|| std::env::var("PATH").ok())
        .unwrap_or_else(|| DEFAULT_SEARCH_PATH.to_string())
}

/// Resolves the executable a launch will actually run.
#[derive(Debug, Clone)]
pub struct EntryPointResolver {
    /// Filesystem root lookups are performed under.
    root: PathBuf,
    /// Configured shell.
    shell: String,
}

impl EntryPointResolver {
    /// Create a resolver for the container's own filesystem.
    #[must_use]
    pub fn new(shell: Option<&str>) -> Self {
        let shell = shell
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SHELL)
            .to_string();
        Self {
            root: PathBuf::from("/"),
            shell,
        }
    }

    /// Perform lookups under another root, reporting in-container paths.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.root = root.canonicalize().unwrap_or(root);
        self
    }

    /// The configured shell.
    #[must_use]
    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Resolve `args` against `search_path`.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] naming the missing program or driver.
    pub fn resolve(&self, args: &[String], search_path: &str) -> Result<Resolution, ResolveError> {
        let requested = args.first().ok_or(ResolveError::EmptyArgs)?;

        if self.lookup(requested, search_path).is_some() {
            return Ok(Resolution::Unchanged);
        }

        let Some(action) = Action::from_path(requested) else {
            return Err(ResolveError::NotFound {
                path: requested.clone(),
            });
        };

        tracing::debug!(action = action.path(), "action script missing, trying fallbacks");

        match action {
            Action::Exec => {
                if let Some(found) = self.lookup(EXEC_FALLBACK, search_path) {
                    return Ok(replace_first(args, found));
                }
                let program = args.get(1).ok_or_else(|| ResolveError::NoExecutable {
                    program: String::new(),
                })?;
                let found = self
                    .lookup(program, search_path)
                    .ok_or_else(|| ResolveError::NoExecutable {
                        program: program.clone(),
                    })?;
                tracing::warn!(
                    "container does not have {}, calling {} directly",
                    action.path(),
                    program
                );
                Ok(replace_first(&args[1..], found))
            }
            Action::Shell => {
                if let Some(found) = self.lookup(SHELL_FALLBACK, search_path) {
                    return Ok(replace_first(args, found));
                }
                let found =
                    self.lookup(&self.shell, search_path)
                        .ok_or_else(|| ResolveError::NoShell {
                            shell: self.shell.clone(),
                        })?;
                tracing::warn!(
                    "container does not have {}, calling {} directly",
                    action.path(),
                    self.shell
                );
                Ok(replace_first(args, found))
            }
            Action::Run => [RUN_FALLBACK, RUN_DRIVER]
                .into_iter()
                .find_map(|candidate| self.lookup(candidate, search_path))
                .map(|found| replace_first(args, found))
                .ok_or(ResolveError::NoRunDriver),
            Action::Start => {
                if self.lookup(&self.shell, search_path).is_none() {
                    return Err(ResolveError::NoStartShell {
                        shell: self.shell.clone(),
                    });
                }
                Ok(Resolution::Substituted(vec![
                    self.shell.clone(),
                    "-c".to_string(),
                    MISSING_START_SCRIPT.to_string(),
                ]))
            }
            Action::Test => self
                .lookup(TEST_FALLBACK, search_path)
                .map(|found| replace_first(args, found))
                .ok_or(ResolveError::NoTestDriver),
        }
    }

    /// Locate an executable, returning its in-container path.
    ///
    /// Names containing a `/` are checked directly; bare names are searched
    /// for in `search_path`.
    #[must_use]
    pub fn lookup(&self, name: &str, search_path: &str) -> Option<String> {
        if name.is_empty() {
            return None;
        }

        let found = if name.contains('/') {
            let candidate = self.host_path(Path::new(name));
            let cwd = std::env::current_dir().unwrap_or_else(|_| self.root.clone());
            which::which_in(candidate, None::<&str>, cwd).ok()?
        } else {
            let dirs = std::env::split_paths(search_path)
                .filter(|dir| !dir.as_os_str().is_empty())
                .map(|dir| self.host_path(&dir));
            let paths = std::env::join_paths(dirs).ok()?;
            which::which_in(name, Some(paths), &self.root).ok()?
        };

        self.container_path(&found)
    }

    fn host_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            self.root.join(path.strip_prefix("/").unwrap_or(path))
        } else if self.root == Path::new("/") {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn container_path(&self, found: &Path) -> Option<String> {
        let inside = match found.strip_prefix(&self.root) {
            Ok(rel) if self.root != Path::new("/") => Path::new("/").join(rel),
            _ => found.to_path_buf(),
        };
        inside.to_str().map(str::to_owned)
    }
}

fn replace_first(args: &[String], first: String) -> Resolution {
    let mut new_args = Vec::with_capacity(args.len());
    new_args.push(first);
    new_args.extend(args.iter().skip(1).cloned());
    Resolution::Substituted(new_args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn install(root: &Path, path: &str) {
        let host = root.join(path.trim_start_matches('/'));
        std::fs::create_dir_all(host.parent().unwrap()).unwrap();
        std::fs::write(&host, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&host, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn resolver(root: &TempDir) -> EntryPointResolver {
        EntryPointResolver::new(None).with_root(root.path())
    }

    const PATH: &str = "/usr/local/bin:/usr/bin:/bin";

    #[test]
    fn runnable_program_is_left_alone() {
        let root = TempDir::new().unwrap();
        install(root.path(), "/usr/bin/python3");

        let r = resolver(&root);
        assert_eq!(
            r.resolve(&args(&["/usr/bin/python3", "-V"]), PATH),
            Ok(Resolution::Unchanged)
        );
        assert_eq!(
            r.resolve(&args(&["python3", "-V"]), PATH),
            Ok(Resolution::Unchanged)
        );
    }

    #[test]
    fn present_action_script_is_left_alone() {
        let root = TempDir::new().unwrap();
        install(root.path(), Action::Run.path());
        install(root.path(), "/.run");

        let resolution = resolver(&root).resolve(&args(&[Action::Run.path()]), PATH);
        assert_eq!(resolution, Ok(Resolution::Unchanged));
    }

    #[test]
    fn exec_prefers_fallback_binary() {
        let root = TempDir::new().unwrap();
        install(root.path(), "/.exec");
        install(root.path(), "/bin/ls");

        let resolution = resolver(&root).resolve(&args(&[Action::Exec.path(), "ls", "-l"]), PATH);
        assert_eq!(
            resolution,
            Ok(Resolution::Substituted(args(&["/.exec", "ls", "-l"])))
        );
    }

    #[test]
    fn exec_promotes_requested_program() {
        let root = TempDir::new().unwrap();
        install(root.path(), "/usr/bin/ls");

        let resolution = resolver(&root).resolve(&args(&[Action::Exec.path(), "ls", "-l", "/"]), PATH);
        assert_eq!(
            resolution,
            Ok(Resolution::Substituted(args(&["/usr/bin/ls", "-l", "/"])))
        );
    }

    #[test]
    fn exec_without_program_fails() {
        let root = TempDir::new().unwrap();
        let r = resolver(&root);

        assert_eq!(
            r.resolve(&args(&[Action::Exec.path(), "missing"]), PATH),
            Err(ResolveError::NoExecutable {
                program: "missing".to_string()
            })
        );
        assert!(matches!(
            r.resolve(&args(&[Action::Exec.path()]), PATH),
            Err(ResolveError::NoExecutable { .. })
        ));
    }

    #[test]
    fn shell_prefers_fallback_binary() {
        let root = TempDir::new().unwrap();
        install(root.path(), "/.shell");
        install(root.path(), "/bin/sh");

        let resolution = resolver(&root).resolve(&args(&[Action::Shell.path(), "-l"]), PATH);
        assert_eq!(
            resolution,
            Ok(Resolution::Substituted(args(&["/.shell", "-l"])))
        );
    }

    #[test]
    fn shell_falls_back_to_configured_shell() {
        let root = TempDir::new().unwrap();
        install(root.path(), "/bin/bash");

        let r = EntryPointResolver::new(Some("bash")).with_root(root.path());
        let resolution = r.resolve(&args(&[Action::Shell.path()]), PATH);
        assert_eq!(resolution, Ok(Resolution::Substituted(args(&["/bin/bash"]))));
    }

    #[test]
    fn shell_missing_everywhere_fails() {
        let root = TempDir::new().unwrap();
        let resolution = resolver(&root).resolve(&args(&[Action::Shell.path()]), PATH);
        assert_eq!(
            resolution,
            Err(ResolveError::NoShell {
                shell: DEFAULT_SHELL.to_string()
            })
        );
    }

    #[test]
    fn run_uses_runscript_then_driver() {
        let root = TempDir::new().unwrap();
        install(root.path(), "/singularity");
        let r = resolver(&root);

        assert_eq!(
            r.resolve(&args(&[Action::Run.path(), "a"]), PATH),
            Ok(Resolution::Substituted(args(&["/singularity", "a"])))
        );

        install(root.path(), "/.run");
        assert_eq!(
            r.resolve(&args(&[Action::Run.path(), "a"]), PATH),
            Ok(Resolution::Substituted(args(&["/.run", "a"])))
        );
    }

    #[test]
    fn run_without_driver_fails() {
        let root = TempDir::new().unwrap();
        assert_eq!(
            resolver(&root).resolve(&args(&[Action::Run.path()]), PATH),
            Err(ResolveError::NoRunDriver)
        );
    }

    #[test]
    fn start_replaces_argv_with_inline_script() {
        let root = TempDir::new().unwrap();
        install(root.path(), "/bin/sh");

        let resolution = resolver(&root).resolve(&args(&[Action::Start.path(), "ignored"]), PATH);
        assert_eq!(
            resolution,
            Ok(Resolution::Substituted(args(&[
                "/bin/sh",
                "-c",
                MISSING_START_SCRIPT
            ])))
        );
    }

    #[test]
    fn start_without_shell_is_fatal() {
        let root = TempDir::new().unwrap();
        let err = resolver(&root)
            .resolve(&args(&[Action::Start.path()]), PATH)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "no /bin/sh found inside container, can't run instance"
        );
    }

    #[test]
    fn test_uses_test_driver() {
        let root = TempDir::new().unwrap();
        let r = resolver(&root);
        assert_eq!(
            r.resolve(&args(&[Action::Test.path()]), PATH),
            Err(ResolveError::NoTestDriver)
        );

        install(root.path(), "/.test");
        assert_eq!(
            r.resolve(&args(&[Action::Test.path(), "-v"]), PATH),
            Ok(Resolution::Substituted(args(&["/.test", "-v"])))
        );
    }

    #[test]
    fn unknown_program_fails_with_its_path() {
        let root = TempDir::new().unwrap();
        let err = resolver(&root)
            .resolve(&args(&["/opt/app/run"]), PATH)
            .unwrap_err();
        assert_eq!(err.to_string(), "no /opt/app/run found inside container");

        let corral: CorralError = err.into();
        assert!(matches!(corral, CorralError::EntryPoint { .. }));
    }

    #[test]
    fn empty_args_fail() {
        let root = TempDir::new().unwrap();
        assert_eq!(resolver(&root).resolve(&[], PATH), Err(ResolveError::EmptyArgs));
    }

    #[test]
    fn non_executable_files_are_skipped() {
        let root = TempDir::new().unwrap();
        let host = root.path().join("bin/tool");
        std::fs::create_dir_all(host.parent().unwrap()).unwrap();
        std::fs::write(&host, "data").unwrap();
        std::fs::set_permissions(&host, std::fs::Permissions::from_mode(0o644)).unwrap();

        assert_eq!(resolver(&root).lookup("tool", PATH), None);
    }

    #[test]
    fn resolution_leaves_process_path_untouched() {
        let root = TempDir::new().unwrap();
        install(root.path(), "/opt/tools/bin/ls");
        let before = std::env::var_os("PATH");

        let r = resolver(&root);
        let _ = r.resolve(&args(&[Action::Exec.path(), "ls"]), "/opt/tools/bin");
        let _ = r.resolve(&args(&["nothing-here"]), "/opt/tools/bin");

        assert_eq!(std::env::var_os("PATH"), before);
    }

    #[test]
    fn search_path_prefers_container_value() {
        assert_eq!(effective_search_path(Some("/a:/b")), "/a:/b");
        assert!(!effective_search_path(None).is_empty());
    }

    #[test]
    fn apply_substitution() {
        let mut argv = args(&["old", "x"]);
        Resolution::Unchanged.apply(&mut argv);
        assert_eq!(argv, args(&["old", "x"]));

        Resolution::Substituted(args(&["new"])).apply(&mut argv);
        assert_eq!(argv, args(&["new"]));
    }
}
