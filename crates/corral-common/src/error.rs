//! Error types shared by every stage of a launch.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`CorralError`].
pub type CorralResult<T> = Result<T, CorralError>;

/// Errors raised while launching, supervising or registering a container process.
#[derive(Error, Diagnostic, Debug)]
pub enum CorralError {
    /// The entry point could not be resolved inside the container.
    #[error("{message}")]
    #[diagnostic(
        code(corral::exec::entry_point),
        help("Check that the image provides the requested program or its action scripts")
    )]
    EntryPoint {
        /// Description naming the offending path.
        message: String,
    },

    /// An inherited descriptor could not be closed before launch.
    #[error("failed to close file descriptor for {resource}: {source}")]
    #[diagnostic(code(corral::exec::close_descriptor))]
    CloseDescriptor {
        /// Image path or descriptor number being closed.
        resource: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The security policy could not be applied.
    #[error("failed to apply security configuration: {message}")]
    #[diagnostic(code(corral::security::policy))]
    SecurityPolicy {
        /// The failing subsystem and reason.
        message: String,
    },

    /// Replacing the process image or starting the child failed.
    #[error("exec {path} failed: {source}")]
    #[diagnostic(code(corral::exec::failed))]
    Exec {
        /// The executable that could not be run.
        path: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Raising the identity to root failed.
    #[error("failed to escalate {step} privileges: {source}")]
    #[diagnostic(code(corral::privilege::escalate))]
    PrivilegeEscalation {
        /// Which id was being raised (`uid` or `gid`).
        step: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Dropping back to the original identity failed.
    #[error("failed to restore {step} privileges: {source}")]
    #[diagnostic(
        code(corral::privilege::restore),
        severity(Error),
        help("The process may still hold an elevated identity and must not continue")
    )]
    PrivilegeRestore {
        /// Which id was being restored (`uid` or `gid`).
        step: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// An instance with this name is already registered.
    #[error("instance {name} already exists")]
    #[diagnostic(code(corral::instance::exists))]
    InstanceExists {
        /// The instance name.
        name: String,
    },

    /// Invalid container ID format.
    #[error("Invalid container ID: {id}")]
    #[diagnostic(
        code(corral::container::invalid_id),
        help("Container IDs must be alphanumeric with hyphens and underscores, 1-64 characters")
    )]
    InvalidContainerId {
        /// The invalid container ID.
        id: String,
    },

    /// No passwd entry for a user id.
    #[error("no user found for uid {uid}")]
    #[diagnostic(code(corral::user::lookup))]
    UserLookup {
        /// The user id looked up.
        uid: u32,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(corral::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(corral::serialization))]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(corral::config))]
    Config {
        /// The error message.
        message: String,
    },
}

impl CorralError {
    /// Whether the process may still hold an elevated identity.
    #[must_use]
    pub const fn is_privilege_leak(&self) -> bool {
        matches!(self, Self::PrivilegeRestore { .. })
    }
}

impl From<serde_json::Error> for CorralError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
