//! In-place replacement of the current process image.

use std::os::unix::process::CommandExt;
use std::process::Command;

use corral_common::CorralError;

use crate::engine::LaunchSpec;

/// Replace the current process with the launch target.
///
/// Only returns if `execve(2)` failed; the returned error names the
/// executable.
#[must_use]
pub fn exec_in_place(spec: &LaunchSpec) -> CorralError {
    tracing::debug!(path = spec.executable(), args = ?spec.args, "Replacing process image");

    let err = command_for(spec).exec();
    CorralError::Exec {
        path: spec.executable().to_string(),
        source: err,
    }
}

/// A command that runs `spec` with exactly its own environment.
pub(crate) fn command_for(spec: &LaunchSpec) -> Command {
    let mut cmd = Command::new(spec.executable());
    cmd.args(spec.args.iter().skip(1)).env_clear().envs(spec.env_pairs());
    cmd
}
