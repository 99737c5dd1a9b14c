//! Surrogate init for the container process.
//!
//! When the launcher stays behind it forks the container process, reaps
//! every orphan re-parented to it, and forwards the signals it receives. All
//! of that happens in one consumer loop fed by two producers:
//!
//! - one task per subscribed signal
//! - one task waiting on the container process
//!
//! The loop decides the exit code the launcher terminates with.

mod control;
mod events;
mod title;

pub use control::{ProcessControl, SystemControl, drain_zombies};
pub use events::{SupervisorEvent, catchable_signals, forward_signals, watch_child};
pub use title::{SUPERVISOR_NAME, set_process_title};

use std::io;
use std::os::unix::net::UnixStream;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use corral_common::{CorralError, CorralResult};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::engine::LaunchSpec;
use crate::exec::replace::command_for;

/// Exit code for a termination driven by `signal`.
#[must_use]
pub const fn signal_exit_code(signal: i32) -> i32 {
    128 + signal
}

/// Whether the loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Wait for the next event.
    Continue,
    /// Terminate with this exit code.
    Exit(i32),
}

/// Mutable state of the supervisor loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisionState {
    /// The last non-`SIGCHLD` signal received.
    pub last_signal: Option<i32>,
    /// Pid of the container process until its exit has been handled.
    pub watched: Option<u32>,
    /// Wait status of the container process once it has been collected,
    /// by its own waiter or by a zombie drain that got there first.
    pub pending_status: Option<ExitStatus>,
}

/// The event consumer.
pub struct Supervisor<C> {
    control: C,
    is_instance: bool,
    state: SupervisionState,
}

impl<C: ProcessControl> Supervisor<C> {
    /// A supervisor for the container process `child_pid`.
    pub const fn new(control: C, is_instance: bool, child_pid: u32) -> Self {
        Self {
            control,
            is_instance,
            state: SupervisionState {
                last_signal: None,
                watched: Some(child_pid),
                pending_status: None,
            },
        }
    }

    /// Current loop state.
    pub const fn state(&self) -> &SupervisionState {
        &self.state
    }

    /// Consume events until one decides the exit code.
    pub async fn run(mut self, mut events: UnboundedReceiver<SupervisorEvent>) -> i32 {
        while let Some(event) = events.recv().await {
            if let Flow::Exit(code) = self.handle(event) {
                tracing::info!(exit_code = code, "Supervisor exiting");
                return code;
            }
        }

        tracing::debug!("Event sources closed");
        self.state.last_signal.map_or(0, signal_exit_code)
    }

    /// React to one event.
    pub fn handle(&mut self, event: SupervisorEvent) -> Flow {
        match event {
            SupervisorEvent::Signal(signal) => self.on_signal(signal),
            SupervisorEvent::ChildExited(result) => self.on_child_exit(result),
        }
    }

    fn on_signal(&mut self, signal: i32) -> Flow {
        if signal == libc::SIGCHLD {
            return match self.reap() {
                Some(status) => self.on_exit_status(status),
                None => Flow::Continue,
            };
        }

        self.state.last_signal = Some(signal);

        if !self.is_instance {
            tracing::debug!(signal, "Signal received, terminating");
            self.control.kill_self();
            return Flow::Exit(signal_exit_code(signal));
        }

        match self.control.signal_all(signal) {
            Ok(()) => {
                tracing::debug!(signal, "Forwarded signal");
                Flow::Continue
            }
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {
                tracing::debug!(signal, "No process left to signal");
                Flow::Exit(signal_exit_code(signal))
            }
            Err(e) => {
                tracing::warn!(signal, error = %e, "Failed to forward signal");
                Flow::Continue
            }
        }
    }

    fn on_child_exit(&mut self, result: io::Result<ExitStatus>) -> Flow {
        if self.state.watched.take().is_none() {
            tracing::debug!("Container process exit already handled");
            return Flow::Continue;
        }

        let status = match result {
            Ok(status) => status,
            Err(e) if e.raw_os_error() == Some(libc::ECHILD) => {
                let code = self.state.last_signal.map_or(0, signal_exit_code);
                tracing::debug!(exit_code = code, "Container process already reaped");
                return Flow::Exit(code);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Waiting for the container process failed");
                ExitStatus::from_raw(0)
            }
        };
        self.state.pending_status = Some(status);

        self.reap();
        self.on_exit_status(status)
    }

    /// Drain every zombie. Returns the container process's status if the
    /// drain collected it.
    fn reap(&mut self) -> Option<ExitStatus> {
        let mut collected = None;
        for (pid, status) in drain_zombies(&self.control) {
            if self.state.watched == Some(pid) {
                self.state.watched = None;
                self.state.pending_status = Some(status);
                collected = Some(status);
            }
        }
        collected
    }

    fn on_exit_status(&self, status: ExitStatus) -> Flow {
        if let Some(signal) = status.signal() {
            tracing::debug!(signal, "Container process killed by signal");
            self.control.kill_self();
            return Flow::Exit(signal_exit_code(signal));
        }

        match status.code() {
            Some(code) if code != 0 => {
                tracing::debug!(exit_code = code, "Container process exited");
                Flow::Exit(code)
            }
            _ if self.is_instance => {
                tracing::debug!("Container process exited cleanly, instance keeps running");
                Flow::Continue
            }
            _ => Flow::Exit(0),
        }
    }
}

/// Fork the container process and supervise it until it is done.
///
/// `on_spawn` runs with the child's pid before any event is consumed; if it
/// fails the child is killed and the error returned. `channel` is the control
/// socket shared with the parent launcher; it is closed once supervision is
/// set up.
///
/// # Errors
///
/// Returns [`CorralError::Exec`] if the container process cannot be started,
/// or the error of `on_spawn`.
pub async fn supervise(
    spec: &LaunchSpec,
    channel: Option<UnixStream>,
    on_spawn: impl FnOnce(u32) -> CorralResult<()>,
) -> CorralResult<i32> {
    let mut cmd = tokio::process::Command::from(command_for(spec));
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let mut child = cmd.spawn().map_err(|source| CorralError::Exec {
        path: spec.executable().to_string(),
        source,
    })?;
    let pid = child.id().unwrap_or_default();
    tracing::info!(pid, command = spec.executable(), "Supervising container process");

    if let Err(e) = on_spawn(pid) {
        tracing::error!(pid, error = %e, "Post-start step failed, killing container process");
        if let Err(kill) = child.kill().await {
            tracing::warn!(pid, error = %kill, "Failed to kill container process");
        }
        return Err(e);
    }

    if let Err(e) = set_process_title(SUPERVISOR_NAME) {
        tracing::warn!(error = %e, "Failed to set supervisor process name");
    }

    let (tx, rx) = mpsc::unbounded_channel();
    forward_signals(&tx);
    watch_child(child, tx);

    drop(channel);

    Ok(Supervisor::new(SystemControl, spec.is_instance, pid)
        .run(rx)
        .await)
}
