//! Event producers feeding the supervisor loop.

use std::io;
use std::process::ExitStatus;

use tokio::process::Child;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc::UnboundedSender;

/// Something the supervisor must react to.
#[derive(Debug)]
pub enum SupervisorEvent {
    /// A signal was delivered to the supervisor.
    Signal(i32),
    /// The watched child finished, or waiting on it failed.
    ChildExited(io::Result<ExitStatus>),
}

/// Signals the kernel never lets a process handle itself.
const UNCATCHABLE: [i32; 5] = [
    libc::SIGKILL,
    libc::SIGSTOP,
    libc::SIGILL,
    libc::SIGFPE,
    libc::SIGSEGV,
];

/// Every signal the supervisor subscribes to: the standard set minus
/// [`UNCATCHABLE`], then the real-time range.
#[must_use]
pub fn catchable_signals() -> Vec<i32> {
    let standard = (1..=31).filter(|signum| !UNCATCHABLE.contains(signum));
    standard.chain(libc::SIGRTMIN()..=libc::SIGRTMAX()).collect()
}

/// Subscribe to every catchable signal, forwarding each delivery to `events`.
///
/// Returns the number of signals subscribed. Signals the runtime refuses are
/// skipped.
pub fn forward_signals(events: &UnboundedSender<SupervisorEvent>) -> usize {
    let mut subscribed = 0;

    for signum in catchable_signals() {
        match signal(SignalKind::from_raw(signum)) {
            Ok(mut stream) => {
                let events = events.clone();
                tokio::spawn(async move {
                    while stream.recv().await.is_some() {
                        if events.send(SupervisorEvent::Signal(signum)).is_err() {
                            break;
                        }
                    }
                });
                subscribed += 1;
            }
            Err(e) => tracing::debug!(signum, error = %e, "Signal not subscribed"),
        }
    }

    tracing::debug!(subscribed, "Signal forwarding ready");
    subscribed
}

/// Wait for `child` in the background and report its completion once.
pub fn watch_child(mut child: Child, events: UnboundedSender<SupervisorEvent>) {
    tokio::spawn(async move {
        let result = child.wait().await;
        // The loop may already be gone.
        let _ = events.send(SupervisorEvent::ChildExited(result));
    });
}
