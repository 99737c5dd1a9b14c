//! Zombie reaping against the real process table.
//!
//! Kept in its own test binary: reaping is process-wide and would steal
//! children from concurrently running tests. The tests in here take turns
//! for the same reason.

use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use corral::supervisor::{Flow, Supervisor, SupervisorEvent, SystemControl, drain_zombies};

static PROCESS_TABLE: Mutex<()> = Mutex::new(());

fn exclusive() -> MutexGuard<'static, ()> {
    PROCESS_TABLE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawn `script` and drop the handle without waiting, leaving a zombie behind.
fn orphan(script: &str) -> u32 {
    Command::new("/bin/sh").args(["-c", script]).spawn().unwrap().id()
}

fn is_zombie(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

fn wait_for_zombies(pids: &[u32]) {
    for _ in 0..250 {
        if pids.iter().all(|&pid| is_zombie(pid)) {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("children never terminated: {pids:?}");
}

#[test]
fn drains_every_terminated_child() {
    let _table = exclusive();
    let spawned: Vec<u32> = (0..3).map(|_| orphan("exit 0")).collect();
    wait_for_zombies(&spawned);

    let mut reaped: Vec<u32> = drain_zombies(&SystemControl)
        .into_iter()
        .map(|(pid, _)| pid)
        .collect();
    reaped.sort_unstable();
    let mut expected = spawned.clone();
    expected.sort_unstable();

    assert_eq!(reaped, expected);
    assert!(drain_zombies(&SystemControl).is_empty());
}

#[test]
fn watched_zombie_does_not_cut_the_drain_short() {
    let _table = exclusive();
    let watched = orphan("exit 7");
    let mut others: Vec<u32> = (0..3).map(|_| orphan("exit 0")).collect();
    let mut all = others.clone();
    all.push(watched);
    wait_for_zombies(&all);

    let mut supervisor = Supervisor::new(SystemControl, true, watched);
    assert_eq!(supervisor.handle(SupervisorEvent::Signal(libc::SIGCHLD)), Flow::Exit(7));
    assert_eq!(supervisor.state().watched, None);
    assert_eq!(
        supervisor.state().pending_status,
        Some(ExitStatus::from_raw(7 << 8))
    );

    // Every sibling went with the same SIGCHLD.
    others.retain(|&pid| std::path::Path::new(&format!("/proc/{pid}")).exists());
    assert!(others.is_empty(), "left unreaped: {others:?}");
    assert!(drain_zombies(&SystemControl).is_empty());
}
