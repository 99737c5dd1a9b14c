//! Terminal descriptor fixup.
//!
//! With a minimal `/dev` the pseudo-terminal the launcher was started on is not
//! visible inside the container, so `ttyname()` and readlinks of
//! `/proc/self/fd/[0-2]` break. Reopening the console and duplicating it over
//! every standard stream that is a terminal makes those queries resolve to a
//! device that does exist.

#![allow(unsafe_code)]

use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::path::Path;

/// Console device inside the container.
pub const CONSOLE_PATH: &str = "/dev/console";

const STANDARD_STREAMS: [RawFd; 3] = [0, 1, 2];

/// Point every terminal standard stream at `console`.
///
/// Returns the number of descriptors replaced. An unopenable console is not an
/// error: the streams are left untouched.
pub fn reopen_console_on_ttys(console: &Path) -> usize {
    let ttys: Vec<RawFd> = STANDARD_STREAMS
        .into_iter()
        .filter(|&fd| is_terminal(fd))
        .collect();

    if ttys.is_empty() {
        return 0;
    }

    let console_file = match OpenOptions::new().read(true).write(true).open(console) {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!(
                path = %console.display(),
                error = %e,
                "Could not open minimal console, skipping replacing tty descriptors"
            );
            return 0;
        }
    };

    tracing::debug!(path = %console.display(), "Replacing tty descriptors with console");

    let mut replaced = 0;
    for fd in ttys {
        // SAFETY: both descriptors are open; dup3 atomically replaces `fd`.
        let rc = unsafe { libc::dup3(console_file.as_raw_fd(), fd, 0) };
        if rc < 0 {
            tracing::debug!(fd, error = %std::io::Error::last_os_error(), "dup3 over tty failed");
        } else {
            replaced += 1;
        }
    }

    replaced
}

fn is_terminal(fd: RawFd) -> bool {
    // SAFETY: the standard streams stay open for the lifetime of the process.
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    rustix::termios::isatty(fd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_console_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let console = dir.path().join("console");

        assert_eq!(reopen_console_on_ttys(&console), 0);
    }
}
