//! Process display name.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::io;

/// Name shown for the supervising process.
pub const SUPERVISOR_NAME: &str = "corral-init";

/// Set the calling thread's display name (`PR_SET_NAME`, truncated to 15 bytes).
///
/// # Errors
///
/// Returns an error if the name contains a NUL byte or `prctl(2)` fails.
pub fn set_process_title(name: &str) -> io::Result<()> {
    let name = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: `name` is NUL terminated and outlives the call.
    let rc = unsafe { libc::prctl(libc::PR_SET_NAME, name.as_ptr(), 0, 0, 0) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
