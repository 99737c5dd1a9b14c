//! User database lookups.

#![allow(unsafe_code)]

use std::ffi::CStr;

use corral_common::{CorralError, CorralResult};

/// Resolves user ids to login names.
pub trait UserLookup {
    /// Login name of `uid`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::UserLookup`] when no entry exists.
    fn user_name(&self, uid: u32) -> CorralResult<String>;
}

/// Lookup through the system passwd database (`getpwuid_r(3)`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswdLookup;

const INITIAL_BUFFER: usize = 1024;
const MAX_BUFFER: usize = 1 << 20;

impl UserLookup for PasswdLookup {
    fn user_name(&self, uid: u32) -> CorralResult<String> {
        let mut buf: Vec<libc::c_char> = vec![0; INITIAL_BUFFER];

        loop {
            // SAFETY: passwd is plain old data; getpwuid_r fills it in.
            let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
            let mut result: *mut libc::passwd = std::ptr::null_mut();

            // SAFETY: every pointer refers to live storage of the stated size.
            let rc = unsafe {
                libc::getpwuid_r(uid, &mut entry, buf.as_mut_ptr(), buf.len(), &mut result)
            };

            match rc {
                0 if result.is_null() => return Err(CorralError::UserLookup { uid }),
                0 => {
                    // SAFETY: on success pw_name points into `buf`, NUL terminated.
                    let name = unsafe { CStr::from_ptr(entry.pw_name) };
                    return Ok(name.to_string_lossy().into_owned());
                }
                libc::ERANGE if buf.len() < MAX_BUFFER => {
                    let grown = buf.len() * 2;
                    buf.resize(grown, 0);
                }
                libc::ENOENT | libc::ESRCH | libc::EBADF | libc::EPERM => {
                    return Err(CorralError::UserLookup { uid });
                }
                errno => return Err(std::io::Error::from_raw_os_error(errno).into()),
            }
        }
    }
}
