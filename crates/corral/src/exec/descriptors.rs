//! Release of descriptors inherited from the parent launcher.

#![allow(unsafe_code)]

use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::net::UnixStream;

use corral_common::{CorralError, CorralResult};
use rustix::io::FdFlags;

use crate::engine::ImageDescriptor;

/// Close the image descriptors, then the auxiliary ones, in order.
///
/// Each descriptor is closed exactly once. The first failure aborts the launch
/// with an error naming the image or descriptor involved.
///
/// # Errors
///
/// Returns [`CorralError::CloseDescriptor`] when `close(2)` fails.
pub fn close_inherited(images: &[ImageDescriptor], open_fds: &[RawFd]) -> CorralResult<()> {
    for image in images {
        close_fd(image.fd).map_err(|source| CorralError::CloseDescriptor {
            resource: image.path.display().to_string(),
            source,
        })?;
        tracing::debug!(fd = image.fd, path = %image.path.display(), "Closed image descriptor");
    }

    for &fd in open_fds {
        close_fd(fd).map_err(|source| CorralError::CloseDescriptor {
            resource: format!("descriptor {fd}"),
            source,
        })?;
        tracing::debug!(fd, "Closed inherited descriptor");
    }

    Ok(())
}

/// Take ownership of the control socket handed down by the parent launcher.
///
/// The descriptor is marked close-on-exec so neither the container process
/// nor anything it starts inherits it.
///
/// # Errors
///
/// Returns an error if the descriptor flags cannot be set.
pub fn adopt_control_channel(fd: RawFd) -> CorralResult<UnixStream> {
    // SAFETY: the parent launcher hands this descriptor to us and nothing
    // else in the process owns it.
    let stream = unsafe { UnixStream::from_raw_fd(fd) };
    rustix::io::fcntl_setfd(&stream, FdFlags::CLOEXEC).map_err(std::io::Error::from)?;
    tracing::debug!(fd, "Adopted control channel");
    Ok(stream)
}

fn close_fd(fd: RawFd) -> std::io::Result<()> {
    // SAFETY: the descriptor was handed to us by the parent launcher and is
    // owned by no Rust object in this process.
    if unsafe { libc::close(fd) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::IntoRawFd;
    use std::path::PathBuf;

    fn leaked_fd() -> RawFd {
        tempfile::tempfile().unwrap().into_raw_fd()
    }

    fn is_open(fd: RawFd) -> bool {
        // SAFETY: F_GETFD only queries descriptor flags.
        unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
    }

    #[test]
    fn closes_images_and_auxiliary_descriptors() {
        let image_fd = leaked_fd();
        let aux_fd = leaked_fd();
        let images = vec![ImageDescriptor {
            path: PathBuf::from("/images/app.sif"),
            fd: image_fd,
        }];

        close_inherited(&images, &[aux_fd]).unwrap();

        assert!(!is_open(image_fd));
        assert!(!is_open(aux_fd));
    }

    #[test]
    fn failure_names_the_image() {
        let images = vec![ImageDescriptor {
            path: PathBuf::from("/images/broken.sif"),
            fd: 1_000_000,
        }];

        let err = close_inherited(&images, &[]).unwrap_err();
        match err {
            CorralError::CloseDescriptor { resource, .. } => {
                assert_eq!(resource, "/images/broken.sif");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn control_channel_is_not_inherited_across_exec() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        rustix::io::fcntl_setfd(&ours, FdFlags::empty()).unwrap();
        let fd = ours.into_raw_fd();

        let channel = adopt_control_channel(fd).unwrap();

        let flags = rustix::io::fcntl_getfd(&channel).unwrap();
        assert!(flags.contains(FdFlags::CLOEXEC));
        drop(theirs);
    }

    #[test]
    fn failure_names_the_descriptor() {
        let err = close_inherited(&[], &[1_000_001]).unwrap_err();
        assert!(err.to_string().contains("descriptor 1000001"));
    }
}
