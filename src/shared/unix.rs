//! POSIX shared memory backend: `shm_open` + `mmap`, locked with `flock`

use crate::error::{GridError, Result};
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;

pub(super) struct Segment {
    fd: OwnedFd,
    ptr: NonNull<u8>,
    len: usize,
    os_name: CString,
    name: String,
}

/// Held while the segment is exclusively locked; unlocks on drop
pub(super) struct SegmentLock<'a> {
    segment: &'a Segment,
}

/// POSIX object name for `name`, scoped to the current user
pub(super) fn os_name(name: &str) -> String {
    let uid = unsafe { libc::getuid() };
    let clean: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("/ipc-grid-{}-{}", uid, clean)
}

impl Segment {
    pub(super) fn open(name: &str, len: usize) -> Result<Self> {
        let os_name = CString::new(os_name(name)).map_err(|e| {
            GridError::shm("name", name, io::Error::new(io::ErrorKind::InvalidInput, e))
        })?;

        let raw = unsafe {
            libc::shm_open(
                os_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                0o600 as libc::c_uint,
            )
        };
        if raw < 0 {
            return Err(GridError::shm("create", name, io::Error::last_os_error()));
        }
        // SAFETY: shm_open returned a fresh descriptor we now own
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // Grow only: a second ftruncate on an existing object is not portable
        let stat = fstat(&fd, name)?;
        if (stat.st_size as usize) < len
            && unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } != 0
        {
            return Err(GridError::shm("size", name, io::Error::last_os_error()));
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(GridError::shm("map", name, io::Error::last_os_error()));
        }
        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| {
            GridError::shm("map", name, io::Error::new(io::ErrorKind::Other, "null mapping"))
        })?;

        Ok(Self {
            fd,
            ptr,
            len,
            os_name,
            name: name.to_string(),
        })
    }

    pub(super) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Block until this process holds the exclusive lock on the segment.
    ///
    /// `flock` locks belong to the open file description, so separate handles
    /// exclude each other even inside one process.
    pub(super) fn lock(&self) -> Result<SegmentLock<'_>> {
        loop {
            if unsafe { libc::flock(self.fd.as_raw_fd(), libc::LOCK_EX) } == 0 {
                return Ok(SegmentLock { segment: self });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(GridError::shm("lock", &self.name, err));
            }
        }
    }

    /// Remove the name so the next opener starts a fresh segment.
    /// Existing mappings stay valid until unmapped.
    pub(super) fn release_name(&self) {
        if unsafe { libc::shm_unlink(self.os_name.as_ptr()) } != 0 {
            tracing::debug!(
                "shm_unlink({}) failed: {}",
                self.name,
                io::Error::last_os_error()
            );
        }
    }

    /// Whether the name still refers to this object.
    ///
    /// False once the last instance has unlinked it, even though our mapping
    /// stays valid.
    pub(super) fn is_current(&self) -> Result<bool> {
        let raw = unsafe { libc::shm_open(self.os_name.as_ptr(), libc::O_RDWR, 0o600 as libc::c_uint) };
        if raw < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::NotFound => Ok(false),
                _ => Err(GridError::shm("reopen", &self.name, err)),
            };
        }
        // SAFETY: shm_open returned a fresh descriptor we now own
        let named = unsafe { OwnedFd::from_raw_fd(raw) };

        let ours = fstat(&self.fd, &self.name)?;
        let theirs = fstat(&named, &self.name)?;
        Ok(ours.st_dev == theirs.st_dev && ours.st_ino == theirs.st_ino)
    }
}

fn fstat(fd: &OwnedFd, name: &str) -> Result<libc::stat> {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } != 0 {
        return Err(GridError::shm("stat", name, io::Error::last_os_error()));
    }
    Ok(stat)
}

impl Drop for SegmentLock<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.segment.fd.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_name_is_user_scoped_and_sanitized() {
        let name = os_name("Grid/Shared Memory");
        assert!(name.starts_with("/ipc-grid-"));
        assert!(name.ends_with("-Grid_Shared_Memory"));
        assert_eq!(name.matches('/').count(), 1);
    }
}
