//! Win32 shared memory backend: pagefile-backed named file mapping,
//! locked with a named mutex

use crate::error::{GridError, Result};
use std::io;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE, WAIT_ABANDONED, WAIT_OBJECT_0};
use windows::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
    MEMORYMAPPEDVIEW_ADDRESS, PAGE_READWRITE,
};
use windows::Win32::System::Threading::{CreateMutexW, ReleaseMutex, WaitForSingleObject, INFINITE};

pub(super) struct Segment {
    mapping: HANDLE,
    mutex: HANDLE,
    view: MEMORYMAPPEDVIEW_ADDRESS,
    name: String,
}

pub(super) struct SegmentLock<'a> {
    segment: &'a Segment,
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

fn win_err(e: windows::core::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

impl Segment {
    pub(super) fn open(name: &str, len: usize) -> Result<Self> {
        let map_name = wide(&format!("Local\\{}", name));
        let lock_name = wide(&format!("Local\\{}.lock", name));

        unsafe {
            let mapping = CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                None,
                PAGE_READWRITE,
                0,
                len as u32,
                PCWSTR(map_name.as_ptr()),
            )
            .map_err(|e| GridError::shm("create", name, win_err(e)))?;

            let view = MapViewOfFile(mapping, FILE_MAP_ALL_ACCESS, 0, 0, len);
            if view.Value.is_null() {
                let err = io::Error::last_os_error();
                let _ = CloseHandle(mapping);
                return Err(GridError::shm("map", name, err));
            }

            let mutex = match CreateMutexW(None, false, PCWSTR(lock_name.as_ptr())) {
                Ok(m) => m,
                Err(e) => {
                    let _ = UnmapViewOfFile(view);
                    let _ = CloseHandle(mapping);
                    return Err(GridError::shm("lock", name, win_err(e)));
                }
            };

            tracing::debug!("Mapped Local\\{} ({} bytes)", name, len);

            Ok(Self {
                mapping,
                mutex,
                view,
                name: name.to_string(),
            })
        }
    }

    pub(super) fn as_ptr(&self) -> *mut u8 {
        self.view.Value as *mut u8
    }

    pub(super) fn lock(&self) -> Result<SegmentLock<'_>> {
        let wait = unsafe { WaitForSingleObject(self.mutex, INFINITE) };
        // An abandoned mutex is still acquired; its owner exited mid-write
        if wait == WAIT_OBJECT_0 || wait == WAIT_ABANDONED {
            Ok(SegmentLock { segment: self })
        } else {
            Err(GridError::shm("lock", &self.name, io::Error::last_os_error()))
        }
    }

    /// The kernel frees the mapping when the last handle closes
    pub(super) fn release_name(&self) {}

    /// Named mappings cannot be detached from their name while a handle is open
    pub(super) fn is_current(&self) -> Result<bool> {
        Ok(true)
    }
}

impl Drop for SegmentLock<'_> {
    fn drop(&mut self) {
        unsafe {
            let _ = ReleaseMutex(self.segment.mutex);
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        unsafe {
            let _ = UnmapViewOfFile(self.view);
            let _ = CloseHandle(self.mapping);
            let _ = CloseHandle(self.mutex);
        }
    }
}
