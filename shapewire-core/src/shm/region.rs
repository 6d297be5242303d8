//! Mapped memory backing the session rings.
//!
//! A region is either anonymous (shared between threads of one process) or
//! backed by a named POSIX shared memory object.
//! Both rings of a session live in one region so they are released together.

use std::ffi::CString;
use std::io;
use std::ptr::NonNull;

use crate::error::SharedMemoryError;

/// What the mapping is backed by.
enum Backing {
    Anonymous,
    /// Unlinked when the region is dropped.
    Named { name: String, fd: libc::c_int },
}

/// An owned, read-write, `MAP_SHARED` mapping, released on drop.
pub struct SharedMemoryRegion {
    base: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// SAFETY: the mapping is owned by the struct and not tied to a thread.
unsafe impl Send for SharedMemoryRegion {}

// SAFETY: only raw pointers are handed out; the rings laid over the region
// synchronize through atomic offsets.
unsafe impl Sync for SharedMemoryRegion {}

fn object_path(name: &str) -> Result<CString, SharedMemoryError> {
    if name.is_empty() {
        return Err(SharedMemoryError::CreateFailed {
            name: String::new(),
            reason: "empty object name".to_string(),
        });
    }
    CString::new(format!("/{name}")).map_err(|e| SharedMemoryError::CreateFailed {
        name: name.to_string(),
        reason: format!("object name contains NUL: {e}"),
    })
}

fn os_failure(name: &str, call: &str) -> SharedMemoryError {
    SharedMemoryError::CreateFailed {
        name: name.to_string(),
        reason: format!("{call}: {}", io::Error::last_os_error()),
    }
}

/// Map `len` bytes of `fd`, or anonymous memory when `fd` is `None`.
fn map(fd: Option<libc::c_int>, len: usize) -> Result<NonNull<u8>, SharedMemoryError> {
    let (flags, fd) = match fd {
        Some(fd) => (libc::MAP_SHARED, fd),
        None => (libc::MAP_SHARED | libc::MAP_ANONYMOUS, -1),
    };

    // SAFETY: a fresh mapping chosen by the kernel; len was range-checked by
    // the caller and fd is either -1 or an open descriptor.
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            fd,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(SharedMemoryError::MapFailed {
            reason: io::Error::last_os_error().to_string(),
        });
    }
    NonNull::new(addr.cast::<u8>()).ok_or_else(|| SharedMemoryError::MapFailed {
        reason: "kernel returned a null mapping".to_string(),
    })
}

impl SharedMemoryRegion {
    /// Largest region this type will map (1 GiB).
    pub const MAX_SIZE: usize = 1 << 30;

    fn check_len(name: &str, len: usize) -> Result<(), SharedMemoryError> {
        if (1..=Self::MAX_SIZE).contains(&len) {
            Ok(())
        } else {
            Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("size {len} not in 1..={}", Self::MAX_SIZE),
            })
        }
    }

    /// Map a zero-filled region private to this process.
    pub fn anonymous(size: usize) -> Result<Self, SharedMemoryError> {
        Self::check_len("<anonymous>", size)?;
        let base = map(None, size)?;
        tracing::debug!(size, "Mapped anonymous region");
        Ok(Self {
            base,
            len: size,
            backing: Backing::Anonymous,
        })
    }

    /// Create and map a new named object of `size` bytes.
    ///
    /// Fails if an object with that name already exists. The object is
    /// unlinked again when the returned region is dropped.
    pub fn create(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        Self::check_len(name, size)?;
        let path = object_path(name)?;

        // SAFETY: path is NUL terminated; the flags are plain POSIX flags.
        let fd = unsafe {
            libc::shm_open(
                path.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            return Err(os_failure(name, "shm_open"));
        }

        // The new object is zero-filled by ftruncate, which the ring offsets
        // depend on.
        // SAFETY: fd was just opened read-write.
        let sized = if unsafe { libc::ftruncate(fd, size as libc::off_t) } < 0 {
            Err(os_failure(name, "ftruncate"))
        } else {
            map(Some(fd), size)
        };

        match sized {
            Ok(base) => {
                tracing::debug!(name = %name, size, "Created named region");
                Ok(Self {
                    base,
                    len: size,
                    backing: Backing::Named {
                        name: name.to_string(),
                        fd,
                    },
                })
            }
            Err(e) => {
                // SAFETY: fd is open and path names the object created above.
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(path.as_ptr());
                }
                Err(e)
            }
        }
    }

    /// Object name, `None` for anonymous regions.
    pub fn name(&self) -> Option<&str> {
        match &self.backing {
            Backing::Anonymous => None,
            Backing::Named { name, .. } => Some(name),
        }
    }

    pub fn size(&self) -> usize {
        self.len
    }

    /// Base pointer of the mapping. Callers synchronize access themselves.
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Base address, used for alignment checks.
    pub fn address(&self) -> usize {
        self.base.as_ptr() as usize
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // SAFETY: base and len describe the mapping made at construction.
        if unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) } < 0 {
            tracing::error!(error = %io::Error::last_os_error(), "munmap failed");
        }

        if let Backing::Named { name, fd } = &self.backing {
            // SAFETY: fd has been open since construction and is closed once.
            unsafe { libc::close(*fd) };
            if let Ok(path) = object_path(name) {
                // SAFETY: path is NUL terminated.
                unsafe { libc::shm_unlink(path.as_ptr()) };
                tracing::debug!(name = %name, "Unlinked named region");
            }
        }
    }
}
