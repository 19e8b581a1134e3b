// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! Region mapper: POSIX shared memory and persistent-file backing.
//!
//! Provides safe wrappers around `shm_open`/`open`, `ftruncate`, and `mmap`
//! for creating and mapping the bus region.
//!
//! # Region Lifecycle
//!
//! 1. One process creates the region with [`MapRegion::create`] (exclusive:
//!    fails if the backing object already exists)
//! 2. Peers map it with [`MapRegion::open`]
//! 3. The mapping is removed on drop; the backing object is NOT
//! 4. Whoever owns the bus name calls [`Backing::unlink`] on teardown
//!
//! # Naming Convention
//!
//! Shared-memory names must start with `/` and contain no other `/`.
//! Example: `/selenite_host0`. File backing takes any filesystem path and
//! persists the region across process exits.

use crate::{BusError, Result};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;

/// Names the object behind a mapped bus region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    /// POSIX shared memory object (`/dev/shm` on Linux). Volatile.
    Shm(String),
    /// Regular file of the same layout. Persists across process exits.
    File(PathBuf),
}

impl Backing {
    /// Shared-memory backing. The name must start with `/`, contain no
    /// other `/`, and be at most 255 bytes.
    pub fn shm(name: &str) -> Result<Self> {
        validate_shm_name(name)?;
        Ok(Self::Shm(name.to_string()))
    }

    /// Persistent-file backing at `path`.
    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        Self::File(path.as_ref().to_path_buf())
    }

    /// Remove the backing object. Idempotent: a missing object is not an
    /// error. The region stays usable for processes that still map it.
    pub fn unlink(&self) -> Result<()> {
        match self {
            Self::Shm(name) => {
                let c_name = to_cstring(name.as_bytes())?;
                // SAFETY: c_name is a valid null-terminated CString; shm_unlink
                // only touches the filesystem namespace.
                let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };
                if ret < 0 {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::NotFound {
                        return Err(BusError::SegmentOpen(err));
                    }
                }
                Ok(())
            }
            Self::File(path) => match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(BusError::SegmentOpen(e)),
            },
        }
    }

    /// Check whether the backing object currently exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        match self {
            Self::Shm(name) => {
                let Ok(c_name) = CString::new(name.as_bytes()) else {
                    return false;
                };
                // SAFETY: c_name is a valid null-terminated CString; O_RDONLY
                // probes existence without creating anything.
                let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
                if fd >= 0 {
                    // SAFETY: fd is valid (>= 0) and not used after this point.
                    unsafe { libc::close(fd) };
                    true
                } else {
                    false
                }
            }
            Self::File(path) => path.exists(),
        }
    }

    fn open_fd(&self, create_excl: bool) -> Result<libc::c_int> {
        let (c_name, is_shm) = match self {
            Self::Shm(name) => (to_cstring(name.as_bytes())?, true),
            Self::File(path) => (to_cstring(path.as_os_str().as_bytes())?, false),
        };

        let flags = if create_excl {
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL
        } else {
            libc::O_RDWR
        };

        // SAFETY: c_name is a valid null-terminated CString; flags and the
        // 0o600 mode are plain POSIX open parameters. Both calls return a
        // valid fd on success or -1 on error (checked by the caller).
        let fd = unsafe {
            if is_shm {
                libc::shm_open(c_name.as_ptr(), flags, 0o600)
            } else {
                libc::open(c_name.as_ptr(), flags, 0o600)
            }
        };

        if fd < 0 {
            let err = io::Error::last_os_error();
            return Err(if create_excl {
                BusError::SegmentCreate(err)
            } else {
                BusError::SegmentOpen(err)
            });
        }
        Ok(fd)
    }
}

impl std::fmt::Display for Backing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shm(name) => write!(f, "shm:{name}"),
            Self::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// A mapped bus region.
///
/// Automatically unmaps the memory on drop. Does NOT unlink the backing
/// object (that is [`Backing::unlink`], the creator's responsibility).
pub struct MapRegion {
    /// Pointer to the mapped memory
    ptr: *mut u8,
    /// Size of the mapping
    size: usize,
    /// What the mapping is backed by (kept for diagnostics)
    backing: Backing,
}

// SAFETY: MapRegion points at shared memory accessed from multiple
// threads/processes. The structures layered on top coordinate exclusively
// through atomics and the per-slot seqlock.
unsafe impl Send for MapRegion {}
unsafe impl Sync for MapRegion {}

impl MapRegion {
    /// Create the backing object exclusively, size it, and map it.
    ///
    /// Fails with [`BusError::SegmentCreate`] if the object already exists.
    pub fn create(backing: &Backing, size: usize) -> Result<Self> {
        let fd = backing.open_fd(true)?;

        // SAFETY: fd is a valid descriptor from the successful open above;
        // ftruncate sizes the fresh object and fails gracefully on bad sizes.
        let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still valid; close exactly once on the error path.
            unsafe { libc::close(fd) };
            let _ = backing.unlink();
            return Err(BusError::SegmentCreate(err));
        }

        let ptr = map_fd(fd, size)?;

        // Fresh shm/file bytes are already zero after ftruncate; the explicit
        // wipe also faults the pages in before the first writer arrives.
        // SAFETY: ptr is a valid PROT_WRITE mapping of exactly `size` bytes
        // with no other references yet (the object was created exclusively).
        unsafe {
            ptr::write_bytes(ptr, 0, size);
        }

        log::debug!("[segment] created {backing} ({size} bytes)");
        Ok(Self {
            ptr,
            size,
            backing: backing.clone(),
        })
    }

    /// Map an existing backing object at its current size.
    pub fn open(backing: &Backing) -> Result<Self> {
        let fd = backing.open_fd(false)?;

        let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
        // SAFETY: fd is valid and st points to properly-sized stat storage.
        let ret = unsafe { libc::fstat(fd, st.as_mut_ptr()) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still valid; close exactly once on the error path.
            unsafe { libc::close(fd) };
            return Err(BusError::SegmentOpen(err));
        }
        // SAFETY: fstat succeeded, so the stat struct is fully initialized.
        let size = unsafe { st.assume_init() }.st_size as usize;

        let ptr = map_fd(fd, size)?;
        log::debug!("[segment] opened {backing} ({size} bytes)");
        Ok(Self {
            ptr,
            size,
            backing: backing.clone(),
        })
    }

    /// Get raw pointer to the mapped memory
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Get the size of the mapping
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The backing object this region maps
    #[inline]
    #[must_use]
    pub fn backing(&self) -> &Backing {
        &self.backing
    }
}

impl Drop for MapRegion {
    fn drop(&mut self) {
        // SAFETY: self.ptr/self.size came from a successful mmap and Drop
        // runs at most once. The backing object is deliberately left alone.
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.size);
        }
    }
}

/// mmap an fd read-write-shared and close the fd (the mapping holds the
/// reference from here on).
fn map_fd(fd: libc::c_int, size: usize) -> Result<*mut u8> {
    // SAFETY: null addr lets the kernel place the mapping; PROT/MAP flags are
    // the standard read-write shared combination; fd is valid per the caller;
    // MAP_FAILED is checked below.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };

    // SAFETY: fd is valid; after mmap (success or failure) the descriptor is
    // no longer needed because the mapping, if any, keeps its own reference.
    unsafe { libc::close(fd) };

    if ptr == libc::MAP_FAILED {
        return Err(BusError::Mmap(io::Error::last_os_error()));
    }
    Ok(ptr.cast::<u8>())
}

fn to_cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes)
        .map_err(|_| BusError::InvalidName(String::from_utf8_lossy(bytes).into_owned()))
}

/// Validate a shared-memory name follows POSIX rules
fn validate_shm_name(name: &str) -> Result<()> {
    if !name.starts_with('/') {
        return Err(BusError::InvalidName(format!(
            "shm name must start with '/': {name}"
        )));
    }
    if name.len() > 1 && name[1..].contains('/') {
        return Err(BusError::InvalidName(format!(
            "shm name cannot contain '/' after prefix: {name}"
        )));
    }
    if name.len() > 255 {
        return Err(BusError::InvalidName(format!(
            "shm name too long (max 255): {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/selenite_test_{ts}")
    }

    #[test]
    fn test_validate_name_valid() {
        assert!(Backing::shm("/foo").is_ok());
        assert!(Backing::shm("/selenite_host0").is_ok());
    }

    #[test]
    fn test_validate_name_no_leading_slash() {
        assert!(Backing::shm("foo").is_err());
    }

    #[test]
    fn test_validate_name_embedded_slash() {
        assert!(Backing::shm("/foo/bar").is_err());
    }

    #[test]
    fn test_create_is_exclusive() {
        let backing = Backing::shm(&unique_name()).unwrap();

        let first = MapRegion::create(&backing, 4096).expect("first create");
        let second = MapRegion::create(&backing, 4096);
        assert!(matches!(second, Err(BusError::SegmentCreate(_))));

        drop(first);
        backing.unlink().ok();
    }

    #[test]
    fn test_create_and_open_share_bytes() {
        let backing = Backing::shm(&unique_name()).unwrap();
        let size = 4096;

        let seg1 = MapRegion::create(&backing, size).expect("create");
        assert_eq!(seg1.size(), size);

        // SAFETY: seg1 was just created with 4096 bytes, offsets 0/1 valid.
        unsafe {
            *seg1.as_ptr() = 0x42;
            *seg1.as_ptr().add(1) = 0x43;
        }

        let seg2 = MapRegion::open(&backing).expect("open");
        assert_eq!(seg2.size(), size);

        // SAFETY: seg2 maps the same object; offsets 0/1 were written above.
        unsafe {
            assert_eq!(*seg2.as_ptr(), 0x42);
            assert_eq!(*seg2.as_ptr().add(1), 0x43);
        }

        drop(seg1);
        drop(seg2);
        backing.unlink().ok();
    }

    #[test]
    fn test_open_nonexistent() {
        let backing = Backing::shm("/selenite_nonexistent_12345").unwrap();
        assert!(matches!(
            MapRegion::open(&backing),
            Err(BusError::SegmentOpen(_))
        ));
    }

    #[test]
    fn test_unlink_idempotent() {
        let backing = Backing::shm(&unique_name()).unwrap();

        let _seg = MapRegion::create(&backing, 4096).expect("create");
        assert!(backing.unlink().is_ok());
        assert!(backing.unlink().is_ok());
    }

    #[test]
    fn test_exists() {
        let backing = Backing::shm(&unique_name()).unwrap();
        assert!(!backing.exists());

        let _seg = MapRegion::create(&backing, 4096).expect("create");
        assert!(backing.exists());

        backing.unlink().ok();
    }
}
