//! Exclusive lock on a resolver directory.
//!
//! Only one process may own a durable resolver; the lock is released when
//! the [`FileLock`] is dropped (closing the file drops the OS lock).

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Attempts to take the lock without blocking.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if another owner holds the lock
    pub fn acquire(dir: &Path) -> IoResult<Self> {
        let path = dir.join(".lock");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        Self::try_lock(&file)?;

        Ok(Self { _file: file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::unix::io::AsRawFd;

        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = IoError::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(IoError::new(
                    ErrorKind::WouldBlock,
                    "resolver directory is locked by another owner",
                ));
            }
            return Err(err);
        }
        Ok(())
    }

    #[cfg(windows)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let result = unsafe {
            let mut overlapped = std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>();
            LockFileEx(
                handle,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };
        if result == 0 {
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("resolver directory is locked by another owner: {}", IoError::last_os_error()),
            ));
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> IoResult<()> {
        Err(IoError::new(
            ErrorKind::Unsupported,
            "file locking not supported on this platform",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        {
            let lock = FileLock::acquire(dir.path()).unwrap();
            assert!(lock.path().exists());
        }
        assert!(FileLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_second_owner_is_refused() {
        let dir = tempdir().unwrap();
        let _held = FileLock::acquire(dir.path()).unwrap();
        let err = FileLock::acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }
}
