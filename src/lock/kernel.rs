//! Kernel advisory locks on an open descriptor.
//!
//! Two independent mechanisms: a `fcntl` record lock covering the whole
//! file (`l_len == 0` extends the range however far the file grows) and a
//! `flock` whole-file lock. Both are applied non-blocking; the bounded
//! retry loop lives in the folder-level combinator, not here.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::error::{MailboxError, Result};

use super::LockIntent;

/// Classify an OS locking failure.
///
/// A held lock shows up as EACCES/EAGAIN; a filesystem that cannot do
/// kernel locking at all (common on network mounts) reports one of a
/// small set of "not supported" codes, which callers treat as
/// best-effort rather than failure.
fn classify(path: &Path, err: std::io::Error) -> MailboxError {
    let code = err.raw_os_error().unwrap_or(0);
    if code == libc::ENOLCK
        || code == libc::EINVAL
        || code == libc::ENOSYS
        || code == libc::EOPNOTSUPP
    {
        MailboxError::LockMechanismUnsupported {
            path: path.to_path_buf(),
            source: err,
        }
    } else if code == libc::EACCES || code == libc::EAGAIN {
        MailboxError::LockUnavailable {
            path: path.to_path_buf(),
        }
    } else {
        MailboxError::io(path, err)
    }
}

// # man fcntl
fn set_record_lock(file: &File, l_type: libc::c_short) -> std::io::Result<()> {
    let fd: libc::c_int = file.as_raw_fd();
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = l_type;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = 0;
    fl.l_len = 0;
    let ret = unsafe { libc::fcntl(fd, libc::F_SETLK, &fl) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn flock_op(file: &File, op: libc::c_int) -> std::io::Result<()> {
    let ret = unsafe { libc::flock(file.as_raw_fd(), op) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Apply a non-blocking record lock (shared for read intent, exclusive
/// for write intent) on the descriptor.
pub fn acquire_record_lock(path: &Path, file: &File, intent: LockIntent) -> Result<()> {
    let l_type = match intent {
        LockIntent::Read => libc::F_RDLCK,
        LockIntent::Write => libc::F_WRLCK,
    };
    set_record_lock(file, l_type as libc::c_short).map_err(|e| classify(path, e))
}

/// Drop the record lock. Best-effort.
pub fn release_record_lock(file: &File) {
    if let Err(e) = set_record_lock(file, libc::F_UNLCK as libc::c_short) {
        tracing::debug!(error = %e, "Record unlock failed");
    }
}

/// Apply a non-blocking whole-file advisory lock per intent.
pub fn acquire_whole_file_lock(path: &Path, file: &File, intent: LockIntent) -> Result<()> {
    let op = match intent {
        LockIntent::Read => libc::LOCK_SH,
        LockIntent::Write => libc::LOCK_EX,
    };
    flock_op(file, op | libc::LOCK_NB).map_err(|e| classify(path, e))
}

/// Drop the whole-file lock. Best-effort.
pub fn release_whole_file_lock(file: &File) {
    if let Err(e) = flock_op(file, libc::LOCK_UN) {
        tracing::debug!(error = %e, "Whole-file unlock failed");
    }
}
