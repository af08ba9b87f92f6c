//! Portable advisory locking for mailbox folders.
//!
//! No single mechanism is reliable everywhere: kernel locks can be
//! silently unsupported (notably on network filesystems), and dot locks
//! alone do not protect against processes that only use kernel locks.
//! The folder-level lock is therefore the intersection of all three,
//! acquired record lock → whole-file lock → dot lock, with ordered
//! rollback on partial failure and reverse-order release.

pub mod dotlock;
pub mod kernel;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::config::LockConfig;
use crate::error::{MailboxError, Result};

/// What the caller intends to do while holding the lock.
///
/// Read intent takes shared kernel locks; write intent takes exclusive
/// ones. The dot lock has no shared mode and is always exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockIntent {
    Read,
    Write,
}

/// Process-wide record of which kernel mechanisms turned out to be
/// unsupported on the filesystems in use.
///
/// Initialized once when the [`LockManager`] is created, consulted on
/// every lock attempt, never reset. The first unsupported failure per
/// mechanism logs a warning; subsequent ones are silent, and the
/// mechanism degrades to best-effort for the rest of the process.
#[derive(Debug, Default)]
pub struct LockSupport {
    record_warned: AtomicBool,
    whole_file_warned: AtomicBool,
}

impl LockSupport {
    fn note_record_unsupported(&self, path: &Path, err: &MailboxError) {
        if !self.record_warned.swap(true, Ordering::Relaxed) {
            warn!(
                path = %path.display(),
                error = %err,
                "Record locking unsupported here; continuing without it"
            );
        }
    }

    fn note_whole_file_unsupported(&self, path: &Path, err: &MailboxError) {
        if !self.whole_file_warned.swap(true, Ordering::Relaxed) {
            warn!(
                path = %path.display(),
                error = %err,
                "Whole-file locking unsupported here; continuing without it"
            );
        }
    }
}

/// Acquires and releases the combined three-mechanism folder lock.
///
/// One instance should serve the whole process so the once-per-process
/// unsupported-mechanism warnings in [`LockSupport`] behave as
/// documented; multiple instances merely warn once each.
#[derive(Debug)]
pub struct LockManager {
    config: LockConfig,
    support: LockSupport,
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            support: LockSupport::default(),
        }
    }

    /// Acquire all three locks for `mailbox`, retrying the whole
    /// sequence a bounded number of times.
    ///
    /// `file` is the descriptor the kernel locks apply to (the summary
    /// side file); the dot lock guards `<mailbox>.lock`. On success the
    /// returned handle holds every mechanism the filesystem supports and
    /// releases them in reverse order when dropped.
    pub fn lock_folder<'f>(
        &self,
        mailbox: &Path,
        file: &'f File,
        intent: LockIntent,
    ) -> Result<LockHandle<'f>> {
        let mut last_err = None;
        for attempt in 0..self.config.folder_retries.max(1) {
            if attempt > 0 {
                std::thread::sleep(self.config.retry_delay());
            }
            match self.try_lock_once(mailbox, file, intent) {
                Ok(handle) => return Ok(handle),
                Err(e) => {
                    debug!(
                        path = %mailbox.display(),
                        attempt,
                        error = %e,
                        "Folder lock attempt failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(MailboxError::LockUnavailable {
            path: mailbox.to_path_buf(),
        }))
    }

    /// One pass of the record → whole-file → dot sequence.
    ///
    /// Partial acquisitions are rolled back by the handle's drop when an
    /// error is returned.
    fn try_lock_once<'f>(
        &self,
        mailbox: &Path,
        file: &'f File,
        intent: LockIntent,
    ) -> Result<LockHandle<'f>> {
        let mut handle = LockHandle {
            mailbox: mailbox.to_path_buf(),
            file,
            held_record: false,
            held_whole_file: false,
            held_dot: false,
        };

        match kernel::acquire_record_lock(mailbox, file, intent) {
            Ok(()) => handle.held_record = true,
            Err(e @ MailboxError::LockMechanismUnsupported { .. }) => {
                self.support.note_record_unsupported(mailbox, &e);
            }
            Err(e) => return Err(e),
        }

        match kernel::acquire_whole_file_lock(mailbox, file, intent) {
            Ok(()) => handle.held_whole_file = true,
            Err(e @ MailboxError::LockMechanismUnsupported { .. }) => {
                self.support.note_whole_file_unsupported(mailbox, &e);
            }
            Err(e) => return Err(e),
        }

        dotlock::acquire(mailbox, &self.config)?;
        handle.held_dot = true;

        Ok(handle)
    }
}

/// Which lock mechanisms are currently held for a (path, descriptor)
/// pair. Releasing happens in reverse acquisition order, on every exit
/// path, when the handle is dropped.
#[must_use = "the folder lock is released as soon as the handle is dropped"]
#[derive(Debug)]
pub struct LockHandle<'f> {
    mailbox: PathBuf,
    file: &'f File,
    held_record: bool,
    held_whole_file: bool,
    held_dot: bool,
}

impl LockHandle<'_> {
    /// Explicitly release the folder lock.
    pub fn unlock(self) {}

    fn release_all(&mut self) {
        if self.held_dot {
            dotlock::release(&self.mailbox);
            self.held_dot = false;
        }
        if self.held_whole_file {
            kernel::release_whole_file_lock(self.file);
            self.held_whole_file = false;
        }
        if self.held_record {
            kernel::release_record_lock(self.file);
            self.held_record = false;
        }
    }
}

impl Drop for LockHandle<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}
