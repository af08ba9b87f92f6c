//! Centralized error types for mailkeep.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::record::Uid;

/// All errors produced by the mailkeep library.
#[derive(Error, Debug)]
pub enum MailboxError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The path does not exist or is not a mailbox directory.
    #[error("Not a mailbox directory: {0}")]
    NotAMailbox(PathBuf),

    /// Another process holds the folder lock, or the retry budget ran out.
    /// Reported to users as "mailbox is busy, try again later".
    #[error("Mailbox is busy (could not lock '{path}')")]
    LockUnavailable { path: PathBuf },

    /// The filesystem does not support this locking mechanism.
    ///
    /// Absorbed inside the lock manager (warned once per process); callers
    /// of the folder-level operations never see this variant.
    #[error("Locking not supported on '{path}': {source}")]
    LockMechanismUnsupported {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The summary file is corrupt or was written by an incompatible version.
    /// Never propagates from `Summary::load`; it forces a full rescan instead.
    #[error("Corrupt or incompatible summary for '{path}': {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    /// A record's physical message vanished mid-commit (outside the pruning
    /// phase, where disappearance is expected).
    #[error("Message {uid} has no physical counterpart at '{path}'")]
    InconsistentState { uid: Uid, path: PathBuf },

    /// No record with this identifier exists in the summary.
    #[error("Unknown message identifier: {0}")]
    UnknownUid(Uid),

    /// The user cancelled the operation.
    #[error("Operation cancelled by user")]
    Cancelled,
}

/// Convenience alias for `Result<T, MailboxError>`.
pub type Result<T> = std::result::Result<T, MailboxError>;

impl MailboxError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `MailboxError`
/// when no path context is available (rare — prefer `MailboxError::io`).
impl From<std::io::Error> for MailboxError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
