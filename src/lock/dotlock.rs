//! Directory-entry ("dot") lock.
//!
//! The most portable of the three mechanisms: a file whose mere presence
//! at `<mailbox>.lock` signals exclusive ownership, visible even to
//! legacy tools that know nothing about kernel locks. Claiming works by
//! hard-linking a uniquely named temp file onto the lock path; on some
//! network filesystems the link call itself can report failure for a
//! link that actually happened, so the temp file's resulting link count
//! is the only trusted success signal.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::config::LockConfig;
use crate::error::{MailboxError, Result};

/// Suffix appended to the mailbox path to form the lock file path.
pub const LOCK_SUFFIX: &str = ".lock";

/// The canonical lock file path for a mailbox: `<mailbox>.lock`, a
/// sibling of the mailbox directory itself.
pub fn lock_path_for(mailbox: &Path) -> PathBuf {
    let name = mailbox.file_name().unwrap_or_default().to_string_lossy();
    mailbox.with_file_name(format!("{name}{LOCK_SUFFIX}"))
}

/// Claim the dot lock for `mailbox`.
///
/// Bounded retries with a fixed delay; before each retry an existing
/// lock file older than the staleness threshold is presumed abandoned by
/// a crashed holder and forcibly removed. Exhausting the retry budget is
/// reported as the mailbox being busy.
pub fn acquire(mailbox: &Path, config: &LockConfig) -> Result<()> {
    let lock_path = lock_path_for(mailbox);
    let dir = lock_path.parent().unwrap_or(Path::new("."));

    for attempt in 0..config.dot_retries.max(1) {
        if attempt > 0 {
            std::thread::sleep(config.retry_delay());
        }

        let tmp = dir.join(unique_tmp_name(attempt));
        if let Err(e) = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
        {
            return Err(MailboxError::io(&tmp, e));
        }

        // The return value is deliberately ignored: the link count check
        // below is the success signal.
        let _ = fs::hard_link(&tmp, &lock_path);

        let nlink = fs::metadata(&tmp).map(|m| m.nlink()).unwrap_or(0);
        let _ = fs::remove_file(&tmp);

        if nlink == 2 {
            debug!(path = %lock_path.display(), attempt, "Dot lock acquired");
            return Ok(());
        }

        remove_if_stale(&lock_path, config.stale_lock_secs);
    }

    Err(MailboxError::LockUnavailable {
        path: mailbox.to_path_buf(),
    })
}

/// Release the dot lock. Never fails loudly.
pub fn release(mailbox: &Path) {
    let lock_path = lock_path_for(mailbox);
    if let Err(e) = fs::remove_file(&lock_path) {
        debug!(path = %lock_path.display(), error = %e, "Dot lock release");
    }
}

/// Remove `lock_path` if its mtime is older than `stale_secs`.
fn remove_if_stale(lock_path: &Path, stale_secs: u64) {
    let Ok(meta) = fs::metadata(lock_path) else {
        return;
    };
    let age = meta
        .modified()
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .unwrap_or(Duration::ZERO);
    if age.as_secs() >= stale_secs {
        warn!(
            path = %lock_path.display(),
            age_secs = age.as_secs(),
            "Removing stale lock file"
        );
        let _ = fs::remove_file(lock_path);
    }
}

fn unique_tmp_name(attempt: u32) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!(".mklock-{}-{}-{}", std::process::id(), attempt, nanos)
}
