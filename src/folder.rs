//! Folder façade: the boundary the rest of a mail client uses.
//!
//! One `Folder` owns the summary for one mailbox. The full
//! check/commit/expunge cycle runs under the combined three-mechanism
//! folder lock; read-only accessors (counts, record listing) take no
//! lock. A `Folder` is single-owner — if the surrounding application is
//! multi-threaded, it must serialize access itself, one mutex per open
//! mailbox.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{Config, ScanConfig};
use crate::error::{MailboxError, Result};
use crate::lock::{LockHandle, LockIntent, LockManager};
use crate::model::filename;
use crate::model::flags::Flags;
use crate::model::record::{MessageRecord, Uid};
use crate::reconcile::{self, ChangeSink, Layout, ScanControl};
use crate::summary::store::{LoadOutcome, Summary};

/// An open mailbox folder.
#[derive(Debug)]
pub struct Folder {
    path: PathBuf,
    layout: Layout,
    summary: Summary,
    locks: LockManager,
    /// Descriptor the kernel locks apply to: the summary side file,
    /// whose inode is stable because saves are in-place truncations.
    anchor: File,
    scan: ScanConfig,
    needs_full_rescan: bool,
}

impl Folder {
    /// Open an existing mailbox directory.
    ///
    /// Detects the storage layout and loads the persisted summary; a
    /// missing or unusable summary schedules a full rescan for the
    /// first check.
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Folder> {
        let path = path.as_ref().to_path_buf();
        let layout = Layout::detect(&path)?;

        let mut summary = Summary::new(&path);
        let anchor = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(summary.path())
            .map_err(|e| MailboxError::io(summary.path(), e))?;

        let outcome = summary.load(false)?;
        let needs_full_rescan = outcome == LoadOutcome::RescanNeeded;
        if needs_full_rescan {
            debug!(path = %path.display(), "Folder opened without usable summary");
        }

        Ok(Folder {
            path,
            layout,
            summary,
            locks: LockManager::new(config.lock.clone()),
            anchor,
            scan: config.scan.clone(),
            needs_full_rescan,
        })
    }

    /// Create a mailbox directory with the given layout, then open it.
    pub fn create(path: impl AsRef<Path>, layout: Layout, config: &Config) -> Result<Folder> {
        let path = path.as_ref();
        match layout {
            Layout::Maildir => {
                for dir in ["tmp", "new", "cur"] {
                    fs::create_dir_all(path.join(dir))
                        .map_err(|e| MailboxError::io(path.join(dir), e))?;
                }
            }
            Layout::Numbered => {
                fs::create_dir_all(path).map_err(|e| MailboxError::io(path, e))?;
            }
        }
        Self::open(path, config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    // ── Locking ─────────────────────────────────────────────────────

    /// Take the combined folder lock without running a pass. Released
    /// when the returned handle is dropped.
    pub fn lock(&self, intent: LockIntent) -> Result<LockHandle<'_>> {
        self.locks.lock_folder(&self.path, &self.anchor, intent)
    }

    // ── Summary lifecycle ───────────────────────────────────────────

    /// (Re)load the persisted summary, optionally forcing the next
    /// check to re-derive every record from scratch.
    pub fn load_summary(&mut self, force_rescan: bool) -> Result<()> {
        let outcome = self.summary.load(force_rescan)?;
        self.needs_full_rescan = outcome == LoadOutcome::RescanNeeded;
        Ok(())
    }

    /// Invalidate the summary: the next check re-derives all records.
    pub fn force_rescan(&mut self) {
        self.needs_full_rescan = true;
    }

    // ── Reconciliation ──────────────────────────────────────────────

    /// Incremental reconcile: converge the summary with the directory
    /// and report added/removed/flag-changed identifiers to `sink`.
    pub fn check(&mut self, sink: &mut dyn ChangeSink, ctrl: ScanControl<'_>) -> Result<()> {
        self.run_pass(false, false, sink, ctrl)
    }

    /// Check, then commit pending flag rewrites to disk, then (when
    /// `expunge` is set) physically delete messages flagged deleted.
    pub fn sync(
        &mut self,
        expunge: bool,
        sink: &mut dyn ChangeSink,
        ctrl: ScanControl<'_>,
    ) -> Result<()> {
        self.run_pass(true, expunge, sink, ctrl)
    }

    fn run_pass(
        &mut self,
        commit: bool,
        expunge: bool,
        sink: &mut dyn ChangeSink,
        ctrl: ScanControl<'_>,
    ) -> Result<()> {
        let force = self.needs_full_rescan;
        let Folder {
            path,
            layout,
            summary,
            locks,
            anchor,
            scan,
            ..
        } = self;

        let guard = locks.lock_folder(path, anchor, LockIntent::Write)?;

        if force {
            debug!(path = %path.display(), "Running forced full rescan");
            summary.clear();
        }

        let result = (|| -> Result<()> {
            layout.check(path, summary, sink, ctrl, scan)?;
            if commit {
                layout.commit(path, summary)?;
            }
            if expunge {
                reconcile::expunge_deleted(path, summary, sink)?;
            }
            if force || summary.is_dirty() {
                summary.save()?;
            }
            Ok(())
        })();

        guard.unlock();

        match result {
            Ok(()) => {
                self.needs_full_rescan = false;
                Ok(())
            }
            Err(e) => {
                // Discard the in-memory partial state; the on-disk
                // summary still holds the pre-pass records.
                warn!(path = %self.path.display(), error = %e, "Reconciliation pass aborted");
                self.needs_full_rescan =
                    !matches!(self.summary.load(false), Ok(LoadOutcome::Loaded));
                Err(e)
            }
        }
    }

    // ── Message operations ──────────────────────────────────────────

    /// Update flag bits on a record. In-memory only; the physical file
    /// is rewritten by the next `sync`.
    pub fn set_flags(&mut self, uid: &Uid, mask: Flags, value: bool) -> Result<bool> {
        self.summary.set_flags(uid, mask, value)
    }

    /// Deliver a new message into the mailbox and index it.
    ///
    /// Returns the assigned identifier. The message is written to a
    /// temporary location first and renamed into place, so no reader
    /// ever observes a partial message.
    pub fn add_message(&mut self, bytes: &[u8], flags: Flags) -> Result<Uid> {
        let Folder {
            path,
            layout,
            summary,
            locks,
            anchor,
            scan,
            ..
        } = self;

        let guard = locks.lock_folder(path, anchor, LockIntent::Write)?;
        let result = match layout {
            Layout::Maildir => deliver_maildir(path, summary, bytes, flags, scan),
            Layout::Numbered => deliver_numbered(path, summary, bytes, flags, scan),
        }
        .and_then(|uid| {
            summary.save()?;
            Ok(uid)
        });
        guard.unlock();
        result
    }

    // ── Read-only accessors (no folder lock) ────────────────────────

    pub fn lookup(&self, uid: &Uid) -> Option<&MessageRecord> {
        self.summary.lookup(uid)
    }

    /// Records in receipt order.
    pub fn records(&self) -> impl Iterator<Item = &MessageRecord> {
        self.summary.iter()
    }

    /// `(total, unseen)` message counts.
    pub fn counts(&self) -> (usize, usize) {
        (self.summary.len(), self.summary.unseen_count())
    }

    /// Absolute path of a message's physical file.
    pub fn message_path(&self, uid: &Uid) -> Option<PathBuf> {
        self.summary.lookup(uid).map(|r| r.path_in(&self.path))
    }
}

fn deliver_maildir(
    mailbox: &Path,
    summary: &mut Summary,
    bytes: &[u8],
    flags: Flags,
    scan: &ScanConfig,
) -> Result<Uid> {
    let uid = summary.next_uid();
    let name = filename::encode(uid.as_str(), flags);
    let tmp = mailbox.join("tmp").join(&name);
    fs::write(&tmp, bytes).map_err(|e| MailboxError::io(&tmp, e))?;

    let dst = mailbox.join("cur").join(&name);
    if let Err(e) = fs::rename(&tmp, &dst) {
        let _ = fs::remove_file(&tmp);
        return Err(MailboxError::io(dst, e));
    }

    let record = reconcile::build_record(&dst, uid.clone(), flags, format!("cur/{name}"), scan)?;
    summary.insert(record);
    Ok(uid)
}

fn deliver_numbered(
    mailbox: &Path,
    summary: &mut Summary,
    bytes: &[u8],
    flags: Flags,
    scan: &ScanConfig,
) -> Result<Uid> {
    let uid = summary.next_uid();
    let tmp = mailbox.join(format!(".{uid}.{}.tmp", std::process::id()));
    fs::write(&tmp, bytes).map_err(|e| MailboxError::io(&tmp, e))?;

    let dst = mailbox.join(uid.as_str());
    if let Err(e) = fs::rename(&tmp, &dst) {
        let _ = fs::remove_file(&tmp);
        return Err(MailboxError::io(dst, e));
    }

    reconcile::numbered::rewrite_status(&dst, flags).map_err(|e| MailboxError::io(&dst, e))?;

    let record =
        reconcile::build_record(&dst, uid.clone(), flags, uid.as_str().to_string(), scan)?;
    summary.insert(record);
    Ok(uid)
}
