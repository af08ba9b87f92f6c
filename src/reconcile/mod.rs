//! Mailbox reconciliation.
//!
//! A pass converges the summary store and the on-disk directory after
//! any party has mutated either: Scanning → Diffing → Importing →
//! Pruning → Committing. Diffing works through the SCAN_PENDING bit —
//! every record is marked pending up front, matched records are
//! unmarked, and whatever is still pending after the scan has vanished
//! from disk and gets pruned. An I/O failure aborts the pass and leaves
//! the persisted summary untouched.

pub mod maildir;
pub mod numbered;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::error::{MailboxError, Result};
use crate::model::flags::Flags;
use crate::model::record::{MessageRecord, Uid};
use crate::parser::envelope;
use crate::summary::store::Summary;

/// Identifiers affected by a reconciliation pass.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    pub added: Vec<Uid>,
    pub removed: Vec<Uid>,
    pub flags_changed: Vec<Uid>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.flags_changed.is_empty()
    }
}

/// Receiver for per-message change notifications during a pass.
pub trait ChangeSink {
    fn added(&mut self, uid: &Uid);
    fn removed(&mut self, uid: &Uid);
    fn flags_changed(&mut self, uid: &Uid);
}

impl ChangeSink for ChangeSet {
    fn added(&mut self, uid: &Uid) {
        self.added.push(uid.clone());
    }

    fn removed(&mut self, uid: &Uid) {
        self.removed.push(uid.clone());
    }

    fn flags_changed(&mut self, uid: &Uid) {
        self.flags_changed.push(uid.clone());
    }
}

/// Cooperative progress reporting and cancellation for long scans.
///
/// The reconciler checks for cancellation between per-message steps and
/// aborts cleanly; the caller then discards the in-memory partial state.
#[derive(Clone, Copy, Default)]
pub struct ScanControl<'a> {
    /// Called with `(done, total)` message counts.
    pub progress: Option<&'a dyn Fn(u64, u64)>,
    /// Set to true to request cancellation.
    pub cancel: Option<&'a AtomicBool>,
}

impl ScanControl<'_> {
    pub(crate) fn ensure_not_cancelled(&self) -> Result<()> {
        match self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(MailboxError::Cancelled),
            _ => Ok(()),
        }
    }

    pub(crate) fn report(&self, done: u64, total: u64) {
        if let Some(progress) = self.progress {
            progress(done, total);
        }
    }
}

/// Storage layout of a mailbox directory. A small closed set; adding a
/// layout means adding a variant here and its module next to the
/// existing two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Message files named by decimal number at the mailbox root; flags
    /// persisted in `Status:`/`X-Status:` headers.
    Numbered,
    /// `tmp/`, `new/`, `cur/` subdirectories; flags encoded in the
    /// filename suffix.
    Maildir,
}

impl Layout {
    /// Detect the layout of an existing mailbox directory.
    pub fn detect(mailbox: &Path) -> Result<Layout> {
        let meta = match fs::metadata(mailbox) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MailboxError::NotAMailbox(mailbox.to_path_buf()))
            }
            Err(e) => return Err(MailboxError::io(mailbox, e)),
        };
        if !meta.is_dir() {
            return Err(MailboxError::NotAMailbox(mailbox.to_path_buf()));
        }
        let is_maildir = ["tmp", "new", "cur"]
            .iter()
            .all(|d| mailbox.join(d).is_dir());
        Ok(if is_maildir {
            Layout::Maildir
        } else {
            Layout::Numbered
        })
    }

    /// Run the scan/diff/import/prune phases of a pass.
    pub(crate) fn check(
        self,
        mailbox: &Path,
        summary: &mut Summary,
        sink: &mut dyn ChangeSink,
        ctrl: ScanControl<'_>,
        scan: &ScanConfig,
    ) -> Result<()> {
        match self {
            Layout::Maildir => maildir::check(mailbox, summary, sink, ctrl, scan),
            Layout::Numbered => numbered::check(mailbox, summary, sink, ctrl, scan),
        }
    }

    /// Write pending flag changes back to the physical messages.
    pub(crate) fn commit(self, mailbox: &Path, summary: &mut Summary) -> Result<()> {
        match self {
            Layout::Maildir => maildir::commit(mailbox, summary),
            Layout::Numbered => numbered::commit(mailbox, summary),
        }
    }
}

// ── Shared pass phases ──────────────────────────────────────────

/// Mark every record "not yet seen this scan".
pub(crate) fn mark_all_pending(summary: &mut Summary) {
    for record in summary.records_mut() {
        record.flags.insert(Flags::SCAN_PENDING);
    }
}

/// Remove every record still pending after a scan: its physical message
/// vanished from disk.
pub(crate) fn prune_pending(summary: &mut Summary, sink: &mut dyn ChangeSink) {
    let vanished: Vec<Uid> = summary
        .iter()
        .filter(|r| r.flags.contains(Flags::SCAN_PENDING))
        .map(|r| r.uid.clone())
        .collect();
    for uid in vanished {
        debug!(uid = %uid, "Message vanished from disk, pruning record");
        summary.remove(&uid);
        sink.removed(&uid);
    }
}

/// Physically delete every message flagged deleted and drop its record.
/// A file that is already absent is not an error here.
pub(crate) fn expunge_deleted(
    mailbox: &Path,
    summary: &mut Summary,
    sink: &mut dyn ChangeSink,
) -> Result<()> {
    let doomed: Vec<Uid> = summary
        .iter()
        .filter(|r| r.flags.contains(Flags::DELETED))
        .map(|r| r.uid.clone())
        .collect();
    for uid in doomed {
        let Some(record) = summary.lookup(&uid) else {
            continue;
        };
        let path = record.path_in(mailbox);
        match fs::remove_file(&path) {
            Ok(()) => debug!(uid = %uid, path = %path.display(), "Expunged message"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(uid = %uid, path = %path.display(), "Message already gone")
            }
            Err(e) => return Err(MailboxError::io(path, e)),
        }
        summary.remove(&uid);
        sink.removed(&uid);
    }
    Ok(())
}

// ── Shared import helpers ───────────────────────────────────────

/// Build a record for a physical message by reading its header segment.
pub(crate) fn build_record(
    path: &Path,
    uid: Uid,
    flags: Flags,
    location: String,
    scan: &ScanConfig,
) -> Result<MessageRecord> {
    let meta = fs::metadata(path).map_err(|e| MailboxError::io(path, e))?;
    let header = envelope::read_header_block(path, scan.header_read_budget)?;
    let env = envelope::parse_envelope(&header);
    Ok(record_from_envelope(env, &meta, uid, flags, location))
}

/// Assemble a record from an already-parsed envelope.
pub(crate) fn record_from_envelope(
    env: envelope::Envelope,
    meta: &fs::Metadata,
    uid: Uid,
    flags: Flags,
    location: String,
) -> MessageRecord {
    let date_received = date_received(&uid, env.date, meta);
    MessageRecord {
        uid,
        flags,
        date_received,
        location,
        size: meta.len(),
        subject: env.subject,
        from: env.from,
        message_id: env.message_id,
    }
}

/// Receipt date for a message: the timestamp embedded in its identifier
/// where one exists, else the `Date:` header, else file metadata.
pub(crate) fn date_received(
    uid: &Uid,
    header_date: Option<DateTime<Utc>>,
    meta: &fs::Metadata,
) -> DateTime<Utc> {
    if let Some(ts) = uid_timestamp(uid) {
        return ts;
    }
    if let Some(date) = header_date {
        return date;
    }
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// Maildir-style identifiers start with the delivery's Unix timestamp
/// (`<secs>.<unique>`). Accept only values in a plausible range so a
/// small decimal uid is never mistaken for one.
fn uid_timestamp(uid: &Uid) -> Option<DateTime<Utc>> {
    let head = uid.as_str().split('.').next()?;
    if uid.as_str().len() == head.len() {
        return None;
    }
    let secs: i64 = head.parse().ok()?;
    if !(631_152_000..4_102_444_800).contains(&secs) {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

/// Regular, non-hidden file names in `dir`, sorted.
pub(crate) fn list_message_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| MailboxError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| MailboxError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| MailboxError::io(dir, e))?;
        if !file_type.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) if name.starts_with('.') => {}
            Ok(name) => names.push(name),
            Err(os_name) => {
                warn!(dir = %dir.display(), name = ?os_name, "Skipping non-UTF-8 filename")
            }
        }
    }
    names.sort();
    Ok(names)
}
