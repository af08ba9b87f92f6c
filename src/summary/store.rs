//! Summary store: the ordered, uid-keyed record collection for one
//! mailbox, with load/save persistence.
//!
//! Load never fails on a bad summary file: absence, a format mismatch,
//! or a failed integrity check all degrade to "needs a full rescan",
//! because the mailbox directory is authoritative and the summary can
//! always be rebuilt from it.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{MailboxError, Result};
use crate::model::flags::Flags;
use crate::model::record::{MessageRecord, Uid};
use crate::summary::format::{SummaryHeader, HEADER_SIZE, MAGIC, VERSION};

/// Outcome of [`Summary::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The persisted summary was valid and is now in memory.
    Loaded,
    /// No usable summary exists; the caller must run a full rescan.
    RescanNeeded,
}

/// The persisted message index for one mailbox.
///
/// Owned exclusively by the folder that opened it; in-process sharing
/// must be serialized by the caller.
#[derive(Debug)]
pub struct Summary {
    mailbox: PathBuf,
    path: PathBuf,
    records: IndexMap<Uid, MessageRecord>,
    next_uid: u64,
    dirty: bool,
}

impl Summary {
    /// Create an empty, unloaded summary for `mailbox`.
    pub fn new(mailbox: &Path) -> Self {
        Self {
            mailbox: mailbox.to_path_buf(),
            path: summary_path_for(mailbox),
            records: IndexMap::new(),
            next_uid: 1,
            dirty: false,
        }
    }

    pub fn mailbox(&self) -> &Path {
        &self.mailbox
    }

    /// Path of the persisted summary side file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── Load / save ─────────────────────────────────────────────────

    /// Load the persisted summary.
    ///
    /// Returns [`LoadOutcome::RescanNeeded`] when the file is absent,
    /// its format version does not match, its integrity check fails, or
    /// the caller explicitly requests a rescan.
    pub fn load(&mut self, force_rescan: bool) -> Result<LoadOutcome> {
        self.records.clear();

        if force_rescan {
            debug!(path = %self.path.display(), "Rescan requested, skipping summary load");
            return Ok(LoadOutcome::RescanNeeded);
        }

        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No summary file");
                return Ok(LoadOutcome::RescanNeeded);
            }
            Err(e) => return Err(MailboxError::io(&self.path, e)),
        };

        // An empty file is what opening the lock anchor leaves behind
        // before the first save; not worth a corruption warning.
        if data.is_empty() {
            debug!(path = %self.path.display(), "Summary file not yet written");
            return Ok(LoadOutcome::RescanNeeded);
        }

        match self.decode(&data) {
            Ok(()) => {
                debug!(
                    path = %self.path.display(),
                    count = self.records.len(),
                    "Loaded summary"
                );
                Ok(LoadOutcome::Loaded)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Summary unusable, forcing rescan");
                self.records.clear();
                Ok(LoadOutcome::RescanNeeded)
            }
        }
    }

    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < HEADER_SIZE {
            return Err(self.corrupt("truncated header"));
        }

        let header: SummaryHeader = bincode::deserialize(&data[..HEADER_SIZE])
            .map_err(|e| self.corrupt(format!("header deserialization failed: {e}")))?;
        header.validate().map_err(|reason| self.corrupt(reason))?;

        let entry_bytes = &data[HEADER_SIZE..];
        let digest: [u8; 32] = Sha256::digest(entry_bytes).into();
        if digest != header.entries_sha256 {
            return Err(self.corrupt("entry checksum mismatch"));
        }

        let entries: Vec<MessageRecord> = bincode::deserialize(entry_bytes)
            .map_err(|e| self.corrupt(format!("entry deserialization failed: {e}")))?;
        if entries.len() as u64 != header.message_count {
            return Err(self.corrupt("message count mismatch"));
        }

        self.records = entries.into_iter().map(|r| (r.uid.clone(), r)).collect();
        self.next_uid = header.next_uid.max(1);
        self.dirty = false;
        Ok(())
    }

    fn corrupt(&self, reason: impl Into<String>) -> MailboxError {
        MailboxError::CorruptIndex {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    /// Persist the summary.
    ///
    /// The write is an in-place truncate so the file keeps its inode and
    /// any kernel lock held on its descriptor stays attached; a torn
    /// write is caught by the entry checksum on the next load.
    pub fn save(&mut self) -> Result<()> {
        let entries: Vec<MessageRecord> = self
            .records
            .values()
            .map(|r| {
                let mut r = r.clone();
                r.flags = r.flags.masked(Flags::PERSISTED);
                r
            })
            .collect();

        let entry_bytes = bincode::serialize(&entries)
            .map_err(|e| self.corrupt(format!("entry serialization failed: {e}")))?;

        let header = SummaryHeader {
            magic: *MAGIC,
            version: VERSION,
            flags: 0,
            message_count: entries.len() as u64,
            unseen_count: entries
                .iter()
                .filter(|r| !r.flags.contains(Flags::SEEN))
                .count() as u64,
            next_uid: self.next_uid,
            entries_sha256: Sha256::digest(&entry_bytes).into(),
        };
        let header_bytes = bincode::serialize(&header)
            .map_err(|e| self.corrupt(format!("header serialization failed: {e}")))?;

        let mut padded_header = vec![0u8; HEADER_SIZE];
        let copy_len = header_bytes.len().min(HEADER_SIZE);
        padded_header[..copy_len].copy_from_slice(&header_bytes[..copy_len]);

        let mut file = File::create(&self.path).map_err(|e| MailboxError::io(&self.path, e))?;
        file.write_all(&padded_header)
            .map_err(|e| MailboxError::io(&self.path, e))?;
        file.write_all(&entry_bytes)
            .map_err(|e| MailboxError::io(&self.path, e))?;
        file.flush().map_err(|e| MailboxError::io(&self.path, e))?;

        info!(
            path = %self.path.display(),
            count = entries.len(),
            "Summary written"
        );
        self.dirty = false;
        Ok(())
    }

    // ── Record access ───────────────────────────────────────────────

    pub fn lookup(&self, uid: &Uid) -> Option<&MessageRecord> {
        self.records.get(uid)
    }

    pub(crate) fn lookup_mut(&mut self, uid: &Uid) -> Option<&mut MessageRecord> {
        self.records.get_mut(uid)
    }

    /// Record at `index` in receipt order.
    pub fn at(&self, index: usize) -> Option<&MessageRecord> {
        self.records.get_index(index).map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageRecord> {
        self.records.values()
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut MessageRecord> {
        self.records.values_mut()
    }

    pub fn uids(&self) -> impl Iterator<Item = &Uid> {
        self.records.keys()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records without the seen flag.
    pub fn unseen_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| !r.flags.contains(Flags::SEEN))
            .count()
    }

    // ── Mutation ────────────────────────────────────────────────────

    pub fn insert(&mut self, record: MessageRecord) {
        if let Some(n) = record.uid.as_number() {
            self.raise_uid_floor(n);
        }
        self.records.insert(record.uid.clone(), record);
        self.dirty = true;
    }

    pub fn remove(&mut self, uid: &Uid) -> Option<MessageRecord> {
        let removed = self.records.shift_remove(uid);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Drop every record. The uid counter is kept; identifiers are never
    /// reused even across a rebuild.
    pub fn clear(&mut self) {
        if !self.records.is_empty() {
            self.dirty = true;
        }
        self.records.clear();
    }

    /// Update standard flag bits on a record and mark it for rewrite.
    ///
    /// Returns whether the flag set actually changed.
    pub fn set_flags(&mut self, uid: &Uid, mask: Flags, value: bool) -> Result<bool> {
        let record = self
            .records
            .get_mut(uid)
            .ok_or_else(|| MailboxError::UnknownUid(uid.clone()))?;
        let changed = record.flags.set(mask.masked(Flags::STANDARD), value);
        if changed {
            record.flags.insert(Flags::NEEDS_REWRITE);
            self.dirty = true;
        }
        Ok(changed)
    }

    /// Mark a record as needing its physical file rewritten.
    pub fn mark_for_rewrite(&mut self, uid: &Uid) -> Result<()> {
        let record = self
            .records
            .get_mut(uid)
            .ok_or_else(|| MailboxError::UnknownUid(uid.clone()))?;
        record.flags.insert(Flags::NEEDS_REWRITE);
        self.dirty = true;
        Ok(())
    }

    pub(crate) fn mark_changed(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Produce a fresh identifier from the persisted counter. Never
    /// returns a value already in use.
    pub fn next_uid(&mut self) -> Uid {
        let n = self.next_uid;
        self.next_uid += 1;
        self.dirty = true;
        Uid::from(n.to_string())
    }

    /// Keep the counter above an observed numeric identifier so that
    /// derived-from-filename uids never collide with generated ones.
    pub fn raise_uid_floor(&mut self, seen: u64) {
        if seen >= self.next_uid {
            self.next_uid = seen + 1;
            self.dirty = true;
        }
    }

    /// Re-sort records by their receipt-derived ordering key. Directory
    /// enumeration order is not meaningful.
    pub fn sort_by_receipt(&mut self) {
        self.records.sort_by(|_, a, _, b| {
            a.date_received
                .cmp(&b.date_received)
                .then_with(|| a.uid.cmp(&b.uid))
        });
    }
}

/// Summary side file path: hidden sibling of the mailbox directory.
///
/// Example: `/mail/INBOX` → `/mail/.INBOX.mailkeep.idx`
pub fn summary_path_for(mailbox: &Path) -> PathBuf {
    let name = mailbox.file_name().unwrap_or_default().to_string_lossy();
    mailbox.with_file_name(format!(".{name}.mailkeep.idx"))
}

/// Read the cached counts `(total, unseen)` from a summary header
/// without deserializing the entries. `None` if no usable summary
/// exists.
pub fn peek_counts(mailbox: &Path) -> Result<Option<(u64, u64)>> {
    let path = summary_path_for(mailbox);
    let mut file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MailboxError::io(&path, e)),
    };
    let mut buf = vec![0u8; HEADER_SIZE];
    if let Err(e) = file.read_exact(&mut buf) {
        debug!(path = %path.display(), error = %e, "Summary header short read");
        return Ok(None);
    }
    let header: SummaryHeader = match bincode::deserialize(&buf) {
        Ok(h) => h,
        Err(_) => return Ok(None),
    };
    if header.validate().is_err() {
        return Ok(None);
    }
    Ok(Some((header.message_count, header.unseen_count)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(uid: &str, flags: Flags, secs: i64) -> MessageRecord {
        MessageRecord {
            uid: Uid::from(uid),
            flags,
            date_received: Utc.timestamp_opt(secs, 0).single().unwrap(),
            location: format!("cur/{uid}:2,"),
            size: 100,
            subject: format!("subject {uid}"),
            from: "a@example.com".to_string(),
            message_id: format!("<{uid}@example.com>"),
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = dir.path().join("box");
        fs::create_dir(&mailbox).unwrap();

        let mut summary = Summary::new(&mailbox);
        summary.insert(record("1", Flags::SEEN, 1000));
        summary.insert(record("2", Flags::empty(), 2000));
        summary.save().unwrap();

        let mut reloaded = Summary::new(&mailbox);
        assert_eq!(reloaded.load(false).unwrap(), LoadOutcome::Loaded);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded
            .lookup(&Uid::from("1"))
            .unwrap()
            .flags
            .contains(Flags::SEEN));
        assert_eq!(reloaded.unseen_count(), 1);
    }

    #[test]
    fn missing_file_needs_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = dir.path().join("box");
        fs::create_dir(&mailbox).unwrap();

        let mut summary = Summary::new(&mailbox);
        assert_eq!(summary.load(false).unwrap(), LoadOutcome::RescanNeeded);
    }

    #[test]
    fn version_mismatch_needs_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = dir.path().join("box");
        fs::create_dir(&mailbox).unwrap();

        let mut summary = Summary::new(&mailbox);
        summary.insert(record("1", Flags::empty(), 1000));
        summary.save().unwrap();

        // Bump the version field in place (offset 8, little-endian u32).
        let mut data = fs::read(summary.path()).unwrap();
        data[8..12].copy_from_slice(&99u32.to_le_bytes());
        fs::write(summary.path(), &data).unwrap();

        let mut reloaded = Summary::new(&mailbox);
        assert_eq!(reloaded.load(false).unwrap(), LoadOutcome::RescanNeeded);
        assert!(reloaded.is_empty());
    }

    #[test]
    fn torn_write_needs_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = dir.path().join("box");
        fs::create_dir(&mailbox).unwrap();

        let mut summary = Summary::new(&mailbox);
        summary.insert(record("1", Flags::empty(), 1000));
        summary.insert(record("2", Flags::empty(), 2000));
        summary.save().unwrap();

        let data = fs::read(summary.path()).unwrap();
        fs::write(summary.path(), &data[..data.len() - 5]).unwrap();

        let mut reloaded = Summary::new(&mailbox);
        assert_eq!(reloaded.load(false).unwrap(), LoadOutcome::RescanNeeded);
    }

    #[test]
    fn scan_pending_is_not_persisted_but_needs_rewrite_is() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = dir.path().join("box");
        fs::create_dir(&mailbox).unwrap();

        let mut summary = Summary::new(&mailbox);
        summary.insert(record(
            "1",
            Flags::SEEN | Flags::NEEDS_REWRITE | Flags::SCAN_PENDING,
            1000,
        ));
        summary.save().unwrap();

        let mut reloaded = Summary::new(&mailbox);
        reloaded.load(false).unwrap();
        let flags = reloaded.lookup(&Uid::from("1")).unwrap().flags;
        assert!(flags.contains(Flags::NEEDS_REWRITE));
        assert!(!flags.contains(Flags::SCAN_PENDING));
    }

    #[test]
    fn next_uid_never_reuses_observed_values() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = dir.path().join("box");
        fs::create_dir(&mailbox).unwrap();

        let mut summary = Summary::new(&mailbox);
        summary.insert(record("41", Flags::empty(), 1000));
        assert_eq!(summary.next_uid().as_str(), "42");

        // Non-numeric uids do not disturb the counter.
        summary.insert(record("1733356800.P9.mx", Flags::empty(), 2000));
        assert_eq!(summary.next_uid().as_str(), "43");
    }

    #[test]
    fn peek_counts_matches_saved_state() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = dir.path().join("box");
        fs::create_dir(&mailbox).unwrap();

        assert_eq!(peek_counts(&mailbox).unwrap(), None);

        let mut summary = Summary::new(&mailbox);
        summary.insert(record("1", Flags::SEEN, 1000));
        summary.insert(record("2", Flags::empty(), 2000));
        summary.insert(record("3", Flags::empty(), 3000));
        summary.save().unwrap();

        assert_eq!(peek_counts(&mailbox).unwrap(), Some((3, 2)));
    }

    #[test]
    fn sort_by_receipt_orders_records() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = dir.path().join("box");
        fs::create_dir(&mailbox).unwrap();

        let mut summary = Summary::new(&mailbox);
        summary.insert(record("9", Flags::empty(), 3000));
        summary.insert(record("2", Flags::empty(), 1000));
        summary.insert(record("5", Flags::empty(), 2000));
        summary.sort_by_receipt();

        let uids: Vec<&str> = summary.iter().map(|r| r.uid.as_str()).collect();
        assert_eq!(uids, ["2", "5", "9"]);
    }
}
