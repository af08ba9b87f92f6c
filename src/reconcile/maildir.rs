//! Maildir-layout reconciliation (`tmp/`, `new/`, `cur/`).
//!
//! Incoming messages land in `new/` and are renamed into `cur/` under a
//! canonical flag-encoded name on import. The uid is derived from the
//! incoming file's own base name, so the identifier matches what a
//! rescan would observe; the persisted counter is the fallback when
//! that name is already taken.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::error::{MailboxError, Result};
use crate::model::filename;
use crate::model::flags::Flags;
use crate::model::record::Uid;
use crate::summary::store::Summary;

use super::{
    build_record, list_message_files, mark_all_pending, prune_pending, ChangeSink, ScanControl,
};

/// What a `cur/` entry turned out to be once matched against the store.
enum Matched {
    Known { flags_changed: bool, moved: bool },
    Duplicate { merged: bool },
    Unknown,
}

pub(crate) fn check(
    mailbox: &Path,
    summary: &mut Summary,
    sink: &mut dyn ChangeSink,
    ctrl: ScanControl<'_>,
    scan: &ScanConfig,
) -> Result<()> {
    mark_all_pending(summary);

    let new_dir = mailbox.join("new");
    let cur_dir = mailbox.join("cur");
    let incoming = list_message_files(&new_dir)?;
    let current = list_message_files(&cur_dir)?;

    let total = (incoming.len() + current.len()) as u64;
    let interval = scan.progress_interval.max(1);
    let mut done = 0u64;

    // Import phase for the incoming area: move each message into cur/
    // under its canonical name, then index it. A failed rename leaves
    // the message in new/ for the next pass.
    for name in &incoming {
        ctrl.ensure_not_cancelled()?;

        let base = filename::uid_of(name).to_string();
        let (flags, _) = filename::decode(name, Flags::empty());
        let uid = if base.is_empty() || summary.lookup(&Uid::from(base.as_str())).is_some() {
            summary.next_uid()
        } else {
            Uid::from(base)
        };

        let canonical = filename::encode(uid.as_str(), flags);
        let src = new_dir.join(name);
        let dst = cur_dir.join(&canonical);
        if let Err(e) = fs::rename(&src, &dst) {
            warn!(
                path = %src.display(),
                error = %e,
                "Could not move incoming message; will retry next pass"
            );
            done += 1;
            continue;
        }

        let location = format!("cur/{canonical}");
        let record = build_record(&dst, uid.clone(), flags, location, scan)?;
        summary.insert(record);
        sink.added(&uid);

        done += 1;
        if done % interval == 0 {
            ctrl.report(done, total);
        }
    }

    // Current area: match by uid prefix, absorb externally changed
    // flags, index anything unknown.
    for name in &current {
        ctrl.ensure_not_cancelled()?;

        let uid = Uid::from(filename::uid_of(name));
        let location = format!("cur/{name}");

        let outcome = match summary.lookup_mut(&uid) {
            Some(record) if !record.flags.contains(Flags::SCAN_PENDING) => {
                let (merged, merged_any) = filename::decode(name, record.flags);
                if merged_any {
                    record.flags = merged;
                }
                Matched::Duplicate { merged: merged_any }
            }
            Some(record) => {
                record.flags.remove(Flags::SCAN_PENDING);
                let (merged, flags_changed) = filename::decode(name, record.flags);
                if flags_changed {
                    record.flags = merged;
                }
                let moved = record.location != location;
                if moved {
                    record.location = location.clone();
                }
                Matched::Known {
                    flags_changed,
                    moved,
                }
            }
            None => Matched::Unknown,
        };

        match outcome {
            Matched::Known {
                flags_changed,
                moved,
            } => {
                if flags_changed {
                    sink.flags_changed(&uid);
                }
                if flags_changed || moved {
                    summary.mark_changed();
                }
            }
            Matched::Duplicate { merged } => {
                warn!(uid = %uid, file = %name, "Duplicate message for uid, collapsing");
                if merged {
                    summary.mark_changed();
                }
            }
            Matched::Unknown => {
                let (flags, _) = filename::decode(name, Flags::empty());
                let record = build_record(&cur_dir.join(name), uid.clone(), flags, location, scan)?;
                summary.insert(record);
                sink.added(&uid);
            }
        }

        done += 1;
        if done % interval == 0 {
            ctrl.report(done, total);
        }
    }

    ctrl.report(total, total);

    prune_pending(summary, sink);
    summary.sort_by_receipt();
    Ok(())
}

/// Rename every message whose filename no longer encodes its flags.
///
/// A missing source file means another process took the message away
/// mid-commit; any other rename failure is logged and the record stays
/// marked for rewrite so a future pass retries it.
pub(crate) fn commit(mailbox: &Path, summary: &mut Summary) -> Result<()> {
    let pending: Vec<Uid> = summary
        .iter()
        .filter(|r| r.flags.contains(Flags::NEEDS_REWRITE))
        .map(|r| r.uid.clone())
        .collect();

    for uid in pending {
        let Some(record) = summary.lookup(&uid) else {
            continue;
        };
        let canonical = filename::encode(uid.as_str(), record.flags);
        let expected = format!("cur/{canonical}");
        if record.location == expected {
            if let Some(record) = summary.lookup_mut(&uid) {
                record.flags.remove(Flags::NEEDS_REWRITE);
            }
            summary.mark_changed();
            continue;
        }

        let src = mailbox.join(&record.location);
        let dst = mailbox.join(&expected);
        match fs::rename(&src, &dst) {
            Ok(()) => {
                debug!(uid = %uid, to = %expected, "Committed flag rename");
                if let Some(record) = summary.lookup_mut(&uid) {
                    record.location = expected;
                    record.flags.remove(Flags::NEEDS_REWRITE);
                }
                summary.mark_changed();
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MailboxError::InconsistentState { uid, path: src });
            }
            Err(e) => {
                warn!(
                    uid = %uid,
                    path = %src.display(),
                    error = %e,
                    "Flag rename failed; will retry next pass"
                );
            }
        }
    }
    Ok(())
}
