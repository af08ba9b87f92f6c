//! Numbered-file layout reconciliation.
//!
//! Messages are plain files named by decimal number at the mailbox
//! root. The filename carries no state, so flags are persisted inside
//! each message's header segment using the conventional `Status:` /
//! `X-Status:` headers, and a flag change is committed by rewriting the
//! file through a temp-then-rename in the same directory.
//!
//! Letter assignments follow the mbox ecosystem: `Status: R` seen and
//! `O` old; `X-Status: A` answered, `D` deleted, `F` flagged, `T`
//! draft. For already-known uids an incremental check trusts the
//! summary's flags; headers are re-read only when a message is
//! (re)imported.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::error::{MailboxError, Result};
use crate::model::flags::Flags;
use crate::model::record::Uid;
use crate::parser::envelope;
use crate::summary::store::Summary;

use super::{
    list_message_files, mark_all_pending, prune_pending, record_from_envelope, ChangeSink,
    ScanControl,
};

pub(crate) fn check(
    mailbox: &Path,
    summary: &mut Summary,
    sink: &mut dyn ChangeSink,
    ctrl: ScanControl<'_>,
    scan: &ScanConfig,
) -> Result<()> {
    mark_all_pending(summary);

    let mut names: Vec<(u64, String)> = list_message_files(mailbox)?
        .into_iter()
        .filter_map(|name| name.parse::<u64>().ok().map(|n| (n, name)))
        .collect();
    names.sort();

    let total = names.len() as u64;
    let interval = scan.progress_interval.max(1);
    let mut done = 0u64;

    for (_, name) in &names {
        ctrl.ensure_not_cancelled()?;

        let uid = Uid::from(name.as_str());
        if let Some(record) = summary.lookup_mut(&uid) {
            record.flags.remove(Flags::SCAN_PENDING);
        } else {
            let path = mailbox.join(name);
            let meta = fs::metadata(&path).map_err(|e| MailboxError::io(&path, e))?;
            let header = envelope::read_header_block(&path, scan.header_read_budget)?;
            let env = envelope::parse_envelope(&header);
            let flags = flags_from_status(env.status.as_deref(), env.x_status.as_deref());
            let record = record_from_envelope(env, &meta, uid.clone(), flags, name.clone());
            summary.insert(record);
            sink.added(&uid);
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

/// Rewrite the header segment of every message whose summary flags have
/// changed since its file was last written.
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
        let path = mailbox.join(&record.location);
        match rewrite_status(&path, record.flags) {
            Ok(()) => {
                debug!(uid = %uid, path = %path.display(), "Committed status headers");
                if let Some(record) = summary.lookup_mut(&uid) {
                    record.flags.remove(Flags::NEEDS_REWRITE);
                }
                summary.mark_changed();
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MailboxError::InconsistentState { uid, path });
            }
            Err(e) => {
                warn!(
                    uid = %uid,
                    path = %path.display(),
                    error = %e,
                    "Header rewrite failed; will retry next pass"
                );
            }
        }
    }
    Ok(())
}

/// Map `Status:` / `X-Status:` header values to flag bits.
pub(crate) fn flags_from_status(status: Option<&str>, x_status: Option<&str>) -> Flags {
    let mut flags = Flags::empty();
    for c in status.unwrap_or_default().chars() {
        if c == 'R' {
            flags.insert(Flags::SEEN);
        }
    }
    for c in x_status.unwrap_or_default().chars() {
        match c {
            'A' => flags.insert(Flags::ANSWERED),
            'D' => flags.insert(Flags::DELETED),
            'F' => flags.insert(Flags::FLAGGED),
            'T' => flags.insert(Flags::DRAFT),
            _ => {}
        }
    }
    flags
}

/// Canonical `Status:` / `X-Status:` values for a flag set.
pub(crate) fn status_chars(flags: Flags) -> (String, String) {
    let status = if flags.contains(Flags::SEEN) { "RO" } else { "O" };
    let mut x_status = String::new();
    for (c, bit) in [
        ('A', Flags::ANSWERED),
        ('D', Flags::DELETED),
        ('F', Flags::FLAGGED),
        ('T', Flags::DRAFT),
    ] {
        if flags.contains(bit) {
            x_status.push(c);
        }
    }
    (status.to_string(), x_status)
}

/// Replace the status headers of the message at `path` with ones
/// encoding `flags`, writing through a temp file in the same directory
/// and renaming over the original.
pub(crate) fn rewrite_status(path: &Path, flags: Flags) -> std::io::Result<()> {
    let data = fs::read(path)?;
    let body_start = envelope::header_end(&data).unwrap_or(data.len());
    let head = &data[..body_start];

    let mut out = Vec::with_capacity(data.len() + 32);
    let mut inserted = false;
    for line in head.split_inclusive(|&b| b == b'\n') {
        let bare = line.strip_suffix(b"\n").unwrap_or(line);
        let bare = bare.strip_suffix(b"\r").unwrap_or(bare);
        if bare.is_empty() {
            push_status_lines(&mut out, flags);
            inserted = true;
            out.extend_from_slice(line);
        } else if header_is(bare, b"status:") || header_is(bare, b"x-status:") {
            // replaced below
        } else {
            out.extend_from_slice(line);
        }
    }
    if !inserted {
        push_status_lines(&mut out, flags);
    }
    out.extend_from_slice(&data[body_start..]);

    let dir = path.parent().unwrap_or(Path::new("."));
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    let tmp = dir.join(format!(".{name}.{}.tmp", std::process::id()));
    fs::write(&tmp, &out)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn push_status_lines(out: &mut Vec<u8>, flags: Flags) {
    let (status, x_status) = status_chars(flags);
    out.extend_from_slice(format!("Status: {status}\n").as_bytes());
    if !x_status.is_empty() {
        out.extend_from_slice(format!("X-Status: {x_status}\n").as_bytes());
    }
}

fn header_is(line: &[u8], name: &[u8]) -> bool {
    line.len() >= name.len() && line[..name.len()].eq_ignore_ascii_case(name)
}

/// Read the optional `.folders` manifest listing known sub-mailboxes.
///
/// Blank lines and `#` comments are skipped; a missing manifest is an
/// empty list, not an error.
pub fn read_folder_manifest(root: &Path) -> Result<Vec<String>> {
    let path = root.join(".folders");
    match fs::read_to_string(&path) {
        Ok(text) => Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(String::from)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(MailboxError::io(path, e)),
    }
}
