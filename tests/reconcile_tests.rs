//! Integration tests for mailbox reconciliation over both layouts.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use assert_fs::prelude::*;
use predicates::prelude::*;

use mailkeep::config::Config;
use mailkeep::folder::Folder;
use mailkeep::model::flags::Flags;
use mailkeep::model::record::Uid;
use mailkeep::reconcile::{ChangeSet, Layout, ScanControl};
use mailkeep::summary::store;

fn test_config() -> Config {
    let mut config = Config::default();
    config.lock.dot_retries = 1;
    config.lock.folder_retries = 1;
    config.lock.retry_delay_ms = 0;
    config
}

fn message(subject: &str) -> String {
    format!(
        "From: sender@example.com\n\
Subject: {subject}\n\
Message-ID: <{subject}@example.com>\n\
Date: Tue, 05 Aug 2025 10:00:00 +0000\n\
\n\
Body of {subject}.\n"
    )
}

fn make_maildir(root: &Path) {
    for dir in ["tmp", "new", "cur"] {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
}

fn check(folder: &mut Folder) -> ChangeSet {
    let mut changes = ChangeSet::default();
    folder.check(&mut changes, ScanControl::default()).unwrap();
    changes
}

fn sync(folder: &mut Folder, expunge: bool) -> ChangeSet {
    let mut changes = ChangeSet::default();
    folder
        .sync(expunge, &mut changes, ScanControl::default())
        .unwrap();
    changes
}

// ─── Maildir: import from new/ ──────────────────────────────────────

#[test]
fn incoming_messages_move_to_cur_under_canonical_names() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    make_maildir(mailbox.path());
    mailbox
        .child("new/1733356800.a.mx")
        .write_str(&message("one"))
        .unwrap();
    mailbox
        .child("new/1733356900.b.mx:2,S")
        .write_str(&message("two"))
        .unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    let changes = check(&mut folder);

    assert_eq!(changes.added.len(), 2);
    assert!(changes.removed.is_empty());
    mailbox
        .child("new/1733356800.a.mx")
        .assert(predicate::path::missing());
    mailbox
        .child("cur/1733356800.a.mx:2,")
        .assert(predicate::path::exists());
    mailbox
        .child("cur/1733356900.b.mx:2,S")
        .assert(predicate::path::exists());

    let seen = folder.lookup(&Uid::from("1733356900.b.mx")).unwrap();
    assert!(seen.flags.contains(Flags::SEEN));
    let unseen = folder.lookup(&Uid::from("1733356800.a.mx")).unwrap();
    assert!(!unseen.flags.contains(Flags::SEEN));
    assert_eq!(unseen.subject, "one");
    assert_eq!(unseen.from, "sender@example.com");
}

// ─── Idempotence ────────────────────────────────────────────────────

#[test]
fn second_check_without_changes_is_empty() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    make_maildir(mailbox.path());
    mailbox
        .child("new/1733356800.a.mx")
        .write_str(&message("one"))
        .unwrap();
    mailbox
        .child("cur/1733356900.b.mx:2,S")
        .write_str(&message("two"))
        .unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    let first = check(&mut folder);
    assert_eq!(first.added.len(), 2);

    let second = check(&mut folder);
    assert!(second.is_empty(), "second check must be a no-op: {second:?}");
}

// ─── Completeness: records ↔ files bijection ────────────────────────

#[test]
fn every_record_resolves_to_exactly_one_file() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    make_maildir(mailbox.path());
    for i in 0..5 {
        mailbox
            .child(format!("new/17333568{i:02}.m{i}.mx"))
            .write_str(&message(&format!("msg{i}")))
            .unwrap();
    }

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    check(&mut folder);

    let (total, _) = folder.counts();
    assert_eq!(total, 5);
    for record in folder.records() {
        let path = folder.message_path(&record.uid).unwrap();
        assert!(path.exists(), "missing physical message for {}", record.uid);
    }
    let cur_files = fs::read_dir(mailbox.path().join("cur")).unwrap().count();
    assert_eq!(cur_files, total);
}

// ─── Pruning ────────────────────────────────────────────────────────

#[test]
fn out_of_band_delete_is_pruned_and_reported_once() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    make_maildir(mailbox.path());
    mailbox
        .child("cur/1733356800.a.mx:2,")
        .write_str(&message("one"))
        .unwrap();
    mailbox
        .child("cur/1733356900.b.mx:2,S")
        .write_str(&message("two"))
        .unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    check(&mut folder);

    // Another process deletes a message behind our back.
    fs::remove_file(mailbox.path().join("cur/1733356800.a.mx:2,")).unwrap();

    let changes = check(&mut folder);
    assert_eq!(
        changes.removed,
        vec![Uid::from("1733356800.a.mx")],
        "prune must be reported exactly once"
    );
    assert!(check(&mut folder).is_empty());
    assert_eq!(folder.counts().0, 1);
}

// ─── External flag changes ──────────────────────────────────────────

#[test]
fn external_rename_adds_flag_bits() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    make_maildir(mailbox.path());
    mailbox
        .child("cur/1733356800.a.mx:2,")
        .write_str(&message("one"))
        .unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    check(&mut folder);

    // Another client marks the message seen by renaming it.
    fs::rename(
        mailbox.path().join("cur/1733356800.a.mx:2,"),
        mailbox.path().join("cur/1733356800.a.mx:2,S"),
    )
    .unwrap();

    let uid = Uid::from("1733356800.a.mx");
    let changes = check(&mut folder);
    assert_eq!(changes.flags_changed, vec![uid.clone()]);
    let record = folder.lookup(&uid).unwrap();
    assert!(record.flags.contains(Flags::SEEN));
    assert_eq!(record.location, "cur/1733356800.a.mx:2,S");
}

// ─── Sync with expunge: the three-message scenario ──────────────────

#[test]
fn sync_expunge_removes_deleted_messages() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    make_maildir(mailbox.path());
    mailbox
        .child("cur/m1:2,S")
        .write_str(&message("seen"))
        .unwrap();
    mailbox
        .child("cur/m2:2,")
        .write_str(&message("plain"))
        .unwrap();
    mailbox
        .child("cur/m3:2,FT")
        .write_str(&message("doomed"))
        .unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    let changes = sync(&mut folder, true);

    assert_eq!(folder.counts().0, 2);
    assert!(changes.removed.contains(&Uid::from("m3")));
    mailbox.child("cur/m3:2,FT").assert(predicate::path::missing());
    assert!(folder.lookup(&Uid::from("m1")).is_some());
    assert!(folder.lookup(&Uid::from("m2")).is_some());
    assert!(folder.lookup(&Uid::from("m3")).is_none());
}

// ─── Duplicate identifiers collapse ─────────────────────────────────

#[test]
fn duplicate_uids_collapse_into_one_record() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    make_maildir(mailbox.path());
    mailbox
        .child("cur/dup:2,F")
        .write_str(&message("first"))
        .unwrap();
    mailbox
        .child("cur/dup:2,S")
        .write_str(&message("second"))
        .unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    let changes = check(&mut folder);

    assert_eq!(changes.added, vec![Uid::from("dup")]);
    assert_eq!(folder.counts().0, 1);
    // The collapsed record carries the union of both files' flags.
    let record = folder.lookup(&Uid::from("dup")).unwrap();
    assert!(record.flags.contains(Flags::FLAGGED));
    assert!(record.flags.contains(Flags::SEEN));
}

// ─── Incoming name collision falls back to the counter ──────────────

#[test]
fn incoming_uid_collision_uses_generated_identifier() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    make_maildir(mailbox.path());
    mailbox.child("cur/7:2,").write_str(&message("old")).unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    check(&mut folder);

    // A second message arrives whose name would collide with uid 7.
    mailbox.child("new/7").write_str(&message("new")).unwrap();
    let changes = check(&mut folder);

    assert_eq!(changes.added.len(), 1);
    let new_uid = &changes.added[0];
    assert_ne!(new_uid, &Uid::from("7"));
    assert_eq!(folder.counts().0, 2);
    assert!(folder.message_path(new_uid).unwrap().exists());
}

// ─── Flag writes committed by sync ──────────────────────────────────

#[test]
fn set_flags_then_sync_renames_the_file() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    make_maildir(mailbox.path());
    mailbox
        .child("cur/1733356800.a.mx:2,")
        .write_str(&message("one"))
        .unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    check(&mut folder);

    let uid = Uid::from("1733356800.a.mx");
    assert!(folder.set_flags(&uid, Flags::SEEN, true).unwrap());
    sync(&mut folder, false);

    mailbox
        .child("cur/1733356800.a.mx:2,S")
        .assert(predicate::path::exists());
    mailbox
        .child("cur/1733356800.a.mx:2,")
        .assert(predicate::path::missing());
    let record = folder.lookup(&uid).unwrap();
    assert!(!record.flags.contains(Flags::NEEDS_REWRITE));

    // Flags survive a fresh open from the persisted summary.
    let reopened = Folder::open(mailbox.path(), &test_config()).unwrap();
    assert!(reopened
        .lookup(&uid)
        .unwrap()
        .flags
        .contains(Flags::SEEN));
}

// ─── Missing summary forces a full, uid-stable rescan ───────────────

#[test]
fn lost_summary_is_rebuilt_with_the_same_uids() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    make_maildir(mailbox.path());
    mailbox
        .child("cur/1733356800.a.mx:2,S")
        .write_str(&message("one"))
        .unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    check(&mut folder);
    drop(folder);

    fs::remove_file(store::summary_path_for(mailbox.path())).unwrap();

    let mut reopened = Folder::open(mailbox.path(), &test_config()).unwrap();
    assert_eq!(reopened.counts().0, 0);
    let changes = check(&mut reopened);
    assert_eq!(changes.added, vec![Uid::from("1733356800.a.mx")]);
    assert!(reopened
        .lookup(&Uid::from("1733356800.a.mx"))
        .unwrap()
        .flags
        .contains(Flags::SEEN));
}

// ─── Cancellation leaves the store untouched ────────────────────────

#[test]
fn cancelled_check_discards_partial_state() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    make_maildir(mailbox.path());
    mailbox
        .child("cur/1733356800.a.mx:2,")
        .write_str(&message("one"))
        .unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    check(&mut folder);
    assert_eq!(folder.counts().0, 1);

    mailbox
        .child("cur/1733356900.b.mx:2,")
        .write_str(&message("two"))
        .unwrap();

    let cancel = AtomicBool::new(true);
    let ctrl = ScanControl {
        progress: None,
        cancel: Some(&cancel),
    };
    let mut changes = ChangeSet::default();
    let err = folder.check(&mut changes, ctrl).unwrap_err();
    assert!(matches!(err, mailkeep::error::MailboxError::Cancelled));

    // Pre-pass state is back in memory; nothing partial was persisted.
    assert_eq!(folder.counts().0, 1);

    cancel.store(false, Ordering::Relaxed);
    let changes = check(&mut folder);
    assert_eq!(changes.added, vec![Uid::from("1733356900.b.mx")]);
}

// ─── Delivery through the façade ────────────────────────────────────

#[test]
fn delivered_message_is_indexed_and_survives_rescan() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    make_maildir(mailbox.path());

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    let uid = folder
        .add_message(message("fresh").as_bytes(), Flags::SEEN)
        .unwrap();

    assert_eq!(folder.counts(), (1, 0));
    assert!(folder.message_path(&uid).unwrap().exists());

    // A subsequent check matches the delivered file to its record.
    let changes = check(&mut folder);
    assert!(changes.is_empty(), "delivery must already be indexed: {changes:?}");
}

// ─── Numbered layout ────────────────────────────────────────────────

#[test]
fn numbered_layout_imports_and_reads_status_headers() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    fs::create_dir_all(mailbox.path()).unwrap();
    mailbox.child("1").write_str(&message("one")).unwrap();
    mailbox.child("2").write_str(&message("two")).unwrap();
    mailbox
        .child("5")
        .write_str(&format!("Status: RO\nX-Status: F\n{}", message("five")))
        .unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    assert_eq!(folder.layout(), Layout::Numbered);
    let changes = check(&mut folder);

    assert_eq!(changes.added.len(), 3);
    let five = folder.lookup(&Uid::from("5")).unwrap();
    assert!(five.flags.contains(Flags::SEEN));
    assert!(five.flags.contains(Flags::FLAGGED));
    assert!(!folder
        .lookup(&Uid::from("1"))
        .unwrap()
        .flags
        .contains(Flags::SEEN));
}

#[test]
fn numbered_flag_change_is_committed_into_headers() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    fs::create_dir_all(mailbox.path()).unwrap();
    mailbox.child("3").write_str(&message("three")).unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    check(&mut folder);

    let uid = Uid::from("3");
    folder.set_flags(&uid, Flags::ANSWERED, true).unwrap();
    sync(&mut folder, false);

    let text = fs::read_to_string(mailbox.path().join("3")).unwrap();
    assert!(text.contains("X-Status: A\n"));
    assert!(text.contains("Body of three."));

    // A forced rescan re-derives the flag from the rewritten headers.
    fs::remove_file(store::summary_path_for(mailbox.path())).unwrap();
    let mut rescanned = Folder::open(mailbox.path(), &test_config()).unwrap();
    check(&mut rescanned);
    assert!(rescanned
        .lookup(&uid)
        .unwrap()
        .flags
        .contains(Flags::ANSWERED));
}

#[test]
fn numbered_expunge_deletes_the_file() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    fs::create_dir_all(mailbox.path()).unwrap();
    mailbox.child("1").write_str(&message("one")).unwrap();
    mailbox.child("2").write_str(&message("two")).unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    check(&mut folder);
    folder
        .set_flags(&Uid::from("2"), Flags::DELETED, true)
        .unwrap();
    let changes = sync(&mut folder, true);

    assert!(changes.removed.contains(&Uid::from("2")));
    mailbox.child("2").assert(predicate::path::missing());
    mailbox.child("1").assert(predicate::path::exists());
    assert_eq!(folder.counts().0, 1);
}

#[test]
fn numbered_delivery_assigns_the_next_number() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let mailbox = tmp.child("box");
    fs::create_dir_all(mailbox.path()).unwrap();
    mailbox.child("41").write_str(&message("old")).unwrap();

    let mut folder = Folder::open(mailbox.path(), &test_config()).unwrap();
    check(&mut folder);

    let uid = folder
        .add_message(message("fresh").as_bytes(), Flags::SEEN)
        .unwrap();
    assert_eq!(uid, Uid::from("42"));
    let text = fs::read_to_string(mailbox.path().join("42")).unwrap();
    assert!(text.contains("Status: RO\n"));
}
