use criterion::{criterion_group, criterion_main, Criterion};
use std::fs;

use mailkeep::config::Config;
use mailkeep::folder::Folder;
use mailkeep::model::filename;
use mailkeep::model::flags::Flags;
use mailkeep::reconcile::{ChangeSet, ScanControl};

fn bench_codec(c: &mut Criterion) {
    let flags = Flags::SEEN | Flags::ANSWERED | Flags::FLAGGED;
    c.bench_function("filename_encode_decode", |b| {
        b.iter(|| {
            let name = filename::encode("1733356800.P42.mx", flags);
            filename::decode(&name, Flags::empty())
        })
    });
}

fn bench_full_scan(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mailbox = dir.path().join("box");
    for sub in ["tmp", "new", "cur"] {
        fs::create_dir_all(mailbox.join(sub)).unwrap();
    }
    for i in 0..200 {
        let name = format!("17333568{:02}.m{i}.mx:2,{}", i % 100, if i % 2 == 0 { "S" } else { "" });
        let body = format!(
            "From: bench@example.com\nSubject: message {i}\nMessage-ID: <bench-{i}@example.com>\n\nbody {i}\n"
        );
        fs::write(mailbox.join("cur").join(name), body).unwrap();
    }

    let mut config = Config::default();
    config.lock.retry_delay_ms = 0;

    c.bench_function("full_scan_200_messages", |b| {
        b.iter(|| {
            let mut folder = Folder::open(&mailbox, &config).unwrap();
            folder.force_rescan();
            let mut changes = ChangeSet::default();
            folder.check(&mut changes, ScanControl::default()).unwrap();
            changes.added.len()
        })
    });
}

criterion_group!(benches, bench_codec, bench_full_scan);
criterion_main!(benches);
