// tests/revert.rs

//! Integration tests for reverting an installation from its snapshots.

mod common;

use chrono::{NaiveDate, NaiveDateTime};
use common::*;
use rbdeploy::deploy::{BackupManager, BackupSelector, Deployer, RevertOutcome, Reverter};
use rbdeploy::progress::SilentProgress;
use rbdeploy::{Error, ErrorKind};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::path::Path;

fn at(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 8, 22)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

#[test]
fn test_revert_most_recent_picks_newest() {
    let (_temp, volume) = setup_volume();
    let manager = BackupManager::for_volume(&volume);
    let install = volume.install_dir();

    write_tree(&install, &[("a.txt", b"t1")]);
    manager.snapshot_at(at(9)).unwrap();

    write_tree(&install, &[("a.txt", b"t2"), ("b.txt", b"t2")]);
    let newest = manager.snapshot_at(at(10)).unwrap();

    write_tree(&install, &[("a.txt", b"t3"), ("c.txt", b"t3")]);

    let outcome = Reverter::for_volume(&volume)
        .run(&BackupSelector::MostRecent, &SilentProgress::new())
        .unwrap();

    let RevertOutcome::Restored { result, .. } = outcome else {
        panic!("expected a restore");
    };
    assert_eq!(result.backup, newest);
    assert_eq!(result.restored, 2);
    assert_eq!(result.removed, 1);

    // c.txt did not exist at T2 and must be gone
    assert_eq!(read_tree(&install), tree(&[("a.txt", b"t2"), ("b.txt", b"t2")]));
}

#[test]
fn test_revert_explicit_backup() {
    let (_temp, volume) = setup_volume();
    let manager = BackupManager::for_volume(&volume);
    let install = volume.install_dir();

    write_tree(&install, &[("a.txt", b"t1"), ("sub/deep/x.txt", b"x")]);
    let oldest = manager.snapshot_at(at(9)).unwrap();

    fs::remove_dir_all(install.join("sub")).unwrap();
    write_tree(&install, &[("a.txt", b"t2")]);
    manager.snapshot_at(at(10)).unwrap();

    Reverter::for_volume(&volume)
        .run(
            &BackupSelector::Path(oldest.path.clone()),
            &SilentProgress::new(),
        )
        .unwrap();

    assert_eq!(
        read_tree(&install),
        tree(&[("a.txt", b"t1"), ("sub/deep/x.txt", b"x")])
    );
}

#[test]
fn test_revert_is_exact() {
    let (_temp, volume) = setup_volume();
    let install = volume.install_dir();
    write_tree(
        &install,
        &[
            ("rockbox.ipod", b"fw"),
            ("themes/a.cfg", b"theme"),
            ("config.cfg", b"user"),
        ],
    );
    let expected = read_tree(&install);
    let backup = BackupManager::for_volume(&volume).snapshot().unwrap();

    // Arbitrary drift: edits, additions, removals, new directories
    fs::write(install.join("rockbox.ipod"), b"fw2").unwrap();
    fs::remove_file(install.join("config.cfg")).unwrap();
    write_tree(&install, &[("new/dir/file.bin", b"junk"), ("themes/b.cfg", b"b")]);

    Reverter::for_volume(&volume)
        .run(&BackupSelector::Path(backup.path), &SilentProgress::new())
        .unwrap();

    assert_eq!(read_tree(&install), expected);
    assert!(!install.join("new").exists());
}

#[test]
fn test_revert_undoes_deploy() {
    let (_temp, volume) = setup_volume();
    let install = volume.install_dir();
    write_tree(&install, &[("rockbox.ipod", b"v1"), ("user.cfg", b"mine")]);
    let before = read_tree(&install);

    let source = MemorySource::new(build_archive(&[
        ("rockbox.ipod", b"v2"),
        ("codecs/new.codec", b"c"),
    ]));
    Deployer::new(volume.clone(), &source)
        .deploy(&rbdeploy::ArtifactReference::new(NIGHTLY_URL))
        .unwrap();
    assert_ne!(read_tree(&install), before);

    Reverter::for_volume(&volume)
        .run(&BackupSelector::MostRecent, &SilentProgress::new())
        .unwrap();

    assert_eq!(read_tree(&install), before);
}

#[test]
fn test_revert_to_snapshot_of_missing_install() {
    let (_temp, volume) = setup_volume();

    let source = MemorySource::new(build_archive(&[("rockbox.ipod", b"fw")]));
    Deployer::new(volume.clone(), &source)
        .deploy(&rbdeploy::ArtifactReference::new(NIGHTLY_URL))
        .unwrap();
    assert!(volume.install_dir().is_dir());

    let outcome = Reverter::for_volume(&volume)
        .run(&BackupSelector::MostRecent, &SilentProgress::new())
        .unwrap();

    let RevertOutcome::Restored { plan, .. } = outcome else {
        panic!("expected a restore");
    };
    assert!(plan.removes_target);
    assert!(!volume.install_dir().exists());
}

#[test]
fn test_revert_dry_run_writes_nothing() {
    let (_temp, volume) = setup_volume();
    let install = volume.install_dir();
    write_tree(&install, &[("a.txt", b"old")]);
    BackupManager::for_volume(&volume).snapshot().unwrap();
    write_tree(&install, &[("a.txt", b"new"), ("b.txt", b"b")]);

    let before = mtimes(&install);
    let store_before = dir_names(&volume.backups_dir());

    let outcome = Reverter::for_volume(&volume)
        .with_dry_run(true)
        .run(&BackupSelector::MostRecent, &SilentProgress::new())
        .unwrap();

    let RevertOutcome::Planned(plan) = outcome else {
        panic!("expected a plan");
    };
    assert_eq!(plan.restores().count(), 1);
    assert_eq!(plan.removals().count(), 1);

    assert_eq!(before, mtimes(&install));
    assert_eq!(store_before, dir_names(&volume.backups_dir()));
}

#[test]
fn test_revert_without_backups() {
    let (_temp, volume) = setup_volume();

    let err = Reverter::for_volume(&volume)
        .run(&BackupSelector::MostRecent, &SilentProgress::new())
        .unwrap_err();

    assert!(matches!(err, Error::NoBackupsFound(_)));
    assert_eq!(err.kind(), ErrorKind::Revert);
}

#[test]
fn test_revert_missing_backup_path() {
    let (temp, volume) = setup_volume();

    let err = Reverter::for_volume(&volume)
        .run(
            &BackupSelector::Path(temp.path().join("nope.tar.gz")),
            &SilentProgress::new(),
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Revert);
}

/// Write a snapshot archive entry by entry; names ending in `/` are directories
fn write_raw_backup(path: &Path, entries: &[(&str, &[u8])]) {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        if name.ends_with('/') {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(data.len() as u64);
        }
        builder.append_data(&mut header, name, *data).unwrap();
    }
    let bytes = builder.into_inner().unwrap().finish().unwrap();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

#[test]
fn test_restore_failure_is_revert_error() {
    let (_temp, volume) = setup_volume();
    let install = volume.install_dir();
    write_tree(&install, &[("keep.txt", b"live")]);
    let before = read_tree(&install);

    write_raw_backup(
        &volume.backups_dir().join("rockbox-backup-20250822-100000.tar.gz"),
        &[(".rockbox/", b""), (".rockbox/x", b"file"), (".rockbox/x/", b"")],
    );

    let err = Reverter::for_volume(&volume)
        .run(&BackupSelector::MostRecent, &SilentProgress::new())
        .unwrap_err();

    assert!(matches!(err, Error::RevertError(_)), "got {:?}", err);
    assert_eq!(err.kind().exit_code(), 8);
    assert_eq!(read_tree(&install), before);
}

#[test]
fn test_revert_refuses_to_replace_a_file() {
    let (_temp, volume) = setup_volume();
    BackupManager::for_volume(&volume).snapshot().unwrap();
    fs::write(volume.install_dir(), b"precious user data").unwrap();

    let err = Reverter::for_volume(&volume)
        .run(&BackupSelector::MostRecent, &SilentProgress::new())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Revert);
    assert_eq!(fs::read(volume.install_dir()).unwrap(), b"precious user data");
}
