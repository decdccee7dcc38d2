#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use shiftbook_lib::import::BundleFormat;
use shiftbook_lib::records::ImageType;
use shiftbook_lib::{load_backup, AppError, BundleLoadError};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use util::{attachment, id, manifest, shift};

fn raw_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
}

fn manifest_bytes() -> Vec<u8> {
    let mut m = manifest();
    let mut s = shift(id(1), 12.0);
    s.image_attachments = vec![attachment("a.jpg")];
    m.shifts = vec![s];
    serde_json::to_vec(&m).unwrap()
}

#[test]
fn entries_escaping_the_archive_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("evil.zip");
    let manifest = manifest_bytes();
    raw_zip(
        &path,
        &[
            ("Backup/backup.json", manifest.as_slice()),
            ("../../outside.txt", &b"owned"[..]),
        ],
    );

    let err = load_backup(&path).unwrap_err();
    assert!(matches!(err, BundleLoadError::CorruptArchive(_)), "{err:?}");
    assert!(!dir.path().join("outside.txt").exists());
    assert_eq!(AppError::from(err).code(), "BUNDLE/CORRUPT_ARCHIVE");
}

#[test]
fn manifest_at_archive_root_is_accepted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flat.shiftbackup");
    let manifest = manifest_bytes();
    raw_zip(&path, &[("backup.json", manifest.as_slice())]);

    let bundle = load_backup(&path).unwrap();
    assert_eq!(bundle.format(), BundleFormat::Archive);
    assert_eq!(bundle.manifest().shifts.len(), 1);
    assert!(bundle.images_root().is_none());
}

#[test]
fn resource_fork_folders_do_not_hide_the_bundle_folder() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mac.zip");
    let manifest = manifest_bytes();
    raw_zip(
        &path,
        &[
            ("Backup/backup.json", manifest.as_slice()),
            ("Backup/.DS_Store", &b"finder"[..]),
            ("__MACOSX/Backup/._backup.json", &b"fork"[..]),
        ],
    );

    let bundle = load_backup(&path).unwrap();
    assert_eq!(bundle.manifest().shifts[0].image_attachments[0].image_type, ImageType::Receipt);
}

#[test]
fn unpacked_files_are_removed_with_the_bundle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bundle.zip");
    let manifest = manifest_bytes();
    raw_zip(
        &path,
        &[
            ("Backup/backup.json", manifest.as_slice()),
            ("Backup/Images/shifts/00000000-0000-0000-0000-000000000001/a.jpg", &b"img"[..]),
        ],
    );

    let bundle = load_backup(&path).unwrap();
    let images = bundle.images_root().unwrap().to_path_buf();
    assert!(images.is_dir());
    drop(bundle);
    assert!(!images.exists());
}

#[test]
fn legacy_manifest_with_byte_order_mark_decodes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("backup.json");
    let mut bytes = b"\xEF\xBB\xBF".to_vec();
    bytes.extend_from_slice(&manifest_bytes());
    fs::write(&path, bytes).unwrap();

    let bundle = load_backup(&path).unwrap();
    assert_eq!(bundle.format(), BundleFormat::Legacy);
    assert_eq!(bundle.summary().image_attachments, 1);
}

#[test]
fn non_json_legacy_file_is_malformed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("backup.json");
    fs::write(&path, b"shifts,expenses\n1,2\n").unwrap();

    let err = load_backup(&path).unwrap_err();
    assert!(matches!(err, BundleLoadError::ManifestMalformed(_)), "{err:?}");
}

#[test]
fn missing_bundle_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let err = load_backup(dir.path().join("nope.zip")).unwrap_err();
    assert_eq!(err.code(), "BUNDLE/IO");
}

#[test]
fn newer_app_version_is_still_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("backup.json");
    let mut m = manifest();
    m.app_version = "99.0.0".into();
    fs::write(&path, serde_json::to_vec(&m).unwrap()).unwrap();

    let bundle = load_backup(&path).unwrap();
    assert_eq!(bundle.summary().app_version, "99.0.0");
}
