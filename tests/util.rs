#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use shiftbook_lib::export::manifest::BackupManifest;
use shiftbook_lib::records::{
    ExpenseCategory, ExpenseRecord, ImageAttachment, ImageType, ShiftRecord, TransactionRecord,
};
use shiftbook_lib::ParentKind;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const BUNDLE_FOLDER: &str = "ShiftbookBackup-20241021-120000";

pub fn fixed_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 21, 12, 0, 0).unwrap()
}

pub fn id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

pub fn shift(id: Uuid, net_fare: f64) -> ShiftRecord {
    let mut shift = ShiftRecord::new(fixed_date(), 1000.0, "test-device");
    shift.id = id;
    shift.net_fare = Some(net_fare);
    shift.sync.created_date = fixed_date();
    shift.sync.modified_date = fixed_date();
    shift
}

pub fn expense(id: Uuid, amount: f64) -> ExpenseRecord {
    let mut expense =
        ExpenseRecord::new(fixed_date(), ExpenseCategory::Vehicle, "Oil change", amount, "test-device");
    expense.id = id;
    expense.sync.created_date = fixed_date();
    expense.sync.modified_date = fixed_date();
    expense
}

pub fn tx(period: &str, amount: f64) -> TransactionRecord {
    let mut tx = TransactionRecord::new(fixed_date(), "Trip", amount, period);
    tx.import_date = fixed_date();
    tx
}

pub fn attachment(filename: &str) -> ImageAttachment {
    let mut attachment = ImageAttachment::new(filename, ImageType::Receipt);
    attachment.created_date = fixed_date();
    attachment
}

pub fn manifest() -> BackupManifest {
    let mut manifest = BackupManifest::new("1.0.0");
    manifest.export_date = fixed_date();
    manifest
}

pub fn png_bytes() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(48, 32, image::Rgb([20, 120, 200]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Write `<dir>/bundle.zip` with one top-level folder, the manifest and the given images.
pub fn write_archive(
    dir: &Path,
    manifest: &BackupManifest,
    images: &[(ParentKind, Uuid, &str, &[u8])],
) -> PathBuf {
    let path = dir.join("bundle.zip");
    let mut zip = ZipWriter::new(File::create(&path).unwrap());
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.add_directory(format!("{BUNDLE_FOLDER}/"), options).unwrap();
    zip.start_file(format!("{BUNDLE_FOLDER}/backup.json"), options)
        .unwrap();
    zip.write_all(&serde_json::to_vec_pretty(manifest).unwrap())
        .unwrap();
    for (kind, parent_id, name, bytes) in images {
        zip.start_file(
            format!("{BUNDLE_FOLDER}/Images/{}/{}/{}", kind.as_str(), parent_id, name),
            options,
        )
        .unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
    path
}
