use std::borrow::Cow;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::available_space;
use serde::Serialize;
use tracing::{info, warn};
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::attachments::{FsAttachmentStore, IMAGES_DIR, THUMBNAILS_DIR};
use crate::dataset::LocalDataset;
use crate::parent_kind::ParentKind;
use crate::records::SyncRecord;
use crate::{AppError, AppResult};

use self::manifest::{BackupManifest, MANIFEST_NAME};

pub mod manifest;

const PARTIAL_SUFFIX: &str = ".partial";
const ZIP_EXTENSION: &str = "zip";
pub const DEFAULT_PREFIX: &str = "ShiftbookBackup";

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub out_dir: PathBuf,
    pub include_images: bool,
    pub prefix: String,
}

impl ExportOptions {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            include_images: true,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupExport {
    pub path: PathBuf,
    pub shifts: usize,
    pub expenses: usize,
    pub transactions: usize,
    pub images_written: usize,
    /// Attachments referenced by a record whose file was not found in the store.
    pub images_missing: usize,
}

/// Build the manifest the dataset would export as.
pub fn manifest_for(dataset: &LocalDataset) -> BackupManifest {
    let mut manifest = BackupManifest::new(env!("CARGO_PKG_VERSION"));
    manifest.shifts = dataset.shifts.clone();
    manifest.expenses = dataset.expenses.clone();
    manifest.transactions = Some(dataset.transactions.clone());
    manifest.preferences = dataset.preferences.clone();
    manifest
}

/// Write `<out_dir>/<prefix>-YYYYMMDD-HHMMSS.zip`.
///
/// The archive holds one folder named like the file, containing
/// `backup.json` and, when requested, the `Images/` tree with thumbnails.
/// The zip is assembled under a `.partial` name and renamed once complete.
pub fn create_backup(
    dataset: &LocalDataset,
    store: &FsAttachmentStore,
    opts: &ExportOptions,
) -> AppResult<BackupExport> {
    fs::create_dir_all(&opts.out_dir).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "export_create_out_dir")
            .with_context("path", opts.out_dir.display().to_string())
    })?;

    let manifest = manifest_for(dataset);
    let payload = serde_json::to_vec_pretty(&manifest)
        .map_err(|err| AppError::from(err).with_context("operation", "export_manifest_encode"))?;

    let images: Vec<ExportImage> = if opts.include_images {
        collect_images(store, &dataset.shifts)
            .into_iter()
            .chain(collect_images(store, &dataset.expenses))
            .collect()
    } else {
        Vec::new()
    };
    let images_missing = images.iter().filter(|image| image.source.is_none()).count();

    let required = payload.len() as u64
        + images
            .iter()
            .filter_map(|image| image.source.as_deref())
            .chain(images.iter().filter_map(|image| image.thumbnail.as_deref()))
            .filter_map(|path| fs::metadata(path).ok())
            .map(|meta| meta.len())
            .sum::<u64>();
    let avail = free_disk_space(&opts.out_dir)
        .map_err(|err| AppError::from(err).with_context("operation", "available_space"))?;
    if avail < required {
        return Err(AppError::new(
            "EXPORT/LOW_DISK",
            format!("Not enough disk space (need ~{}).", format_bytes(required)),
        )
        .with_context("available_bytes", avail.to_string())
        .with_context("required_bytes", required.to_string()));
    }

    let stem = format!("{}-{}", opts.prefix, Utc::now().format("%Y%m%d-%H%M%S"));
    let zip_path = unique_zip_path(&opts.out_dir, &stem)?;
    let partial = tmp_path(&zip_path);
    let mut guard = PartialGuard::new(&partial);

    let file = File::create(&partial).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "export_zip_create")
            .with_context("path", partial.display().to_string())
    })?;
    let mut writer = ZipWriter::new(file);
    let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);
    // Photos are already compressed.
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);

    writer
        .add_directory(format!("{stem}/"), deflated)
        .map_err(|err| map_zip_error(err, "export_zip_dir"))?;
    writer
        .start_file(format!("{stem}/{MANIFEST_NAME}"), deflated)
        .map_err(|err| map_zip_error(err, "export_zip_manifest"))?;
    writer
        .write_all(&payload)
        .map_err(|err| AppError::from(err).with_context("operation", "export_zip_manifest"))?;

    let mut images_written = 0;
    for image in &images {
        let Some(source) = &image.source else {
            continue;
        };
        let base = format!(
            "{stem}/{IMAGES_DIR}/{}/{}",
            image.kind.as_str(),
            image.parent_id
        );
        copy_into_zip(&mut writer, source, &format!("{base}/{}", image.filename), stored)?;
        if let Some(thumbnail) = &image.thumbnail {
            copy_into_zip(
                &mut writer,
                thumbnail,
                &format!("{base}/{THUMBNAILS_DIR}/{}", image.filename),
                stored,
            )?;
        }
        images_written += 1;
    }

    writer
        .finish()
        .map_err(|err| map_zip_error(err, "export_zip_finish"))?;
    fs::rename(&partial, &zip_path).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "export_zip_rename")
            .with_context("path", zip_path.display().to_string())
    })?;
    guard.disarm();

    info!(
        target: "shiftbook",
        event = "backup_exported",
        path = %zip_path.display(),
        shifts = dataset.shifts.len(),
        expenses = dataset.expenses.len(),
        transactions = dataset.transactions.len(),
        images_written,
        images_missing
    );

    Ok(BackupExport {
        path: zip_path,
        shifts: dataset.shifts.len(),
        expenses: dataset.expenses.len(),
        transactions: dataset.transactions.len(),
        images_written,
        images_missing,
    })
}

/// Write the bare `backup.json` form: no images, no transactions.
pub fn write_legacy_manifest(dataset: &LocalDataset, path: &Path) -> AppResult<()> {
    let mut manifest = manifest_for(dataset);
    manifest.transactions = None;
    let payload = serde_json::to_vec_pretty(&manifest)
        .map_err(|err| AppError::from(err).with_context("operation", "export_manifest_encode"))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "export_create_out_dir")
                .with_context("path", parent.display().to_string())
        })?;
    }
    fs::write(path, payload).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "export_legacy_write")
            .with_context("path", path.display().to_string())
    })
}

struct ExportImage {
    kind: ParentKind,
    parent_id: uuid::Uuid,
    filename: String,
    source: Option<PathBuf>,
    thumbnail: Option<PathBuf>,
}

fn collect_images<T: SyncRecord>(store: &FsAttachmentStore, records: &[T]) -> Vec<ExportImage> {
    let mut images = Vec::new();
    for record in records {
        for attachment in record.image_attachments() {
            let (Ok(source), Ok(thumbnail)) = (
                store.image_path(T::KIND, record.id(), &attachment.filename),
                store.thumbnail_path(T::KIND, record.id(), &attachment.filename),
            ) else {
                warn!(
                    target: "shiftbook",
                    event = "export_attachment_invalid_name",
                    parent_id = %record.id(),
                    filename = %attachment.filename
                );
                continue;
            };
            let filename = source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| attachment.filename.clone());
            if !source.is_file() {
                warn!(
                    target: "shiftbook",
                    event = "export_attachment_missing",
                    kind = T::KIND.as_str(),
                    parent_id = %record.id(),
                    filename = %filename
                );
            }
            images.push(ExportImage {
                kind: T::KIND,
                parent_id: record.id(),
                filename,
                thumbnail: thumbnail.is_file().then_some(thumbnail),
                source: source.is_file().then_some(source),
            });
        }
    }
    images
}

fn copy_into_zip(
    writer: &mut ZipWriter<File>,
    source: &Path,
    entry: &str,
    options: FileOptions,
) -> AppResult<()> {
    let mut file = File::open(source).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "export_zip_open")
            .with_context("path", source.display().to_string())
    })?;
    writer
        .start_file(entry, options)
        .map_err(|err| map_zip_error(err, "export_zip_entry"))?;
    std::io::copy(&mut file, writer)
        .map_err(|err| AppError::from(err).with_context("operation", "export_zip_copy"))?;
    Ok(())
}

fn unique_zip_path(out_dir: &Path, stem: &str) -> AppResult<PathBuf> {
    for suffix in 0..100 {
        let name = if suffix == 0 {
            format!("{stem}.{ZIP_EXTENSION}")
        } else {
            format!("{stem}-{suffix:02}.{ZIP_EXTENSION}")
        };
        let candidate = out_dir.join(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(AppError::new(
        "EXPORT/NAME_COLLISION",
        "Unable to allocate backup file name",
    ))
}

fn tmp_path(final_path: &Path) -> PathBuf {
    let mut s = OsString::from(final_path.as_os_str());
    s.push(PARTIAL_SUFFIX);
    PathBuf::from(s)
}

fn free_disk_space(path: &Path) -> anyhow::Result<u64> {
    let target: Cow<'_, Path> = if path.exists() {
        Cow::Borrowed(path)
    } else if let Some(parent) = path.parent() {
        Cow::Owned(parent.to_path_buf())
    } else {
        Cow::Owned(std::env::current_dir()?)
    };
    available_space(target.as_ref()).map_err(|e| anyhow::anyhow!(e))
}

fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 MB".to_string();
    }
    let mb = (bytes as f64) / 1_000_000.0;
    if mb < 1.0 {
        "1 MB".to_string()
    } else {
        format!("{:.0} MB", mb.ceil())
    }
}

fn map_zip_error(err: ZipError, operation: &'static str) -> AppError {
    AppError::new("EXPORT/ZIP", "Failed to write backup archive.")
        .with_context("operation", operation)
        .with_cause(err)
}

struct PartialGuard<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> PartialGuard<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::AttachmentStorage;
    use crate::records::{ImageAttachment, ImageType, ShiftRecord, TransactionRecord};
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    #[test]
    fn format_bytes_rounds_up_to_megabytes() {
        assert_eq!(format_bytes(0), "0 MB");
        assert_eq!(format_bytes(10), "1 MB");
        assert_eq!(format_bytes(2_500_000), "3 MB");
    }

    #[test]
    fn zip_failures_keep_the_archive_error_as_cause() {
        let err = map_zip_error(ZipError::FileNotFound, "export_zip_entry");
        assert_eq!(err.code(), "EXPORT/ZIP");
        assert_eq!(
            err.context().get("operation"),
            Some(&"export_zip_entry".to_string())
        );
        assert_eq!(err.cause().map(AppError::code), Some("ZIP/NOT_FOUND"));
    }

    #[test]
    fn backup_contains_manifest_and_images_under_one_folder() {
        let data = TempDir::new().unwrap();
        let store = FsAttachmentStore::new(data.path().join("images"));
        let mut dataset = LocalDataset::default();
        let mut shift = ShiftRecord::new(Utc::now(), 10.0, "phone");
        shift.image_attachments = vec![
            ImageAttachment::new("pump.jpg", ImageType::GasPump),
            ImageAttachment::new("lost.jpg", ImageType::Receipt),
        ];
        store
            .write(ParentKind::Shifts, shift.id, "pump.jpg", b"jpeg bytes")
            .unwrap();
        let shift_id = shift.id;
        dataset.shifts.push(shift);
        dataset
            .transactions
            .push(TransactionRecord::new(Utc::now(), "Trip", 8.0, "P1"));

        let out = TempDir::new().unwrap();
        let export = create_backup(&dataset, &store, &ExportOptions::new(out.path())).unwrap();
        assert_eq!(export.images_written, 1);
        assert_eq!(export.images_missing, 1);
        assert!(!tmp_path(&export.path).exists());

        let mut archive = ZipArchive::new(File::open(&export.path).unwrap()).unwrap();
        let stem = export.path.file_stem().unwrap().to_string_lossy().into_owned();
        let mut json = String::new();
        archive
            .by_name(&format!("{stem}/backup.json"))
            .unwrap()
            .read_to_string(&mut json)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["uberTransactions"].as_array().unwrap().len(), 1);

        let image_entry = format!("{stem}/Images/shifts/{shift_id}/pump.jpg");
        assert!(archive.by_name(&image_entry).is_ok());
    }

    #[test]
    fn legacy_manifest_omits_transactions() {
        let dir = TempDir::new().unwrap();
        let mut dataset = LocalDataset::default();
        dataset
            .transactions
            .push(TransactionRecord::new(Utc::now(), "Trip", 8.0, "P1"));
        let path = dir.path().join("backup.json");
        write_legacy_manifest(&dataset, &path).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert!(value.get("uberTransactions").is_none());
        assert!(value.get("exportDate").is_some());
    }
}
