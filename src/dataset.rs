use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::attachments::{FsAttachmentStore, DEFAULT_THUMBNAIL_EDGE};
use crate::preferences::PreferencesSnapshot;
use crate::records::{ExpenseRecord, ShiftRecord, TransactionRecord};
use crate::{AppError, AppResult};

pub const DATASET_FILE: &str = "dataset.json";
pub const IMAGES_DIR: &str = "images";
pub const REPORTS_DIR: &str = "reports";
pub const LOGS_DIR: &str = "logs";
pub const LOCK_FILE: &str = ".restore.lock";

pub const ERR_LOCKED: &str = "RESTORE/LOCKED";

/// Everything a restore reconciles against.
///
/// Soft-deleted records stay in the collections; use the `active_*` views
/// to hide them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalDataset {
    pub shifts: Vec<ShiftRecord>,
    pub expenses: Vec<ExpenseRecord>,
    pub transactions: Vec<TransactionRecord>,
    pub preferences: PreferencesSnapshot,
}

impl LocalDataset {
    pub fn active_shifts(&self) -> impl Iterator<Item = &ShiftRecord> {
        self.shifts.iter().filter(|shift| !shift.sync.is_deleted)
    }

    pub fn active_expenses(&self) -> impl Iterator<Item = &ExpenseRecord> {
        self.expenses.iter().filter(|expense| !expense.sync.is_deleted)
    }
}

/// On-disk home of a [`LocalDataset`] and its images.
///
/// ```text
/// <data_dir>/dataset.json
/// <data_dir>/images/<kind>/<parentId>/...
/// <data_dir>/reports/restore-*.json
/// <data_dir>/logs/
/// ```
#[derive(Debug, Clone)]
pub struct DatasetStore {
    data_dir: PathBuf,
    thumbnail_edge: u32,
}

impl DatasetStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            thumbnail_edge: DEFAULT_THUMBNAIL_EDGE,
        }
    }

    pub fn with_thumbnail_edge(mut self, edge: u32) -> Self {
        self.thumbnail_edge = edge;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.data_dir.join(DATASET_FILE)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join(IMAGES_DIR)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join(REPORTS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join(LOGS_DIR)
    }

    pub fn attachment_store(&self) -> FsAttachmentStore {
        FsAttachmentStore::new(self.images_dir()).with_thumbnail_edge(self.thumbnail_edge)
    }

    /// Read the dataset, or an empty one when nothing has been saved yet.
    pub fn load(&self) -> AppResult<LocalDataset> {
        let path = self.dataset_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(target: "shiftbook", event = "dataset_missing", path = %path.display());
                return Ok(LocalDataset::default());
            }
            Err(err) => {
                return Err(AppError::from(err)
                    .with_context("operation", "dataset_read")
                    .with_context("path", path.display().to_string()))
            }
        };
        serde_json::from_slice(&bytes).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "dataset_decode")
                .with_context("path", path.display().to_string())
        })
    }

    /// Replace `dataset.json` atomically.
    pub fn save(&self, dataset: &LocalDataset) -> AppResult<()> {
        fs::create_dir_all(&self.data_dir).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "dataset_create_dir")
                .with_context("path", self.data_dir.display().to_string())
        })?;
        let path = self.dataset_path();
        let payload = serde_json::to_vec_pretty(dataset)
            .map_err(|err| AppError::from(err).with_context("operation", "dataset_encode"))?;

        let mut tmp = NamedTempFile::new_in(&self.data_dir).map_err(|err| {
            AppError::from(err).with_context("operation", "dataset_tmp_create")
        })?;
        tmp.write_all(&payload)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|err| AppError::from(err).with_context("operation", "dataset_tmp_write"))?;
        tmp.persist(&path).map_err(|err| {
            AppError::from(err.error)
                .with_context("operation", "dataset_persist")
                .with_context("path", path.display().to_string())
        })?;

        info!(
            target: "shiftbook",
            event = "dataset_saved",
            path = %path.display(),
            shifts = dataset.shifts.len(),
            expenses = dataset.expenses.len(),
            transactions = dataset.transactions.len()
        );
        Ok(())
    }

    /// Take the exclusive restore lock. Fails fast if another restore holds it.
    pub fn lock(&self) -> AppResult<RestoreLock> {
        fs::create_dir_all(&self.data_dir).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "dataset_create_dir")
                .with_context("path", self.data_dir.display().to_string())
        })?;
        let path = self.data_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "restore_lock_open")
                    .with_context("path", path.display().to_string())
            })?;

        if let Err(err) = FileExt::try_lock_exclusive(&file) {
            if err.kind() == fs2::lock_contended_error().kind() {
                return Err(AppError::new(
                    ERR_LOCKED,
                    "Another restore is already running for this data directory.",
                )
                .with_context("path", path.display().to_string()));
            }
            return Err(AppError::from(err)
                .with_context("operation", "restore_lock")
                .with_context("path", path.display().to_string()));
        }

        debug!(target: "shiftbook", event = "restore_lock_acquired", path = %path.display());
        Ok(RestoreLock { file, path })
    }
}

/// Held for the duration of a restore; released on drop.
#[derive(Debug)]
pub struct RestoreLock {
    file: File,
    path: PathBuf,
}

impl RestoreLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RestoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(target: "shiftbook", event = "restore_lock_released", path = %self.path.display());
    }
}
