//! Backup and restore reconciliation for the Shiftbook rideshare tracker.
//!
//! A backup bundle is loaded with [`load_backup`] and reconciled into a
//! [`LocalDataset`] with [`restore_from_backup`] under one of three
//! [`Policy`] values. Images live in an [`AttachmentStorage`]; on disk the
//! whole thing is held by a [`DatasetStore`].

pub mod attachments;
pub mod config;
pub mod dataset;
mod error;
pub mod export;
pub mod import;
pub mod logging;
pub mod parent_kind;
pub mod preferences;
pub mod records;

pub use attachments::{AttachmentStorage, FsAttachmentStore};
pub use dataset::{DatasetStore, LocalDataset, RestoreLock};
pub use error::{AppError, AppResult};
pub use export::{create_backup, write_legacy_manifest, BackupExport, ExportOptions};
pub use import::{
    load_backup, preview_restore, restore_from_backup, restore_into_store, AttachmentIoWarning,
    BundleLoadError, LoadedBundle, Policy, ReconciliationResult, RestoreOutcome,
};
pub use parent_kind::ParentKind;
