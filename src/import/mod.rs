pub mod bundle;
pub mod engine;
pub mod policy;
pub mod report;
pub mod resolver;

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

pub use bundle::{load_backup, BundleFormat, BundleLoadError, BundleSummary, LoadedBundle};
pub use engine::{
    restore_from_backup, AttachmentIoWarning, AttachmentOperation, ReconciliationResult,
};
pub use policy::{Action, Classification, EntityClass, Policy};
pub use report::write_restore_report;
pub use resolver::{PlannedCounts, RestorePreview};

use crate::dataset::DatasetStore;
use crate::{AppError, AppResult};

/// Outcome of a restore driven against an on-disk dataset.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub bundle: BundleSummary,
    pub result: ReconciliationResult,
    /// `None` when the report could not be written; the restore itself still succeeded.
    pub report_path: Option<PathBuf>,
}

/// Load `bundle_path`, reconcile it into the dataset held by `store` and save.
///
/// The restore lock is held from before the dataset is read until after it
/// is written back. Bundle errors surface before anything on disk changes.
pub fn restore_into_store(
    bundle_path: &Path,
    store: &DatasetStore,
    policy: Policy,
) -> AppResult<RestoreOutcome> {
    let _lock = store.lock()?;
    let bundle = load_backup(bundle_path)
        .map_err(|err| AppError::from(err).with_context("path", bundle_path.display().to_string()))?;
    let mut dataset = store.load()?;
    let attachments = store.attachment_store();

    let result = restore_from_backup(&bundle, &mut dataset, &attachments, policy);
    store.save(&dataset)?;

    let summary = bundle.summary();
    let report_path = match write_restore_report(&store.reports_dir(), &summary, &result) {
        Ok(path) => {
            info!(target: "shiftbook", event = "restore_report_written", path = %path.display());
            Some(path)
        }
        Err(err) => {
            warn!(target: "shiftbook", event = "restore_report_failed", error = %err);
            None
        }
    };

    Ok(RestoreOutcome {
        bundle: summary,
        result,
        report_path,
    })
}

/// Counts a restore of `bundle_path` under `policy` would produce, without writing anything.
pub fn preview_restore(
    bundle_path: &Path,
    store: &DatasetStore,
    policy: Policy,
) -> AppResult<(BundleSummary, RestorePreview)> {
    let bundle = load_backup(bundle_path)
        .map_err(|err| AppError::from(err).with_context("path", bundle_path.display().to_string()))?;
    let dataset = store.load()?;
    let preview = resolver::resolve(bundle.manifest(), &dataset).preview(policy);
    Ok((bundle.summary(), preview))
}
