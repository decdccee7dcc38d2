use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bundle::LoadedBundle;
use super::policy::{action_for, Action, EntityClass, Policy};
use super::resolver::{self, dedupe_attachments, Classified, PeriodGroup};
use crate::attachments::{normalize_filename, AttachmentStorage, ERR_SOURCE_MISSING};
use crate::dataset::LocalDataset;
use crate::parent_kind::ParentKind;
use crate::preferences::apply_snapshot;
use crate::records::{SyncRecord, TransactionRecord};
use crate::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentOperation {
    Extract,
    Delete,
}

/// A file operation that failed during restore. Collected, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentIoWarning {
    pub kind: ParentKind,
    pub parent_id: Uuid,
    /// `None` when the operation covered the whole parent folder.
    pub filename: Option<String>,
    pub operation: AttachmentOperation,
    pub code: String,
    pub reason: String,
    /// The attachment entry was removed from its record.
    pub dropped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub policy: Policy,
    pub shifts_added: usize,
    pub shifts_updated: usize,
    pub shifts_skipped: usize,
    pub expenses_added: usize,
    pub expenses_updated: usize,
    pub expenses_skipped: usize,
    pub transactions_added: usize,
    pub transactions_updated: usize,
    pub transactions_skipped: usize,
    /// Bundle records ignored because an earlier record carried the same id.
    pub duplicates_dropped: usize,
    pub preferences_changed: Vec<&'static str>,
    pub warnings: Vec<AttachmentIoWarning>,
}

impl ReconciliationResult {
    fn new(policy: Policy, duplicates_dropped: usize) -> Self {
        Self {
            policy,
            shifts_added: 0,
            shifts_updated: 0,
            shifts_skipped: 0,
            expenses_added: 0,
            expenses_updated: 0,
            expenses_skipped: 0,
            transactions_added: 0,
            transactions_updated: 0,
            transactions_skipped: 0,
            duplicates_dropped,
            preferences_changed: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    added: usize,
    updated: usize,
    skipped: usize,
}

impl Counts {
    fn record(&mut self, action: Action, n: usize) {
        match action {
            Action::Insert => self.added += n,
            Action::Overwrite => self.updated += n,
            Action::Skip => self.skipped += n,
        }
    }
}

/// Reconcile `bundle` into `dataset` under `policy`.
///
/// Shifts, expenses and transactions are rebuilt in working buffers and
/// assigned to `dataset` only once every entity class has been processed.
/// Preferences are overwritten afterwards regardless of policy.
///
/// Attachment file failures never abort the restore: they are reported in
/// `warnings`, and an attachment whose file could not be installed is removed
/// from its record unless the file is already present locally.
pub fn restore_from_backup(
    bundle: &LoadedBundle,
    dataset: &mut LocalDataset,
    store: &dyn AttachmentStorage,
    policy: Policy,
) -> ReconciliationResult {
    let manifest = bundle.manifest();
    let plan = resolver::resolve(manifest, dataset);
    let mut result = ReconciliationResult::new(policy, plan.duplicates_dropped);
    let mut installer = AttachmentInstaller {
        store,
        images_root: bundle.images_root(),
        warnings: Vec::new(),
    };

    info!(
        target: "shiftbook",
        event = "restore_started",
        policy = policy.as_str(),
        source = %bundle.source().display(),
        incoming_shifts = plan.shifts.len(),
        incoming_expenses = plan.expenses.len(),
        incoming_periods = plan.transactions.as_ref().map(Vec::len)
    );

    if policy == Policy::ReplaceAll {
        installer.clear_kind(ParentKind::Shifts, dataset.shifts.iter().map(|s| s.id));
        installer.clear_kind(ParentKind::Expenses, dataset.expenses.iter().map(|e| e.id));
    }

    let (shifts, counts) = reconcile_records(&plan.shifts, &dataset.shifts, policy, &mut installer);
    result.shifts_added = counts.added;
    result.shifts_updated = counts.updated;
    result.shifts_skipped = counts.skipped;

    let (expenses, counts) =
        reconcile_records(&plan.expenses, &dataset.expenses, policy, &mut installer);
    result.expenses_added = counts.added;
    result.expenses_updated = counts.updated;
    result.expenses_skipped = counts.skipped;

    // An absent collection is empty: Replace-All clears it, the other policies leave it alone.
    let groups = match (plan.transactions.as_deref(), policy) {
        (Some(groups), _) => Some(groups),
        (None, Policy::ReplaceAll) => Some(&[][..]),
        (None, Policy::AddMissing | Policy::Merge) => None,
    };
    let transactions =
        groups.map(|groups| reconcile_transactions(groups, &dataset.transactions, policy));
    if let Some((_, counts)) = &transactions {
        result.transactions_added = counts.added;
        result.transactions_updated = counts.updated;
        result.transactions_skipped = counts.skipped;
    }

    dataset.shifts = shifts;
    dataset.expenses = expenses;
    match transactions {
        Some((merged, _)) => dataset.transactions = merged,
        None => debug!(
            target: "shiftbook",
            event = "restore_transactions_absent",
            kept = dataset.transactions.len()
        ),
    }

    let change = apply_snapshot(&mut dataset.preferences, &manifest.preferences);
    result.preferences_changed = change.changed_fields;
    result.warnings = installer.warnings;

    info!(
        target: "shiftbook",
        event = "restore_completed",
        policy = policy.as_str(),
        shifts_added = result.shifts_added,
        shifts_updated = result.shifts_updated,
        shifts_skipped = result.shifts_skipped,
        expenses_added = result.expenses_added,
        expenses_updated = result.expenses_updated,
        expenses_skipped = result.expenses_skipped,
        transactions_added = result.transactions_added,
        transactions_skipped = result.transactions_skipped,
        warnings = result.warnings.len()
    );
    result
}

fn reconcile_records<T: SyncRecord>(
    incoming: &[Classified<'_, T>],
    local: &[T],
    policy: Policy,
    installer: &mut AttachmentInstaller<'_>,
) -> (Vec<T>, Counts) {
    let class = EntityClass::from(T::KIND);
    let mut merged = match policy {
        Policy::ReplaceAll => Vec::with_capacity(incoming.len()),
        Policy::AddMissing | Policy::Merge => local.to_vec(),
    };
    let mut counts = Counts::default();
    let mut soft_deleted = 0;

    for item in incoming {
        let action = action_for(class, policy, item.classification);
        counts.record(action, 1);
        match action {
            Action::Insert => {
                let mut record = item.record.clone();
                installer.install(&mut record);
                soft_deleted += usize::from(record.sync().is_deleted);
                merged.push(record);
            }
            Action::Overwrite => {
                let mut record = item.record.clone();
                installer.install(&mut record);
                installer.prune(&record);
                soft_deleted += usize::from(record.sync().is_deleted);
                match item.local_index {
                    Some(position) => merged[position] = record,
                    None => merged.push(record),
                }
            }
            Action::Skip => {}
        }
    }

    debug!(
        target: "shiftbook",
        event = "restore_entity_reconciled",
        kind = T::KIND.as_str(),
        added = counts.added,
        updated = counts.updated,
        skipped = counts.skipped,
        soft_deleted,
        total = merged.len()
    );
    (merged, counts)
}

/// Periods are inserted or skipped whole; a period is never split.
fn reconcile_transactions(
    groups: &[PeriodGroup<'_>],
    local: &[TransactionRecord],
    policy: Policy,
) -> (Vec<TransactionRecord>, Counts) {
    let mut merged = match policy {
        Policy::ReplaceAll => Vec::new(),
        Policy::AddMissing | Policy::Merge => local.to_vec(),
    };
    let mut counts = Counts::default();

    for group in groups {
        let action = action_for(EntityClass::Transactions, policy, group.classification);
        counts.record(action, group.transactions.len());
        match action {
            Action::Insert => merged.extend(group.transactions.iter().map(|tx| (*tx).clone())),
            Action::Overwrite => {
                merged.retain(|tx| tx.statement_period != group.period);
                merged.extend(group.transactions.iter().map(|tx| (*tx).clone()));
            }
            Action::Skip => debug!(
                target: "shiftbook",
                event = "restore_period_skipped",
                period = group.period,
                transactions = group.transactions.len()
            ),
        }
    }
    (merged, counts)
}

struct AttachmentInstaller<'a> {
    store: &'a dyn AttachmentStorage,
    images_root: Option<&'a Path>,
    warnings: Vec<AttachmentIoWarning>,
}

impl AttachmentInstaller<'_> {
    /// Extract every attachment of `record` and drop the entries that ended up
    /// without a file.
    fn install<T: SyncRecord>(&mut self, record: &mut T) {
        let kind = T::KIND;
        let parent_id = record.id();
        let attachments = record.image_attachments_mut();
        let collapsed = dedupe_attachments(attachments);
        if collapsed > 0 {
            warn!(
                target: "shiftbook",
                event = "restore_attachment_duplicates",
                kind = kind.as_str(),
                parent_id = %parent_id,
                collapsed
            );
        }

        let mut kept = Vec::with_capacity(attachments.len());
        for attachment in attachments.drain(..) {
            let outcome = match self.images_root {
                Some(root) => self.store.extract(root, kind, parent_id, &attachment.filename),
                None => Err(AppError::new(
                    ERR_SOURCE_MISSING,
                    "Bundle carries no image files.",
                )),
            };
            let Err(err) = outcome else {
                kept.push(attachment);
                continue;
            };

            let present = self.store.exists(kind, parent_id, &attachment.filename);
            // Image-less bundles routinely reference files that are already on disk.
            if !(present && self.images_root.is_none()) {
                self.push_warning(
                    kind,
                    parent_id,
                    Some(attachment.filename.clone()),
                    AttachmentOperation::Extract,
                    &err,
                    !present,
                );
            }
            if present {
                kept.push(attachment);
            }
        }
        *attachments = kept;
    }

    /// Remove stored images that the overwritten record no longer references.
    fn prune<T: SyncRecord>(&mut self, record: &T) {
        let kind = T::KIND;
        let parent_id = record.id();
        let referenced: HashSet<String> = record
            .image_attachments()
            .iter()
            .filter_map(|attachment| normalize_filename(&attachment.filename).ok())
            .collect();

        if referenced.is_empty() {
            if let Err(err) = self.store.delete_all(kind, parent_id) {
                self.push_warning(kind, parent_id, None, AttachmentOperation::Delete, &err, false);
            }
            return;
        }

        let stored = match self.store.list(kind, parent_id) {
            Ok(stored) => stored,
            Err(err) => {
                self.push_warning(kind, parent_id, None, AttachmentOperation::Delete, &err, false);
                return;
            }
        };
        for name in stored.iter().filter(|name| !referenced.contains(*name)) {
            match self.store.delete(kind, parent_id, name) {
                Ok(()) => debug!(
                    target: "shiftbook",
                    event = "restore_attachment_pruned",
                    kind = kind.as_str(),
                    parent_id = %parent_id,
                    filename = %name
                ),
                Err(err) => self.push_warning(
                    kind,
                    parent_id,
                    Some(name.clone()),
                    AttachmentOperation::Delete,
                    &err,
                    false,
                ),
            }
        }
    }

    /// Delete the image folders of every local parent plus any orphan folder.
    fn clear_kind(&mut self, kind: ParentKind, local_ids: impl Iterator<Item = Uuid>) {
        let mut parents: BTreeSet<Uuid> = local_ids.collect();
        match self.store.parents(kind) {
            Ok(ids) => parents.extend(ids),
            Err(err) => warn!(
                target: "shiftbook",
                event = "restore_orphan_scan_failed",
                kind = kind.as_str(),
                error = %err
            ),
        }
        for parent_id in parents {
            if let Err(err) = self.store.delete_all(kind, parent_id) {
                self.push_warning(kind, parent_id, None, AttachmentOperation::Delete, &err, false);
            }
        }
    }

    fn push_warning(
        &mut self,
        kind: ParentKind,
        parent_id: Uuid,
        filename: Option<String>,
        operation: AttachmentOperation,
        err: &AppError,
        dropped: bool,
    ) {
        warn!(
            target: "shiftbook",
            event = "restore_attachment_io",
            kind = kind.as_str(),
            parent_id = %parent_id,
            filename = filename.as_deref().unwrap_or(""),
            operation = ?operation,
            code = err.code(),
            error = %err,
            dropped
        );
        self.warnings.push(AttachmentIoWarning {
            kind,
            parent_id,
            filename,
            operation,
            code: err.code().to_string(),
            reason: err.message().to_string(),
            dropped,
        });
    }
}
