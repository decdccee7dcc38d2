use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use super::policy::{action_for, Action, Classification, EntityClass, Policy};
use crate::attachments::normalize_filename;
use crate::dataset::LocalDataset;
use crate::export::manifest::BackupManifest;
use crate::records::{ImageAttachment, SyncRecord, TransactionRecord};

/// An incoming shift or expense with its classification.
#[derive(Debug, Clone)]
pub struct Classified<'a, T> {
    pub record: &'a T,
    pub classification: Classification,
    /// Position of the matching local record when `DuplicateById`.
    pub local_index: Option<usize>,
}

/// All incoming transactions sharing one statement period.
///
/// The period is the unit of classification: every transaction in a group
/// is added or skipped together.
#[derive(Debug, Clone)]
pub struct PeriodGroup<'a> {
    pub period: &'a str,
    pub classification: Classification,
    pub transactions: Vec<&'a TransactionRecord>,
}

/// Classification of a whole bundle against the local dataset, computed once per restore.
#[derive(Debug, Clone)]
pub struct RestorePlan<'a> {
    pub shifts: Vec<Classified<'a, crate::records::ShiftRecord>>,
    pub expenses: Vec<Classified<'a, crate::records::ExpenseRecord>>,
    /// `None` when the bundle carries no transaction collection at all.
    pub transactions: Option<Vec<PeriodGroup<'a>>>,
    /// Incoming shifts or expenses dropped because an earlier record in the
    /// bundle had the same id.
    pub duplicates_dropped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedCounts {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePreview {
    pub shifts: PlannedCounts,
    pub expenses: PlannedCounts,
    pub transactions: PlannedCounts,
    pub duplicates_dropped: usize,
}

pub fn resolve<'a>(manifest: &'a BackupManifest, local: &LocalDataset) -> RestorePlan<'a> {
    let mut duplicates_dropped = 0;

    let (shifts, dropped) = unique_by_id(&manifest.shifts, |s| s.id);
    duplicates_dropped += dropped;
    let (expenses, dropped) = unique_by_id(&manifest.expenses, |e| e.id);
    duplicates_dropped += dropped;

    // Transactions are keyed by statement period; their ids carry no identity here.
    let transactions = manifest.transactions.as_deref().map(|incoming| {
        let incoming: Vec<&TransactionRecord> = incoming.iter().collect();
        classify_transactions(&incoming, &local.transactions)
    });

    if duplicates_dropped > 0 {
        warn!(
            target: "shiftbook",
            event = "bundle_duplicate_ids",
            dropped = duplicates_dropped
        );
    }

    RestorePlan {
        shifts: classify_records(&shifts, &local.shifts),
        expenses: classify_records(&expenses, &local.expenses),
        transactions,
        duplicates_dropped,
    }
}

/// Classify shifts or expenses by UUID against the local collection.
pub fn classify_records<'a, T: SyncRecord>(
    incoming: &[&'a T],
    local: &[T],
) -> Vec<Classified<'a, T>> {
    let index: HashMap<Uuid, usize> = local
        .iter()
        .enumerate()
        .map(|(position, record)| (record.id(), position))
        .collect();

    incoming
        .iter()
        .map(|record| match index.get(&record.id()) {
            Some(position) => Classified {
                record: *record,
                classification: Classification::DuplicateById,
                local_index: Some(*position),
            },
            None => Classified {
                record: *record,
                classification: Classification::New,
                local_index: None,
            },
        })
        .collect()
}

/// Group incoming transactions by statement period and classify each period
/// against the set of periods already present locally.
pub fn classify_transactions<'a>(
    incoming: &[&'a TransactionRecord],
    local: &[TransactionRecord],
) -> Vec<PeriodGroup<'a>> {
    let known_periods: HashSet<&str> = local
        .iter()
        .map(|tx| tx.statement_period.as_str())
        .collect();

    let mut groups: Vec<PeriodGroup<'a>> = Vec::new();
    let mut positions: HashMap<&'a str, usize> = HashMap::new();
    for &tx in incoming {
        let period = tx.statement_period.as_str();
        match positions.get(period) {
            Some(position) => groups[*position].transactions.push(tx),
            None => {
                let classification = if known_periods.contains(period) {
                    Classification::DuplicateByPeriod
                } else {
                    Classification::New
                };
                positions.insert(period, groups.len());
                groups.push(PeriodGroup {
                    period,
                    classification,
                    transactions: vec![tx],
                });
            }
        }
    }
    groups
}

impl RestorePlan<'_> {
    /// Predict the counts `restore` would report for `policy`.
    pub fn preview(&self, policy: Policy) -> RestorePreview {
        let mut preview = RestorePreview {
            duplicates_dropped: self.duplicates_dropped,
            ..RestorePreview::default()
        };
        for item in &self.shifts {
            tally(
                &mut preview.shifts,
                action_for(EntityClass::Shifts, policy, item.classification),
                1,
            );
        }
        for item in &self.expenses {
            tally(
                &mut preview.expenses,
                action_for(EntityClass::Expenses, policy, item.classification),
                1,
            );
        }
        for group in self.transactions.iter().flatten() {
            tally(
                &mut preview.transactions,
                action_for(EntityClass::Transactions, policy, group.classification),
                group.transactions.len(),
            );
        }
        preview
    }
}

fn tally(counts: &mut PlannedCounts, action: Action, n: usize) {
    match action {
        Action::Insert => counts.added += n,
        Action::Overwrite => counts.updated += n,
        Action::Skip => counts.skipped += n,
    }
}

/// Keep the first occurrence of every id, preserving bundle order.
fn unique_by_id<T>(records: &[T], id: impl Fn(&T) -> Uuid) -> (Vec<&T>, usize) {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(records.len());
    for record in records {
        if seen.insert(id(record)) {
            unique.push(record);
        }
    }
    let dropped = records.len() - unique.len();
    (unique, dropped)
}

/// Drop attachments whose (normalized) filename repeats an earlier one.
pub fn dedupe_attachments(attachments: &mut Vec<ImageAttachment>) -> usize {
    let before = attachments.len();
    let mut seen = HashSet::new();
    attachments.retain(|attachment| {
        let key = normalize_filename(&attachment.filename)
            .unwrap_or_else(|_| attachment.filename.clone());
        seen.insert(key)
    });
    before - attachments.len()
}
