use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::parent_kind::ParentKind;

/// How a bundle is combined with the local dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    /// Wipe local shifts, expenses, transactions and images, then insert the bundle.
    ReplaceAll,
    /// Insert records and statement periods the local dataset does not have; touch nothing else.
    AddMissing,
    /// Insert new records and overwrite existing shifts and expenses in place.
    ///
    /// Transactions are NOT merged: a statement period that already exists
    /// locally is skipped exactly as under [`Policy::AddMissing`], even when
    /// the bundle carries different amounts for it. Imported statement
    /// periods are treated as immutable history.
    Merge,
}

impl Policy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Policy::ReplaceAll => "replace-all",
            Policy::AddMissing => "add-missing",
            Policy::Merge => "merge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Shifts,
    Expenses,
    Transactions,
}

impl From<ParentKind> for EntityClass {
    fn from(kind: ParentKind) -> Self {
        match kind {
            ParentKind::Shifts => EntityClass::Shifts,
            ParentKind::Expenses => EntityClass::Expenses,
        }
    }
}

/// Result of matching one incoming record against local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    New,
    DuplicateById,
    DuplicateByPeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Insert,
    Overwrite,
    Skip,
}

/// The entity-class x policy x classification dispatch table.
///
/// Replace-All has already emptied the local collections when inserts run,
/// so every incoming record is an insert.
pub const fn action_for(
    class: EntityClass,
    policy: Policy,
    classification: Classification,
) -> Action {
    match (policy, classification) {
        (Policy::ReplaceAll, _) => Action::Insert,
        (_, Classification::New) => Action::Insert,
        (Policy::AddMissing, _) => Action::Skip,
        (Policy::Merge, Classification::DuplicateById) => match class {
            EntityClass::Shifts | EntityClass::Expenses => Action::Overwrite,
            EntityClass::Transactions => Action::Skip,
        },
        (Policy::Merge, Classification::DuplicateByPeriod) => Action::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_POLICIES: [Policy; 3] = [Policy::ReplaceAll, Policy::AddMissing, Policy::Merge];

    #[test]
    fn new_records_are_always_inserted() {
        for policy in ALL_POLICIES {
            for class in [EntityClass::Shifts, EntityClass::Expenses, EntityClass::Transactions] {
                assert_eq!(action_for(class, policy, Classification::New), Action::Insert);
            }
        }
    }

    #[test]
    fn merge_overwrites_ids_but_never_periods() {
        assert_eq!(
            action_for(EntityClass::Shifts, Policy::Merge, Classification::DuplicateById),
            Action::Overwrite
        );
        assert_eq!(
            action_for(EntityClass::Expenses, Policy::Merge, Classification::DuplicateById),
            Action::Overwrite
        );
        assert_eq!(
            action_for(
                EntityClass::Transactions,
                Policy::Merge,
                Classification::DuplicateByPeriod
            ),
            Action::Skip
        );
    }

    #[test]
    fn add_missing_skips_every_duplicate() {
        for classification in [Classification::DuplicateById, Classification::DuplicateByPeriod] {
            for class in [EntityClass::Shifts, EntityClass::Expenses, EntityClass::Transactions] {
                assert_eq!(
                    action_for(class, Policy::AddMissing, classification),
                    Action::Skip
                );
            }
        }
    }

    #[test]
    fn policy_slugs_match_serde() {
        for policy in ALL_POLICIES {
            let json = serde_json::to_string(&policy).unwrap();
            assert_eq!(json, format!("\"{}\"", policy.as_str()));
        }
    }
}
