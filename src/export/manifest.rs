use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::preferences::PreferencesSnapshot;
use crate::records::{ExpenseRecord, ShiftRecord, TransactionRecord};

/// File name of the manifest at the top of a bundle folder.
pub const MANIFEST_NAME: &str = "backup.json";

/// The `backup.json` document, shared by archive and legacy bundles.
///
/// `transactions` is `None` when the field is absent (legacy bundles and
/// exports made before transaction import existed). Every record collection
/// tolerates being absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    #[serde(default)]
    pub shifts: Vec<ShiftRecord>,
    #[serde(default)]
    pub expenses: Vec<ExpenseRecord>,
    #[serde(
        default,
        rename = "uberTransactions",
        skip_serializing_if = "Option::is_none"
    )]
    pub transactions: Option<Vec<TransactionRecord>>,
    #[serde(default)]
    pub preferences: PreferencesSnapshot,
    pub export_date: DateTime<Utc>,
    #[serde(default)]
    pub app_version: String,
}

impl BackupManifest {
    pub fn new(app_version: impl Into<String>) -> Self {
        Self {
            shifts: Vec::new(),
            expenses: Vec::new(),
            transactions: None,
            preferences: PreferencesSnapshot::default(),
            export_date: Utc::now(),
            app_version: app_version.into(),
        }
    }

    pub fn image_count(&self) -> usize {
        self.shifts
            .iter()
            .map(|s| s.image_attachments.len())
            .chain(self.expenses.iter().map(|e| e.image_attachments.len()))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn manifest_defaults() {
        let m = BackupManifest::new("2.1.0");
        assert_eq!(m.app_version, "2.1.0");
        assert!(m.shifts.is_empty());
        assert!(m.expenses.is_empty());
        assert!(m.transactions.is_none());
        assert_eq!(m.image_count(), 0);
    }

    #[test]
    fn transactions_serialize_under_legacy_field_name() {
        let mut m = BackupManifest::new("2.1.0");
        m.transactions = Some(Vec::new());
        let value = serde_json::to_value(&m).unwrap();
        assert!(value.get("uberTransactions").is_some());
        assert!(value.get("transactions").is_none());
        assert!(value.get("exportDate").is_some());
    }

    #[test]
    fn absent_transactions_decode_to_none() {
        let m: BackupManifest = serde_json::from_value(json!({
            "shifts": [],
            "preferences": {},
            "exportDate": "2024-10-21T12:00:00Z",
            "appVersion": "1.0"
        }))
        .unwrap();
        assert!(m.transactions.is_none());
        assert!(m.expenses.is_empty());
    }
}
