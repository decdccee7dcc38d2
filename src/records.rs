use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::parent_kind::ParentKind;

/// Event types that represent payouts to the driver's bank rather than earnings.
pub const BANK_TRANSFER_EVENT_TYPES: &[&str] = &["Transferred To Bank Account", "Bank Transfer"];

/// Sync bookkeeping carried by every shift and expense.
///
/// `is_deleted` marks a soft delete. Restore treats soft-deleted records
/// exactly like live ones; callers that want the active view filter on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    #[serde(default)]
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub modified_date: DateTime<Utc>,
    #[serde(default, rename = "deviceID")]
    pub device_id: String,
    #[serde(default)]
    pub is_deleted: bool,
}

impl SyncMetadata {
    pub fn new(device_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            created_date: now,
            modified_date: now,
            device_id: device_id.into(),
            is_deleted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ImageType {
    Receipt,
    GasPump,
    Odometer,
    Screenshot,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    pub id: Uuid,
    pub filename: String,
    #[serde(rename = "type", default)]
    pub image_type: ImageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub created_date: DateTime<Utc>,
}

impl ImageAttachment {
    pub fn new(filename: impl Into<String>, image_type: ImageType) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            image_type,
            description: None,
            created_date: Utc::now(),
        }
    }
}

/// Common surface of the ID-keyed collections (shifts and expenses).
pub trait SyncRecord: Clone {
    const KIND: ParentKind;

    fn id(&self) -> Uuid;
    fn image_attachments(&self) -> &[ImageAttachment];
    fn image_attachments_mut(&mut self) -> &mut Vec<ImageAttachment>;
    fn sync(&self) -> &SyncMetadata;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftRecord {
    pub id: Uuid,
    pub start_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_mileage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_mileage: Option<f64>,
    #[serde(default)]
    pub start_tank_reading: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_tank_reading: Option<f64>,
    #[serde(default)]
    pub has_full_tank_at_start: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did_refuel_at_end: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refuel_gallons: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refuel_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trips: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_fare: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tips: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotions: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rider_fees: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tolls: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolls_reimbursed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parking_fees: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misc_fees: Option<f64>,
    #[serde(default)]
    pub gas_price: f64,
    #[serde(default)]
    pub standard_mileage_rate: f64,
    #[serde(default)]
    pub image_attachments: Vec<ImageAttachment>,
    #[serde(flatten)]
    pub sync: SyncMetadata,
}

impl ShiftRecord {
    pub fn new(start_date: DateTime<Utc>, start_mileage: f64, device_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_date,
            end_date: None,
            start_mileage,
            end_mileage: None,
            start_tank_reading: 0.0,
            end_tank_reading: None,
            has_full_tank_at_start: false,
            did_refuel_at_end: None,
            refuel_gallons: None,
            refuel_cost: None,
            trips: None,
            net_fare: None,
            tips: None,
            promotions: None,
            rider_fees: None,
            total_tolls: None,
            tolls_reimbursed: None,
            parking_fees: None,
            misc_fees: None,
            gas_price: 0.0,
            standard_mileage_rate: 0.0,
            image_attachments: Vec::new(),
            sync: SyncMetadata::new(device_id),
        }
    }
}

impl SyncRecord for ShiftRecord {
    const KIND: ParentKind = ParentKind::Shifts;

    fn id(&self) -> Uuid {
        self.id
    }

    fn image_attachments(&self) -> &[ImageAttachment] {
        &self.image_attachments
    }

    fn image_attachments_mut(&mut self) -> &mut Vec<ImageAttachment> {
        &mut self.image_attachments
    }

    fn sync(&self) -> &SyncMetadata {
        &self.sync
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ExpenseCategory {
    #[serde(alias = "vehicle")]
    Vehicle,
    #[serde(alias = "equipment")]
    Equipment,
    #[serde(alias = "supplies")]
    Supplies,
    #[serde(alias = "amenities")]
    Amenities,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseRecord {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub category: ExpenseCategory,
    #[serde(default)]
    pub description: String,
    pub amount: f64,
    #[serde(default)]
    pub image_attachments: Vec<ImageAttachment>,
    #[serde(flatten)]
    pub sync: SyncMetadata,
}

impl ExpenseRecord {
    pub fn new(
        date: DateTime<Utc>,
        category: ExpenseCategory,
        description: impl Into<String>,
        amount: f64,
        device_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            date,
            category,
            description: description.into(),
            amount,
            image_attachments: Vec::new(),
            sync: SyncMetadata::new(device_id),
        }
    }
}

impl SyncRecord for ExpenseRecord {
    const KIND: ParentKind = ParentKind::Expenses;

    fn id(&self) -> Uuid {
        self.id
    }

    fn image_attachments(&self) -> &[ImageAttachment] {
        &self.image_attachments
    }

    fn image_attachments_mut(&mut self) -> &mut Vec<ImageAttachment> {
        &mut self.image_attachments
    }

    fn sync(&self) -> &SyncMetadata {
        &self.sync
    }
}

/// An earnings event imported from a rideshare statement.
///
/// Deduplication happens on `statement_period`, never on `id`: once a period
/// has been imported locally, its transactions are historical facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: Uuid,
    pub transaction_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub event_type: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolls_reimbursed: Option<f64>,
    pub statement_period: String,
    #[serde(default, rename = "shiftID", skip_serializing_if = "Option::is_none")]
    pub shift_id: Option<Uuid>,
    #[serde(default)]
    pub import_date: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(
        transaction_date: DateTime<Utc>,
        event_type: impl Into<String>,
        amount: f64,
        statement_period: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_date,
            event_date: None,
            event_type: event_type.into(),
            amount,
            tolls_reimbursed: None,
            statement_period: statement_period.into(),
            shift_id: None,
            import_date: Utc::now(),
        }
    }

    /// Bank transfers are stored but never matched to shifts.
    pub fn is_bank_transfer(&self) -> bool {
        BANK_TRANSFER_EVENT_TYPES
            .iter()
            .any(|kind| self.event_type.eq_ignore_ascii_case(kind))
    }
}
