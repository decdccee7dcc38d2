use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SyncFrequency {
    #[default]
    Immediate,
    Hourly,
    Daily,
    Weekly,
}

/// User preferences as carried in a backup.
///
/// The snapshot is replaced as a single unit on restore; there is no per-field
/// merge. Fields missing from an older bundle decode to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferencesSnapshot {
    pub tank_capacity: f64,
    pub gas_price: f64,
    pub standard_mileage_rate: f64,
    /// 1 = Sunday ... 7 = Saturday.
    pub week_start_day: u8,
    pub date_format: String,
    pub time_format: String,
    pub time_zone_identifier: String,
    pub tip_deduction_enabled: bool,
    pub effective_personal_tax_rate: f64,
    pub incremental_sync_enabled: bool,
    pub sync_frequency: SyncFrequency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_incremental_sync_date: Option<DateTime<Utc>>,
}

impl Default for PreferencesSnapshot {
    fn default() -> Self {
        Self {
            tank_capacity: 14.0,
            gas_price: 3.50,
            standard_mileage_rate: 0.70,
            week_start_day: 1,
            date_format: "M/d/yyyy".to_string(),
            time_format: "h:mm a".to_string(),
            time_zone_identifier: "America/New_York".to_string(),
            tip_deduction_enabled: false,
            effective_personal_tax_rate: 22.0,
            incremental_sync_enabled: false,
            sync_frequency: SyncFrequency::Immediate,
            last_incremental_sync_date: None,
        }
    }
}

/// Names of the fields that differed before an overwrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesChange {
    pub changed_fields: Vec<&'static str>,
}

impl PreferencesChange {
    pub fn is_empty(&self) -> bool {
        self.changed_fields.is_empty()
    }
}

/// Overwrite `local` with `snapshot`, field for field, regardless of policy.
///
/// Suspicious values (unknown time zone, week start outside 1..=7) are logged
/// but still applied: the bundle is the source of truth for preferences.
pub fn apply_snapshot(
    local: &mut PreferencesSnapshot,
    snapshot: &PreferencesSnapshot,
) -> PreferencesChange {
    let change = diff(local, snapshot);

    if Tz::from_str(&snapshot.time_zone_identifier).is_err() {
        warn!(
            target: "shiftbook",
            event = "preferences_unknown_time_zone",
            time_zone = %snapshot.time_zone_identifier
        );
    }
    if !(1..=7).contains(&snapshot.week_start_day) {
        warn!(
            target: "shiftbook",
            event = "preferences_week_start_out_of_range",
            week_start_day = snapshot.week_start_day
        );
    }

    *local = snapshot.clone();

    for field in &change.changed_fields {
        debug!(target: "shiftbook", event = "preferences_field_changed", field = *field);
    }
    info!(
        target: "shiftbook",
        event = "preferences_applied",
        changed = change.changed_fields.len()
    );
    change
}

fn diff(before: &PreferencesSnapshot, after: &PreferencesSnapshot) -> PreferencesChange {
    let mut changed_fields = Vec::new();
    macro_rules! compare {
        ($($field:ident),+ $(,)?) => {
            $(
                if before.$field != after.$field {
                    changed_fields.push(stringify!($field));
                }
            )+
        };
    }
    compare!(
        tank_capacity,
        gas_price,
        standard_mileage_rate,
        week_start_day,
        date_format,
        time_format,
        time_zone_identifier,
        tip_deduction_enabled,
        effective_personal_tax_rate,
        incremental_sync_enabled,
        sync_frequency,
        last_incremental_sync_date,
    );
    PreferencesChange { changed_fields }
}
