use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Entity category an image attachment belongs to.
///
/// The slug doubles as the directory name under `Images/` in a bundle and
/// under the attachment store root, so it must stay filesystem safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentKind {
    Shifts,
    Expenses,
}

impl ParentKind {
    pub const ALL: [ParentKind; 2] = [ParentKind::Shifts, ParentKind::Expenses];

    pub const fn as_str(self) -> &'static str {
        match self {
            ParentKind::Shifts => "shifts",
            ParentKind::Expenses => "expenses",
        }
    }

    pub fn iter() -> impl Iterator<Item = ParentKind> {
        Self::ALL.into_iter()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid parent kind: {value}")]
pub struct ParentKindError {
    value: String,
}

impl ParentKindError {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl FromStr for ParentKind {
    type Err = ParentKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shifts" => Ok(ParentKind::Shifts),
            "expenses" => Ok(ParentKind::Expenses),
            other => Err(ParentKindError::new(other)),
        }
    }
}

impl fmt::Display for ParentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
