use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const LAST_PURGE_DATE: &str = "last_purge_date";

/// Value stored under an application state key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppValue {
    Int(i64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Text(String),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppValueKind {
    Int,
    Bool,
    DateTime,
    Text,
    None,
}

impl AppValue {
    pub fn kind(&self) -> AppValueKind {
        match self {
            AppValue::Int(_) => AppValueKind::Int,
            AppValue::Bool(_) => AppValueKind::Bool,
            AppValue::DateTime(_) => AppValueKind::DateTime,
            AppValue::Text(_) => AppValueKind::Text,
            AppValue::None => AppValueKind::None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            AppValue::DateTime(value) => Some(*value),
            _ => None,
        }
    }

    /// A stored value accepts a replacement of the same kind; an empty slot
    /// accepts anything. Changing the kind of a typed slot needs a reset.
    pub fn accepts(&self, replacement: &AppValue) -> bool {
        self.kind() == AppValueKind::None || self.kind() == replacement.kind()
    }
}

impl AppValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppValueKind::Int => "int",
            AppValueKind::Bool => "bool",
            AppValueKind::DateTime => "datetime",
            AppValueKind::Text => "string",
            AppValueKind::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "int" => Some(AppValueKind::Int),
            "bool" => Some(AppValueKind::Bool),
            "datetime" => Some(AppValueKind::DateTime),
            "string" => Some(AppValueKind::Text),
            "none" => Some(AppValueKind::None),
            _ => None,
        }
    }
}

impl fmt::Display for AppValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_slot_rejects_other_kinds() {
        let stored = AppValue::DateTime(Utc::now());
        assert!(stored.accepts(&AppValue::DateTime(Utc::now())));
        assert!(!stored.accepts(&AppValue::Int(3)));
        assert!(!stored.accepts(&AppValue::None));
        assert!(AppValue::None.accepts(&AppValue::Text("x".into())));
    }
}
