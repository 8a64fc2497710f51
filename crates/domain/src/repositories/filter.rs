//! Storage-agnostic query expressions.
//!
//! A filter is a tree of column comparisons combined with `and`, `or` and
//! `not`. The JSON form mirrors the tree directly:
//!
//! ```text
//! { "and": [ { "=": { "purged": false } }, { "in": { "state": ["done", "cancelled"] } } ] }
//! ```
//!
//! Catalog implementations translate the tree into native queries.

use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::entities::TorrentState;
use crate::errors::DomainError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    DateTime(DateTime<Utc>),
    Null,
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Text(_) => "text",
            Value::DateTime(_) => "datetime",
            Value::Null => "null",
            Value::List(_) => "list",
        }
    }

    pub fn from_json(json: &Json) -> Result<Self, DomainError> {
        Ok(match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => Value::Text(s.clone()),
            Json::Array(items) => Value::List(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            Json::Object(_) => {
                return Err(DomainError::InvalidFilter(format!(
                    "objects are not comparable values: {json}"
                )))
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Null => f.write_str("null"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<TorrentState> for Value {
    fn from(v: TorrentState) -> Self {
        Value::Text(v.as_str().to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    Ne,
    In,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Ne => "!=",
            Operator::In => "in",
        }
    }
}

impl FromStr for Operator {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" | "==" => Ok(Operator::Eq),
            "<" => Ok(Operator::Lt),
            ">" => Ok(Operator::Gt),
            "<=" => Ok(Operator::Le),
            ">=" => Ok(Operator::Ge),
            "!=" => Ok(Operator::Ne),
            "in" => Ok(Operator::In),
            other => Err(DomainError::UnknownOperator(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        op: Operator,
        column: String,
        value: Value,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn compare(op: Operator, column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Compare {
            op,
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Operator::Eq, column, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Operator::Ne, column, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Operator::Lt, column, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Operator::Gt, column, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Operator::Le, column, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Operator::Ge, column, value)
    }

    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::compare(
            Operator::In,
            column,
            Value::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Parses the JSON tree form. Unknown operators are rejected.
    pub fn from_json(json: &Json) -> Result<Self, DomainError> {
        let object = json.as_object().ok_or_else(|| {
            DomainError::InvalidFilter(format!("expected an object, got {json}"))
        })?;
        if object.len() != 1 {
            return Err(DomainError::InvalidFilter(format!(
                "expected exactly one operator, got {}",
                object.len()
            )));
        }
        let (key, body) = object
            .iter()
            .next()
            .ok_or_else(|| DomainError::InvalidFilter("empty filter".to_string()))?;

        match key.as_str() {
            "and" | "or" => {
                let items = body.as_array().ok_or_else(|| {
                    DomainError::InvalidFilter(format!("`{key}` expects a list"))
                })?;
                let children = items
                    .iter()
                    .map(Filter::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if key == "and" {
                    Filter::And(children)
                } else {
                    Filter::Or(children)
                })
            }
            "not" => Ok(Filter::not(Filter::from_json(body)?)),
            op => {
                let op = op.parse::<Operator>()?;
                let leaf = body.as_object().ok_or_else(|| {
                    DomainError::InvalidFilter(format!("`{key}` expects {{column: value}}"))
                })?;
                let mut comparisons = leaf
                    .iter()
                    .map(|(column, value)| {
                        Ok(Filter::Compare {
                            op,
                            column: column.clone(),
                            value: Value::from_json(value)?,
                        })
                    })
                    .collect::<Result<Vec<_>, DomainError>>()?;
                match comparisons.len() {
                    0 => Err(DomainError::InvalidFilter(format!(
                        "`{key}` has no column"
                    ))),
                    1 => Ok(comparisons.remove(0)),
                    _ => Ok(Filter::And(comparisons)),
                }
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Compare { op, column, value } => {
                write!(f, "{column} {} {value}", op.symbol())
            }
            Filter::And(items) | Filter::Or(items) => {
                let joiner = if matches!(self, Filter::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(joiner)?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Filter::Not(inner) => write!(f, "NOT {inner}"),
        }
    }
}

/// Column assignments for bulk updates.
pub type ValueMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Torrent,
    MediaFile,
    AppState,
}

impl EntityKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Torrent => "torrents",
            EntityKind::MediaFile => "media_files",
            EntityKind::AppState => "app_state",
        }
    }
}

/// Named selectors shared by every catalog implementation.
pub mod selectors {
    use super::Filter;
    use crate::entities::TorrentState;

    const LIVE_STATES: [TorrentState; 3] =
        [TorrentState::Init, TorrentState::Ready, TorrentState::Active];
    const TERMINAL_STATES: [TorrentState; 2] = [TorrentState::Done, TorrentState::Cancelled];

    pub fn active_torrents() -> Filter {
        Filter::and([
            Filter::eq("invalid", false),
            Filter::eq("purged", false),
            Filter::eq("failed", false),
            Filter::is_in("state", LIVE_STATES),
        ])
    }

    pub fn torrents_by_state(state: TorrentState, failed: bool) -> Filter {
        Filter::and([Filter::eq("state", state), Filter::eq("failed", failed)])
    }

    pub fn torrents_eligible_for_purging() -> Filter {
        Filter::and([
            Filter::eq("invalid", false),
            Filter::eq("purged", false),
            Filter::is_in("state", TERMINAL_STATES),
        ])
    }

    pub fn torrents_eligible_for_removal() -> Filter {
        Filter::and([
            Filter::eq("purged", true),
            Filter::is_in("state", TERMINAL_STATES),
        ])
    }

    pub fn failed_torrents() -> Filter {
        Filter::and([
            Filter::eq("invalid", false),
            Filter::eq("purged", false),
            Filter::eq("failed", true),
            Filter::is_in("state", LIVE_STATES),
        ])
    }

    pub fn medias_of(torrent_id: i32) -> Filter {
        Filter::eq("torrent_id", torrent_id)
    }

    pub fn processed_medias(torrent_id: i32) -> Filter {
        Filter::and([
            medias_of(torrent_id),
            Filter::or([
                Filter::eq("synced", true),
                Filter::eq("missing", true),
                Filter::eq("skipped", true),
            ]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_json_tree() {
        let filter = Filter::from_json(&json!({
            "and": [
                { "=": { "purged": false } },
                { "not": { "in": { "state": ["done", "cancelled"] } } },
                { "or": [ { ">=": { "retry_count": 2 } }, { "!=": { "error_msg": null } } ] }
            ]
        }))
        .unwrap();

        assert_eq!(
            filter,
            Filter::and([
                Filter::eq("purged", false),
                Filter::not(Filter::is_in("state", ["done", "cancelled"])),
                Filter::or([Filter::ge("retry_count", 2), Filter::ne("error_msg", Value::Null)]),
            ])
        );
    }

    #[test]
    fn unknown_operator_fails_loudly() {
        let err = Filter::from_json(&json!({ "like": { "name": "%x%" } })).unwrap_err();
        assert!(matches!(err, DomainError::UnknownOperator(ref op) if op == "like"));
        assert!(err.is_programming_error());
    }

    #[test]
    fn multi_column_leaf_becomes_conjunction() {
        let filter = Filter::from_json(&json!({ "=": { "failed": true, "purged": false } })).unwrap();
        assert_eq!(
            filter,
            Filter::and([Filter::eq("failed", true), Filter::eq("purged", false)])
        );
    }

    #[test]
    fn display_is_readable() {
        let filter = selectors::torrents_eligible_for_removal();
        assert_eq!(
            filter.to_string(),
            "(purged = true AND state in [\"done\", \"cancelled\"])"
        );
    }
}
