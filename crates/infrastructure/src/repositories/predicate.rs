//! Translates [`Filter`] trees into boxed diesel predicates.
//!
//! Composite nodes (`and`, `or`, `not`) are interpreted once for every table;
//! leaf comparisons dispatch on the column name to a typed diesel column.

use chrono::{DateTime, NaiveDateTime};
use diesel::expression::{AsExpression, BoxableExpression};
use diesel::prelude::*;
use diesel::sql_types::{Bool, Nullable};
use diesel::sqlite::Sqlite;
use domain::{DomainError, Filter, Operator, TorrentState, Value};

use crate::database::{app_state, media_files, torrents};

/// Predicates are typed `Nullable<Bool>` so nullable and non-null columns
/// combine freely.
pub(crate) type Predicate<T> = Box<dyn BoxableExpression<T, Sqlite, SqlType = Nullable<Bool>>>;

pub(crate) trait FilterTarget: Sized + 'static {
    const ENTITY: &'static str;

    fn compare(op: Operator, column: &str, value: &Value) -> Result<Predicate<Self>, DomainError>;
    fn constant(value: bool) -> Predicate<Self>;
    fn and(lhs: Predicate<Self>, rhs: Predicate<Self>) -> Predicate<Self>;
    fn or(lhs: Predicate<Self>, rhs: Predicate<Self>) -> Predicate<Self>;
    fn not(inner: Predicate<Self>) -> Predicate<Self>;
}

pub(crate) fn build<T: FilterTarget>(filter: &Filter) -> Result<Predicate<T>, DomainError> {
    match filter {
        Filter::Compare { op, column, value } => T::compare(*op, column, value),
        Filter::And(items) => combine::<T>(items, true),
        Filter::Or(items) => combine::<T>(items, false),
        Filter::Not(inner) => Ok(T::not(build::<T>(inner)?)),
    }
}

fn combine<T: FilterTarget>(items: &[Filter], conjunction: bool) -> Result<Predicate<T>, DomainError> {
    let mut iter = items.iter();
    let Some(first) = iter.next() else {
        // Empty AND matches everything, empty OR matches nothing.
        return Ok(T::constant(conjunction));
    };
    let mut acc = build::<T>(first)?;
    for item in iter {
        let next = build::<T>(item)?;
        acc = if conjunction {
            T::and(acc, next)
        } else {
            T::or(acc, next)
        };
    }
    Ok(acc)
}

/// Logical combinators, identical for every table.
macro_rules! composite_ops {
    ($table:ty) => {
        fn constant(value: bool) -> Predicate<$table> {
            Box::new(<bool as AsExpression<Bool>>::as_expression(value).nullable())
        }

        fn and(lhs: Predicate<$table>, rhs: Predicate<$table>) -> Predicate<$table> {
            Box::new(lhs.and(rhs))
        }

        fn or(lhs: Predicate<$table>, rhs: Predicate<$table>) -> Predicate<$table> {
            Box::new(lhs.or(rhs))
        }

        fn not(inner: Predicate<$table>) -> Predicate<$table> {
            Box::new(diesel::dsl::not(inner))
        }
    };
}

macro_rules! compare_column {
    ($table:ty, $column:expr, $op:expr, $value:expr, $convert:path) => {{
        let predicate: Predicate<$table> = match $op {
            Operator::Eq => Box::new($column.eq($convert($value)?).nullable()),
            Operator::Ne => Box::new($column.ne($convert($value)?).nullable()),
            Operator::Lt => Box::new($column.lt($convert($value)?).nullable()),
            Operator::Gt => Box::new($column.gt($convert($value)?).nullable()),
            Operator::Le => Box::new($column.le($convert($value)?).nullable()),
            Operator::Ge => Box::new($column.ge($convert($value)?).nullable()),
            Operator::In => Box::new($column.eq_any(convert_list($value, $convert)?).nullable()),
        };
        predicate
    }};
}

/// Like `compare_column!` for nullable columns: `= null` and `!= null` become
/// `IS NULL` and `IS NOT NULL`.
macro_rules! compare_nullable_column {
    ($table:ty, $column:expr, $op:expr, $value:expr, $convert:path) => {{
        match ($op, $value) {
            (Operator::Eq, Value::Null) => {
                let predicate: Predicate<$table> = Box::new($column.is_null().nullable());
                predicate
            }
            (Operator::Ne, Value::Null) => {
                let predicate: Predicate<$table> = Box::new($column.is_not_null().nullable());
                predicate
            }
            (op, value) => compare_column!($table, $column, op, value, $convert),
        }
    }};
}

impl FilterTarget for torrents::table {
    const ENTITY: &'static str = "torrents";

    fn compare(op: Operator, column: &str, value: &Value) -> Result<Predicate<Self>, DomainError> {
        use torrents::dsl;
        Ok(match column {
            "id" => compare_column!(torrents::table, dsl::id, op, value, as_i32),
            "name" => compare_column!(torrents::table, dsl::name, op, value, as_text),
            "created_at" => compare_column!(torrents::table, dsl::created_at, op, value, as_timestamp),
            "updated_at" => compare_column!(torrents::table, dsl::updated_at, op, value, as_timestamp),
            "state" => compare_column!(torrents::table, dsl::state, op, value, as_state),
            "retry_count" => compare_column!(torrents::table, dsl::retry_count, op, value, as_i32),
            "failed" => compare_column!(torrents::table, dsl::failed, op, value, as_bool),
            "error_msg" => compare_nullable_column!(torrents::table, dsl::error_msg, op, value, as_text),
            "invalid" => compare_column!(torrents::table, dsl::invalid, op, value, as_bool),
            "purged" => compare_column!(torrents::table, dsl::purged, op, value, as_bool),
            other => return Err(unknown_column(Self::ENTITY, other)),
        })
    }

    composite_ops!(torrents::table);
}

impl FilterTarget for media_files::table {
    const ENTITY: &'static str = "media_files";

    fn compare(op: Operator, column: &str, value: &Value) -> Result<Predicate<Self>, DomainError> {
        use media_files::dsl;
        Ok(match column {
            "id" => compare_column!(media_files::table, dsl::id, op, value, as_i32),
            "torrent_id" => compare_column!(media_files::table, dsl::torrent_id, op, value, as_i32),
            "filename" => compare_column!(media_files::table, dsl::filename, op, value, as_text),
            "file_ext" => compare_column!(media_files::table, dsl::file_ext, op, value, as_text),
            "file_path" => compare_nullable_column!(media_files::table, dsl::file_path, op, value, as_text),
            "size" => compare_column!(media_files::table, dsl::size, op, value, as_i64),
            "compressed" => compare_column!(media_files::table, dsl::compressed, op, value, as_bool),
            "synced" => compare_column!(media_files::table, dsl::synced, op, value, as_bool),
            "missing" => compare_column!(media_files::table, dsl::missing, op, value, as_bool),
            "skipped" => compare_column!(media_files::table, dsl::skipped, op, value, as_bool),
            "error_msg" => compare_nullable_column!(media_files::table, dsl::error_msg, op, value, as_text),
            "total_time" => compare_nullable_column!(media_files::table, dsl::total_time, op, value, as_f64),
            other => return Err(unknown_column(Self::ENTITY, other)),
        })
    }

    composite_ops!(media_files::table);
}

impl FilterTarget for app_state::table {
    const ENTITY: &'static str = "app_state";

    fn compare(op: Operator, column: &str, value: &Value) -> Result<Predicate<Self>, DomainError> {
        use app_state::dsl;
        Ok(match column {
            "id" => compare_column!(app_state::table, dsl::id, op, value, as_i32),
            "name" => compare_column!(app_state::table, dsl::name, op, value, as_text),
            "value_type" => compare_column!(app_state::table, dsl::value_type, op, value, as_text),
            other => return Err(unknown_column(Self::ENTITY, other)),
        })
    }

    composite_ops!(app_state::table);
}

fn unknown_column(entity: &'static str, column: &str) -> DomainError {
    DomainError::UnknownColumn {
        entity,
        column: column.to_string(),
    }
}

fn mismatch(expected: &str, value: &Value) -> DomainError {
    DomainError::InvalidFilter(format!(
        "expected {expected}, got {} `{value}`",
        value.type_name()
    ))
}

fn convert_list<T>(
    value: &Value,
    convert: fn(&Value) -> Result<T, DomainError>,
) -> Result<Vec<T>, DomainError> {
    match value {
        Value::List(items) => items.iter().map(convert).collect(),
        other => Err(mismatch("a list for `in`", other)),
    }
}

pub(crate) fn as_i32(value: &Value) -> Result<i32, DomainError> {
    match value {
        Value::Int(v) => i32::try_from(*v).map_err(|_| mismatch("a 32-bit integer", value)),
        other => Err(mismatch("an integer", other)),
    }
}

pub(crate) fn as_i64(value: &Value) -> Result<i64, DomainError> {
    match value {
        Value::Int(v) => Ok(*v),
        other => Err(mismatch("an integer", other)),
    }
}

pub(crate) fn as_f64(value: &Value) -> Result<f64, DomainError> {
    match value {
        Value::Float(v) => Ok(*v),
        Value::Int(v) => Ok(*v as f64),
        other => Err(mismatch("a number", other)),
    }
}

/// Booleans are stored as 0/1, so integers 0 and 1 are accepted too.
pub(crate) fn as_bool(value: &Value) -> Result<bool, DomainError> {
    match value {
        Value::Bool(v) => Ok(*v),
        Value::Int(0) => Ok(false),
        Value::Int(1) => Ok(true),
        other => Err(mismatch("a boolean", other)),
    }
}

pub(crate) fn as_text(value: &Value) -> Result<String, DomainError> {
    match value {
        Value::Text(v) => Ok(v.clone()),
        other => Err(mismatch("text", other)),
    }
}

pub(crate) fn as_state(value: &Value) -> Result<String, DomainError> {
    let text = as_text(value)?;
    text.parse::<TorrentState>()
        .map(|state| state.as_str().to_string())
        .map_err(|_| mismatch("a torrent state", value))
}

pub(crate) fn as_timestamp(value: &Value) -> Result<NaiveDateTime, DomainError> {
    match value {
        Value::DateTime(v) => Ok(v.naive_utc()),
        Value::Text(text) => DateTime::parse_from_rfc3339(text)
            .map(|v| v.naive_utc())
            .map_err(|_| mismatch("an RFC 3339 timestamp", value)),
        other => Err(mismatch("a timestamp", other)),
    }
}

/// Nullable variants used by bulk updates.
pub(crate) fn as_optional<T>(
    value: &Value,
    convert: fn(&Value) -> Result<T, DomainError>,
) -> Result<Option<T>, DomainError> {
    match value {
        Value::Null => Ok(None),
        other => convert(other).map(Some),
    }
}
