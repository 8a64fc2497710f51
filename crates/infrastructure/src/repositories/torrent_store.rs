use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::Sqlite;
use domain::{DomainError, Filter, Torrent, ValueMap};
use tracing::debug;

use super::models::{TorrentModel, TorrentRow};
use super::predicate::{as_bool, as_i32, as_optional, as_state, as_text, as_timestamp, build};
use super::store_error::StoreResult;
use crate::database::torrents;

fn into_domain(models: Vec<TorrentModel>) -> StoreResult<Vec<Torrent>> {
    Ok(models
        .into_iter()
        .map(Torrent::try_from)
        .collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn find(conn: &mut SqliteConnection, id: i32) -> StoreResult<Option<Torrent>> {
    torrents::table
        .find(id)
        .select(TorrentModel::as_select())
        .first::<TorrentModel>(conn)
        .optional()?
        .map(Torrent::try_from)
        .transpose()
        .map_err(Into::into)
}

pub(crate) fn find_by_name(conn: &mut SqliteConnection, name: &str) -> StoreResult<Option<Torrent>> {
    torrents::table
        .filter(torrents::name.eq(name))
        .select(TorrentModel::as_select())
        .first::<TorrentModel>(conn)
        .optional()?
        .map(Torrent::try_from)
        .transpose()
        .map_err(Into::into)
}

/// Inserts when the torrent has no id, updates otherwise.
pub(crate) fn save(conn: &mut SqliteConnection, torrent: &Torrent) -> StoreResult<Torrent> {
    let row = TorrentRow::from(torrent);
    conn.transaction(|conn| {
        let id = match torrent.id {
            Some(id) => {
                let updated = diesel::update(torrents::table.find(id))
                    .set(&row)
                    .execute(conn)?;
                if updated == 0 {
                    return Err(DomainError::TorrentNotFound(id).into());
                }
                id
            }
            None => {
                diesel::insert_into(torrents::table)
                    .values(&row)
                    .execute(conn)?;
                // Names are unique, so the fresh row is found by name
                torrents::table
                    .filter(torrents::name.eq(&row.name))
                    .select(torrents::id)
                    .first::<i32>(conn)?
            }
        };
        find(conn, id)?.ok_or_else(|| DomainError::TorrentNotFound(id).into())
    })
}

pub(crate) fn fetch_or_create(conn: &mut SqliteConnection, name: &str) -> StoreResult<Torrent> {
    conn.transaction(|conn| match find_by_name(conn, name)? {
        Some(torrent) => Ok(torrent),
        None => save(conn, &Torrent::new(name)),
    })
}

pub(crate) fn load(conn: &mut SqliteConnection, filter: &Filter, log: bool) -> StoreResult<Vec<Torrent>> {
    let query = torrents::table
        .filter(build::<torrents::table>(filter)?)
        .order(torrents::id.asc())
        .select(TorrentModel::as_select());
    if log {
        debug!(query = %diesel::debug_query::<Sqlite, _>(&query), "catalog query");
    }
    into_domain(query.load::<TorrentModel>(conn)?)
}

fn matching_ids(conn: &mut SqliteConnection, filter: &Filter) -> StoreResult<Vec<i32>> {
    Ok(torrents::table
        .filter(build::<torrents::table>(filter)?)
        .select(torrents::id)
        .load::<i32>(conn)?)
}

/// Applies every assignment in `values` to the rows matching `filter`. The
/// matching set is resolved once, before any column changes.
pub(crate) fn update_where(
    conn: &mut SqliteConnection,
    values: &ValueMap,
    filter: &Filter,
) -> StoreResult<usize> {
    use torrents::dsl;

    conn.transaction(|conn| {
        let ids = matching_ids(conn, filter)?;
        if ids.is_empty() || values.is_empty() {
            return Ok(0);
        }

        macro_rules! assign {
            ($assignment:expr) => {
                diesel::update(torrents::table.filter(dsl::id.eq_any(ids.clone())))
                    .set($assignment)
                    .execute(conn)?
            };
        }

        for (column, value) in values {
            match column.as_str() {
                "name" => assign!(dsl::name.eq(as_text(value)?)),
                "created_at" => assign!(dsl::created_at.eq(as_timestamp(value)?)),
                "updated_at" => assign!(dsl::updated_at.eq(as_timestamp(value)?)),
                "state" => assign!(dsl::state.eq(as_state(value)?)),
                "retry_count" => assign!(dsl::retry_count.eq(as_i32(value)?)),
                "failed" => assign!(dsl::failed.eq(as_bool(value)?)),
                "error_msg" => assign!(dsl::error_msg.eq(as_optional(value, as_text)?)),
                "invalid" => assign!(dsl::invalid.eq(as_bool(value)?)),
                "purged" => assign!(dsl::purged.eq(as_bool(value)?)),
                other => {
                    return Err(DomainError::UnknownColumn {
                        entity: "torrents",
                        column: other.to_string(),
                    }
                    .into())
                }
            };
        }

        if !values.contains_key("updated_at") {
            assign!(dsl::updated_at.eq(Utc::now().naive_utc()));
        }
        Ok(ids.len())
    })
}

pub(crate) fn delete(conn: &mut SqliteConnection, id: i32) -> StoreResult<()> {
    diesel::delete(torrents::table.find(id)).execute(conn)?;
    Ok(())
}

pub(crate) fn delete_where(conn: &mut SqliteConnection, filter: &Filter) -> StoreResult<usize> {
    conn.transaction(|conn| {
        let ids = matching_ids(conn, filter)?;
        Ok(diesel::delete(torrents::table.filter(torrents::id.eq_any(ids))).execute(conn)?)
    })
}
