use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel::sqlite::Sqlite;
use domain::{DomainError, Filter, MediaFile, ValueMap};
use tracing::debug;

use super::models::{MediaModel, MediaRow};
use super::predicate::{as_bool, as_f64, as_i32, as_i64, as_optional, as_text, build};
use super::store_error::StoreResult;
use crate::database::media_files;

pub(crate) fn find(conn: &mut SqliteConnection, id: i32) -> StoreResult<Option<MediaFile>> {
    Ok(media_files::table
        .find(id)
        .select(MediaModel::as_select())
        .first::<MediaModel>(conn)
        .optional()?
        .map(MediaFile::from))
}

fn insert(conn: &mut SqliteConnection, media: &MediaFile) -> StoreResult<i32> {
    let row = MediaRow::from(media);
    diesel::insert_into(media_files::table)
        .values(&row)
        .execute(conn)?;
    let rowid = diesel::select(sql::<BigInt>("last_insert_rowid()")).get_result::<i64>(conn)?;
    Ok(rowid as i32)
}

pub(crate) fn save(conn: &mut SqliteConnection, media: &MediaFile) -> StoreResult<MediaFile> {
    conn.transaction(|conn| {
        let id = match media.id {
            Some(id) => {
                let row = MediaRow::from(media);
                let updated = diesel::update(media_files::table.find(id))
                    .set(&row)
                    .execute(conn)?;
                if updated == 0 {
                    return Err(DomainError::ValidationError(format!(
                        "media {id} does not exist"
                    ))
                    .into());
                }
                id
            }
            None => insert(conn, media)?,
        };
        find(conn, id)?.ok_or_else(|| {
            DomainError::ValidationError(format!("media {id} vanished after save")).into()
        })
    })
}

pub(crate) fn bulk_create(conn: &mut SqliteConnection, medias: &[MediaFile]) -> StoreResult<Vec<MediaFile>> {
    conn.transaction(|conn| {
        let mut created = Vec::with_capacity(medias.len());
        for media in medias {
            let id = insert(conn, media)?;
            created.push(MediaFile {
                id: Some(id),
                ..media.clone()
            });
        }
        Ok(created)
    })
}

pub(crate) fn load(conn: &mut SqliteConnection, filter: &Filter, log: bool) -> StoreResult<Vec<MediaFile>> {
    let query = media_files::table
        .filter(build::<media_files::table>(filter)?)
        .order(media_files::id.asc())
        .select(MediaModel::as_select());
    if log {
        debug!(query = %diesel::debug_query::<Sqlite, _>(&query), "catalog query");
    }
    Ok(query
        .load::<MediaModel>(conn)?
        .into_iter()
        .map(MediaFile::from)
        .collect())
}

pub(crate) fn count_for(conn: &mut SqliteConnection, torrent_id: i32) -> StoreResult<i64> {
    Ok(media_files::table
        .filter(media_files::torrent_id.eq(torrent_id))
        .count()
        .get_result::<i64>(conn)?)
}

fn matching_ids(conn: &mut SqliteConnection, filter: &Filter) -> StoreResult<Vec<i32>> {
    Ok(media_files::table
        .filter(build::<media_files::table>(filter)?)
        .select(media_files::id)
        .load::<i32>(conn)?)
}

pub(crate) fn update_where(
    conn: &mut SqliteConnection,
    values: &ValueMap,
    filter: &Filter,
) -> StoreResult<usize> {
    use media_files::dsl;

    conn.transaction(|conn| {
        let ids = matching_ids(conn, filter)?;
        if ids.is_empty() || values.is_empty() {
            return Ok(0);
        }

        macro_rules! assign {
            ($assignment:expr) => {
                diesel::update(media_files::table.filter(dsl::id.eq_any(ids.clone())))
                    .set($assignment)
                    .execute(conn)?
            };
        }

        for (column, value) in values {
            match column.as_str() {
                "torrent_id" => assign!(dsl::torrent_id.eq(as_i32(value)?)),
                "filename" => assign!(dsl::filename.eq(as_text(value)?)),
                "file_ext" => assign!(dsl::file_ext.eq(as_text(value)?)),
                "file_path" => assign!(dsl::file_path.eq(as_optional(value, as_text)?)),
                "size" => assign!(dsl::size.eq(as_i64(value)?)),
                "compressed" => assign!(dsl::compressed.eq(as_bool(value)?)),
                "synced" => assign!(dsl::synced.eq(as_bool(value)?)),
                "missing" => assign!(dsl::missing.eq(as_bool(value)?)),
                "skipped" => assign!(dsl::skipped.eq(as_bool(value)?)),
                "error_msg" => assign!(dsl::error_msg.eq(as_optional(value, as_text)?)),
                "total_time" => assign!(dsl::total_time.eq(as_optional(value, as_f64)?)),
                other => {
                    return Err(DomainError::UnknownColumn {
                        entity: "media_files",
                        column: other.to_string(),
                    }
                    .into())
                }
            };
        }
        Ok(ids.len())
    })
}

pub(crate) fn delete(conn: &mut SqliteConnection, id: i32) -> StoreResult<()> {
    diesel::delete(media_files::table.find(id)).execute(conn)?;
    Ok(())
}

pub(crate) fn delete_where(conn: &mut SqliteConnection, filter: &Filter) -> StoreResult<usize> {
    Ok(diesel::delete(media_files::table)
        .filter(build::<media_files::table>(filter)?)
        .execute(conn)?)
}
