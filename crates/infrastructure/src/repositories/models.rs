use chrono::{NaiveDateTime, TimeZone, Utc};
use diesel::prelude::*;
use domain::{AppValue, AppValueKind, DomainError, MediaFile, Torrent};

use crate::database::{app_state, media_files, torrents};

// Database models - separate from domain entities

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = torrents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct TorrentModel {
    pub id: i32,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub state: String,
    pub retry_count: i32,
    pub failed: bool,
    pub error_msg: Option<String>,
    pub invalid: bool,
    pub purged: bool,
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = torrents)]
#[diesel(treat_none_as_null = true)]
pub(crate) struct TorrentRow {
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub state: String,
    pub retry_count: i32,
    pub failed: bool,
    pub error_msg: Option<String>,
    pub invalid: bool,
    pub purged: bool,
}

impl TryFrom<TorrentModel> for Torrent {
    type Error = DomainError;

    fn try_from(model: TorrentModel) -> Result<Self, Self::Error> {
        Ok(Torrent {
            id: Some(model.id),
            name: model.name,
            created_at: Utc.from_utc_datetime(&model.created_at),
            updated_at: Utc.from_utc_datetime(&model.updated_at),
            state: model.state.parse()?,
            retry_count: model.retry_count,
            failed: model.failed,
            error_msg: model.error_msg,
            invalid: model.invalid,
            purged: model.purged,
        })
    }
}

impl From<&Torrent> for TorrentRow {
    fn from(torrent: &Torrent) -> Self {
        TorrentRow {
            name: torrent.name.clone(),
            created_at: torrent.created_at.naive_utc(),
            updated_at: Utc::now().naive_utc(),
            state: torrent.state.as_str().to_string(),
            retry_count: torrent.retry_count,
            failed: torrent.failed,
            error_msg: torrent.error_msg.clone(),
            invalid: torrent.invalid,
            purged: torrent.purged,
        }
    }
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = media_files)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct MediaModel {
    pub id: i32,
    pub torrent_id: i32,
    pub filename: String,
    pub file_ext: String,
    pub file_path: Option<String>,
    pub size: i64,
    pub compressed: bool,
    pub synced: bool,
    pub missing: bool,
    pub skipped: bool,
    pub error_msg: Option<String>,
    pub total_time: Option<f64>,
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = media_files)]
#[diesel(treat_none_as_null = true)]
pub(crate) struct MediaRow {
    pub torrent_id: i32,
    pub filename: String,
    pub file_ext: String,
    pub file_path: Option<String>,
    pub size: i64,
    pub compressed: bool,
    pub synced: bool,
    pub missing: bool,
    pub skipped: bool,
    pub error_msg: Option<String>,
    pub total_time: Option<f64>,
}

impl From<MediaModel> for MediaFile {
    fn from(model: MediaModel) -> Self {
        MediaFile {
            id: Some(model.id),
            torrent_id: model.torrent_id,
            filename: model.filename,
            file_ext: model.file_ext,
            file_path: model.file_path,
            size: model.size,
            compressed: model.compressed,
            synced: model.synced,
            missing: model.missing,
            skipped: model.skipped,
            error_msg: model.error_msg,
            total_time: model.total_time,
        }
    }
}

impl From<&MediaFile> for MediaRow {
    fn from(media: &MediaFile) -> Self {
        MediaRow {
            torrent_id: media.torrent_id,
            filename: media.filename.clone(),
            file_ext: media.file_ext.clone(),
            file_path: media.file_path.clone(),
            size: media.size,
            compressed: media.compressed,
            synced: media.synced,
            missing: media.missing,
            skipped: media.skipped,
            error_msg: media.error_msg.clone(),
            total_time: media.total_time,
        }
    }
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = app_state)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct AppStateModel {
    pub id: i32,
    pub name: String,
    pub value_type: String,
    pub int_value: Option<i64>,
    pub bool_value: Option<bool>,
    pub datetime_value: Option<NaiveDateTime>,
    pub text_value: Option<String>,
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = app_state)]
#[diesel(treat_none_as_null = true)]
pub(crate) struct AppStateRow {
    pub name: String,
    pub value_type: String,
    pub int_value: Option<i64>,
    pub bool_value: Option<bool>,
    pub datetime_value: Option<NaiveDateTime>,
    pub text_value: Option<String>,
}

impl AppStateRow {
    pub fn new(name: &str, value: &AppValue) -> Self {
        let mut row = AppStateRow {
            name: name.to_string(),
            value_type: value.kind().as_str().to_string(),
            int_value: None,
            bool_value: None,
            datetime_value: None,
            text_value: None,
        };
        match value {
            AppValue::Int(v) => row.int_value = Some(*v),
            AppValue::Bool(v) => row.bool_value = Some(*v),
            AppValue::DateTime(v) => row.datetime_value = Some(v.naive_utc()),
            AppValue::Text(v) => row.text_value = Some(v.clone()),
            AppValue::None => {}
        }
        row
    }
}

impl TryFrom<AppStateModel> for AppValue {
    type Error = DomainError;

    fn try_from(model: AppStateModel) -> Result<Self, Self::Error> {
        let kind = AppValueKind::parse(&model.value_type).ok_or_else(|| {
            DomainError::ValidationError(format!(
                "app state {} has unknown type {}",
                model.name, model.value_type
            ))
        })?;
        Ok(match kind {
            AppValueKind::Int => model.int_value.map(AppValue::Int),
            AppValueKind::Bool => model.bool_value.map(AppValue::Bool),
            AppValueKind::DateTime => model
                .datetime_value
                .map(|v| AppValue::DateTime(Utc.from_utc_datetime(&v))),
            AppValueKind::Text => model.text_value.map(AppValue::Text),
            AppValueKind::None => None,
        }
        .unwrap_or(AppValue::None))
    }
}
