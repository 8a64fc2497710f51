use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::entities::{AppValue, LAST_PURGE_DATE};
use crate::errors::DomainError;
use crate::repositories::{Catalog, EntityKind, Filter, Value, ValueMap};

pub const PURGE_INTERVAL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanUpOutcome {
    /// First run: the purge clock was started.
    Initialized,
    /// The last purge is less than a week old.
    NotDue,
    /// Purge was due but no torrent qualified.
    NothingToPurge,
    Purged { purged: usize, removed: usize },
}

/// Weekly purge of finished torrents.
pub struct Maintenance {
    catalog: Arc<dyn Catalog>,
    torrent_path: PathBuf,
}

impl Maintenance {
    pub fn new(catalog: Arc<dyn Catalog>, torrent_path: PathBuf) -> Self {
        Self {
            catalog,
            torrent_path,
        }
    }

    pub async fn clean_up(&self) -> Result<CleanUpOutcome, DomainError> {
        self.clean_up_at(Utc::now()).await
    }

    pub async fn clean_up_at(&self, now: DateTime<Utc>) -> Result<CleanUpOutcome, DomainError> {
        let last_purge = self
            .catalog
            .get_app_state(LAST_PURGE_DATE)
            .await?
            .and_then(|value| value.as_datetime());

        let Some(last_purge) = last_purge else {
            self.stamp(now).await?;
            return Ok(CleanUpOutcome::Initialized);
        };

        if now - last_purge < Duration::days(PURGE_INTERVAL_DAYS) {
            debug!(%last_purge, "purge not due");
            return Ok(CleanUpOutcome::NotDue);
        }

        let purgeable = self.catalog.get_torrents_eligible_for_purging().await?;
        if purgeable.is_empty() {
            return Ok(CleanUpOutcome::NothingToPurge);
        }

        self.catalog.backup().await?;

        let ids: Vec<i32> = purgeable.iter().filter_map(|torrent| torrent.id).collect();
        let deleted = self
            .catalog
            .delete_by(EntityKind::MediaFile, &Filter::is_in("torrent_id", ids.clone()))
            .await?;
        let mut values = ValueMap::new();
        values.insert("purged".to_string(), Value::Bool(true));
        let purged = self
            .catalog
            .bulk_update(&values, EntityKind::Torrent, &Filter::is_in("id", ids))
            .await?;
        info!(torrents = purged, medias = deleted, "purged finished torrents");

        let mut removed = 0;
        for torrent in self.catalog.get_torrents_eligible_for_removal().await? {
            if self.torrent_path.join(&torrent.name).exists() {
                continue;
            }
            if let Some(id) = torrent.id {
                self.catalog.delete_torrent(id).await?;
                removed += 1;
                info!(torrent = %torrent.name, "removed torrent no longer on disk");
            }
        }

        self.stamp(now).await?;
        Ok(CleanUpOutcome::Purged { purged, removed })
    }

    async fn stamp(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.catalog
            .set_app_state(LAST_PURGE_DATE, AppValue::DateTime(now))
            .await
    }
}
