use async_trait::async_trait;

use crate::entities::{AppValue, MediaFile, Torrent, TorrentState};
use crate::errors::DomainError;
use crate::repositories::filter::{selectors, EntityKind, Filter, ValueMap};

/// Durable store of torrents, media files and application state.
///
/// Every method is transactional and commits before returning. Lookups by
/// key return `Ok(None)` for a missing row.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Inserts when `id` is unset, updates otherwise.
    async fn save_torrent(&self, torrent: &Torrent) -> Result<Torrent, DomainError>;
    async fn save_media(&self, media: &MediaFile) -> Result<MediaFile, DomainError>;
    async fn bulk_create_medias(&self, medias: &[MediaFile]) -> Result<Vec<MediaFile>, DomainError>;

    /// Sets the columns named in `values` on every row matching `filter`.
    async fn bulk_update(
        &self,
        values: &ValueMap,
        kind: EntityKind,
        filter: &Filter,
    ) -> Result<usize, DomainError>;

    async fn delete_torrent(&self, id: i32) -> Result<(), DomainError>;
    async fn delete_media(&self, id: i32) -> Result<(), DomainError>;
    async fn delete_by(&self, kind: EntityKind, filter: &Filter) -> Result<usize, DomainError>;

    async fn fetch_torrent(&self, id: i32) -> Result<Option<Torrent>, DomainError>;
    async fn fetch_media(&self, id: i32) -> Result<Option<MediaFile>, DomainError>;
    async fn fetch_torrents_by(&self, filter: &Filter) -> Result<Vec<Torrent>, DomainError>;
    async fn fetch_medias_by(&self, filter: &Filter) -> Result<Vec<MediaFile>, DomainError>;
    async fn fetch_torrent_by_name(&self, name: &str) -> Result<Option<Torrent>, DomainError>;
    async fn count_medias(&self, torrent_id: i32) -> Result<i64, DomainError>;

    /// Returns the torrent called `name`, inserting a fresh one if needed.
    async fn fetch_or_create_torrent(&self, name: &str) -> Result<Torrent, DomainError>;

    async fn get_app_state(&self, name: &str) -> Result<Option<AppValue>, DomainError>;
    /// Rejects a value whose type differs from the stored one.
    async fn set_app_state(&self, name: &str, value: AppValue) -> Result<(), DomainError>;
    async fn reset_app_state(&self, name: &str) -> Result<(), DomainError>;

    /// Drops and recreates every table.
    async fn clear(&self) -> Result<(), DomainError>;
    /// Rotates on-disk copies of the database file.
    async fn backup(&self) -> Result<(), DomainError>;
    async fn shrink_db(&self) -> Result<(), DomainError>;

    async fn get_torrents_active(&self) -> Result<Vec<Torrent>, DomainError> {
        self.fetch_torrents_by(&selectors::active_torrents()).await
    }

    async fn get_torrents_by_state(
        &self,
        state: TorrentState,
        failed: bool,
    ) -> Result<Vec<Torrent>, DomainError> {
        self.fetch_torrents_by(&selectors::torrents_by_state(state, failed))
            .await
    }

    async fn get_torrents_failed(&self) -> Result<Vec<Torrent>, DomainError> {
        self.fetch_torrents_by(&selectors::failed_torrents()).await
    }

    async fn get_torrents_eligible_for_purging(&self) -> Result<Vec<Torrent>, DomainError> {
        self.fetch_torrents_by(&selectors::torrents_eligible_for_purging())
            .await
    }

    async fn get_torrents_eligible_for_removal(&self) -> Result<Vec<Torrent>, DomainError> {
        self.fetch_torrents_by(&selectors::torrents_eligible_for_removal())
            .await
    }

    /// Media of one torrent, optionally narrowed by `extra`.
    async fn get_medias_by(
        &self,
        torrent_id: i32,
        extra: Option<Filter>,
    ) -> Result<Vec<MediaFile>, DomainError> {
        let filter = match extra {
            Some(extra) => Filter::and([selectors::medias_of(torrent_id), extra]),
            None => selectors::medias_of(torrent_id),
        };
        self.fetch_medias_by(&filter).await
    }

    async fn get_processed_medias(&self, torrent_id: i32) -> Result<Vec<MediaFile>, DomainError> {
        self.fetch_medias_by(&selectors::processed_medias(torrent_id))
            .await
    }
}
