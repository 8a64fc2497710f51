use async_trait::async_trait;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel_migrations::MigrationHarness;
use domain::{
    AppValue, Catalog, CatalogError, DomainError, EntityKind, Filter, MediaFile, Torrent, ValueMap,
};
use std::path::PathBuf;
use tracing::info;

use super::store_error::StoreResult;
use super::{app_state_store, media_store, torrent_store};
use crate::database::backup::{rotate_backups, BACKUP_COUNT};
use crate::database::{Database, DatabaseOptions, SqlitePool, MIGRATIONS};

pub struct SqliteCatalog {
    pool: SqlitePool,
    path: PathBuf,
    log_queries: bool,
}

impl SqliteCatalog {
    pub fn new(database: &Database, log_queries: bool) -> Self {
        Self {
            pool: database.get_pool().clone(),
            path: database.path().to_path_buf(),
            log_queries,
        }
    }

    /// Opens the database at `options.path`, running pending migrations.
    pub fn open(options: &DatabaseOptions) -> Result<Self, DomainError> {
        let database = Database::open(options)?;
        Ok(Self::new(&database, options.debug))
    }

    /// Runs `operation` on a pooled connection off the async runtime.
    async fn blocking<T, F>(&self, context: &'static str, operation: F) -> Result<T, DomainError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> StoreResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| CatalogError::new(context, e))?;
            operation(&mut conn).map_err(|e| e.into_domain(context))
        })
        .await
        .map_err(|e| CatalogError::new(context, e))?
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn save_torrent(&self, torrent: &Torrent) -> Result<Torrent, DomainError> {
        let torrent = torrent.clone();
        self.blocking("saving a torrent", move |conn| {
            torrent_store::save(conn, &torrent)
        })
        .await
    }

    async fn save_media(&self, media: &MediaFile) -> Result<MediaFile, DomainError> {
        let media = media.clone();
        self.blocking("saving a media file", move |conn| {
            media_store::save(conn, &media)
        })
        .await
    }

    async fn bulk_create_medias(&self, medias: &[MediaFile]) -> Result<Vec<MediaFile>, DomainError> {
        let medias = medias.to_vec();
        self.blocking("creating media files", move |conn| {
            media_store::bulk_create(conn, &medias)
        })
        .await
    }

    async fn bulk_update(
        &self,
        values: &ValueMap,
        kind: EntityKind,
        filter: &Filter,
    ) -> Result<usize, DomainError> {
        let values = values.clone();
        let filter = filter.clone();
        self.blocking("bulk updating", move |conn| match kind {
            EntityKind::Torrent => torrent_store::update_where(conn, &values, &filter),
            EntityKind::MediaFile => media_store::update_where(conn, &values, &filter),
            EntityKind::AppState => Err(DomainError::ValidationError(
                "app state is updated through set_app_state".to_string(),
            )
            .into()),
        })
        .await
    }

    async fn delete_torrent(&self, id: i32) -> Result<(), DomainError> {
        self.blocking("deleting a torrent", move |conn| {
            torrent_store::delete(conn, id)
        })
        .await
    }

    async fn delete_media(&self, id: i32) -> Result<(), DomainError> {
        self.blocking("deleting a media file", move |conn| {
            media_store::delete(conn, id)
        })
        .await
    }

    async fn delete_by(&self, kind: EntityKind, filter: &Filter) -> Result<usize, DomainError> {
        let filter = filter.clone();
        self.blocking("deleting rows", move |conn| match kind {
            EntityKind::Torrent => torrent_store::delete_where(conn, &filter),
            EntityKind::MediaFile => media_store::delete_where(conn, &filter),
            EntityKind::AppState => app_state_store::delete_where(conn, &filter),
        })
        .await
    }

    async fn fetch_torrent(&self, id: i32) -> Result<Option<Torrent>, DomainError> {
        self.blocking("fetching a torrent", move |conn| {
            torrent_store::find(conn, id)
        })
        .await
    }

    async fn fetch_media(&self, id: i32) -> Result<Option<MediaFile>, DomainError> {
        self.blocking("fetching a media file", move |conn| {
            media_store::find(conn, id)
        })
        .await
    }

    async fn fetch_torrents_by(&self, filter: &Filter) -> Result<Vec<Torrent>, DomainError> {
        let filter = filter.clone();
        let log = self.log_queries;
        self.blocking("querying torrents", move |conn| {
            torrent_store::load(conn, &filter, log)
        })
        .await
    }

    async fn fetch_medias_by(&self, filter: &Filter) -> Result<Vec<MediaFile>, DomainError> {
        let filter = filter.clone();
        let log = self.log_queries;
        self.blocking("querying media files", move |conn| {
            media_store::load(conn, &filter, log)
        })
        .await
    }

    async fn fetch_torrent_by_name(&self, name: &str) -> Result<Option<Torrent>, DomainError> {
        let name = name.to_string();
        self.blocking("fetching a torrent by name", move |conn| {
            torrent_store::find_by_name(conn, &name)
        })
        .await
    }

    async fn count_medias(&self, torrent_id: i32) -> Result<i64, DomainError> {
        self.blocking("counting media files", move |conn| {
            media_store::count_for(conn, torrent_id)
        })
        .await
    }

    async fn fetch_or_create_torrent(&self, name: &str) -> Result<Torrent, DomainError> {
        let name = name.to_string();
        self.blocking("fetching or creating a torrent", move |conn| {
            torrent_store::fetch_or_create(conn, &name)
        })
        .await
    }

    async fn get_app_state(&self, name: &str) -> Result<Option<AppValue>, DomainError> {
        let name = name.to_string();
        self.blocking("reading app state", move |conn| {
            app_state_store::get(conn, &name)
        })
        .await
    }

    async fn set_app_state(&self, name: &str, value: AppValue) -> Result<(), DomainError> {
        let name = name.to_string();
        self.blocking("writing app state", move |conn| {
            app_state_store::set(conn, &name, &value)
        })
        .await
    }

    async fn reset_app_state(&self, name: &str) -> Result<(), DomainError> {
        let name = name.to_string();
        self.blocking("resetting app state", move |conn| {
            app_state_store::reset(conn, &name)
        })
        .await
    }

    async fn clear(&self) -> Result<(), DomainError> {
        self.blocking("clearing the catalog", |conn| {
            conn.batch_execute(
                "DROP TABLE IF EXISTS media_files;
                 DROP TABLE IF EXISTS torrents;
                 DROP TABLE IF EXISTS app_state;
                 DROP TABLE IF EXISTS __diesel_schema_migrations;",
            )?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| DomainError::from(CatalogError::new("recreating the catalog", e)))?;
            Ok(())
        })
        .await?;
        info!("catalog cleared");
        Ok(())
    }

    async fn backup(&self) -> Result<(), DomainError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || rotate_backups(&path, BACKUP_COUNT))
            .await
            .map_err(|e| CatalogError::new("backing up the database", e))?
            .map_err(|e| CatalogError::new("backing up the database", e))?;
        Ok(())
    }

    async fn shrink_db(&self) -> Result<(), DomainError> {
        self.blocking("compacting the database", |conn| {
            conn.batch_execute("VACUUM")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{selectors, TorrentState, Value};
    use serde_json::json;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> SqliteCatalog {
        SqliteCatalog::open(&DatabaseOptions::new(dir.path().join("catalog.db"))).unwrap()
    }

    async fn torrent_in(catalog: &SqliteCatalog, name: &str, state: TorrentState) -> Torrent {
        let mut torrent = Torrent::new(name);
        torrent.state = state;
        catalog.save_torrent(&torrent).await.unwrap()
    }

    fn media(torrent_id: i32, filename: &str) -> MediaFile {
        MediaFile::new(torrent_id, filename, 1024)
    }

    fn names(torrents: &[Torrent]) -> Vec<&str> {
        torrents.iter().map(|t| t.name.as_str()).collect()
    }

    #[tokio::test]
    async fn save_inserts_then_updates() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir);

        let mut torrent = catalog.save_torrent(&Torrent::new("a.torrent")).await.unwrap();
        let id = torrent.id.unwrap();
        assert_eq!(torrent.state, TorrentState::Init);

        torrent.state = TorrentState::Ready;
        torrent.mark_failed("boom");
        let saved = catalog.save_torrent(&torrent).await.unwrap();
        let again = catalog.save_torrent(&saved).await.unwrap();
        assert_eq!(saved.id, Some(id));
        assert_eq!(again.state, TorrentState::Ready);
        assert_eq!(again.error_msg.as_deref(), Some("boom"));
        assert_eq!(again.created_at.timestamp(), saved.created_at.timestamp());

        let fetched = catalog.fetch_torrent(id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "a.torrent");
        assert!(catalog.fetch_torrent(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn names_are_unique() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir);

        catalog.save_torrent(&Torrent::new("dup.torrent")).await.unwrap();
        let err = catalog
            .save_torrent(&Torrent::new("dup.torrent"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Catalog(_)));

        let first = catalog.fetch_or_create_torrent("dup.torrent").await.unwrap();
        let second = catalog.fetch_or_create_torrent("dup.torrent").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn bulk_created_media_round_trip() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir);
        let torrent = torrent_in(&catalog, "multi.torrent", TorrentState::Init).await;
        let id = torrent.id.unwrap();

        let mut archive = media(id, "pack/movie.rar");
        archive.compressed = true;
        let created = catalog
            .bulk_create_medias(&[archive, media(id, "pack/movie.nfo")])
            .await
            .unwrap();
        assert!(created.iter().all(|m| m.id.is_some()));

        let fetched = catalog.get_medias_by(id, None).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(catalog.count_medias(id).await.unwrap(), 2);

        let compressed = catalog
            .get_medias_by(id, Some(Filter::eq("compressed", true)))
            .await
            .unwrap();
        assert_eq!(compressed.len(), 1);
        assert_eq!(compressed[0].file_ext, ".rar");
    }

    #[tokio::test]
    async fn eligibility_selectors() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir);

        torrent_in(&catalog, "init.torrent", TorrentState::Init).await;
        torrent_in(&catalog, "active.torrent", TorrentState::Active).await;
        torrent_in(&catalog, "done.torrent", TorrentState::Done).await;

        let mut failed = torrent_in(&catalog, "failed.torrent", TorrentState::Ready).await;
        failed.mark_failed("rsync exploded");
        catalog.save_torrent(&failed).await.unwrap();

        let mut invalid = Torrent::new("invalid.torrent");
        invalid.mark_invalid();
        catalog.save_torrent(&invalid).await.unwrap();

        let mut purged = torrent_in(&catalog, "purged.torrent", TorrentState::Cancelled).await;
        purged.purged = true;
        catalog.save_torrent(&purged).await.unwrap();

        let active = catalog.get_torrents_active().await.unwrap();
        assert_eq!(names(&active), ["init.torrent", "active.torrent"]);

        let purgeable = catalog.get_torrents_eligible_for_purging().await.unwrap();
        assert_eq!(names(&purgeable), ["done.torrent"]);

        let removable = catalog.get_torrents_eligible_for_removal().await.unwrap();
        assert_eq!(names(&removable), ["purged.torrent"]);

        let failed = catalog
            .get_torrents_by_state(TorrentState::Ready, true)
            .await
            .unwrap();
        assert_eq!(names(&failed), ["failed.torrent"]);
        assert_eq!(names(&catalog.get_torrents_failed().await.unwrap()), ["failed.torrent"]);
    }

    #[tokio::test]
    async fn filter_tree_is_interpreted_and_repeatable() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir);
        for (name, retries) in [("a", 0), ("b", 2), ("c", 5)] {
            let mut torrent = Torrent::new(format!("{name}.torrent"));
            torrent.retry_count = retries;
            catalog.save_torrent(&torrent).await.unwrap();
        }

        let filter = Filter::from_json(&json!({
            "or": [
                { ">=": { "retry_count": 5 } },
                { "and": [
                    { "not": { "=": { "name": "a.torrent" } } },
                    { "<": { "retry_count": 3 } }
                ] }
            ]
        }))
        .unwrap();

        let first = catalog.fetch_torrents_by(&filter).await.unwrap();
        let second = catalog.fetch_torrents_by(&filter).await.unwrap();
        assert_eq!(names(&first), ["b.torrent", "c.torrent"]);
        assert_eq!(first, second);

        let nulls = catalog
            .fetch_torrents_by(&Filter::eq("error_msg", Value::Null))
            .await
            .unwrap();
        assert_eq!(nulls.len(), 3);
        assert!(catalog
            .fetch_torrents_by(&Filter::and([]))
            .await
            .unwrap()
            .len()
            == 3);
        assert!(catalog.fetch_torrents_by(&Filter::or([])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_filters_fail_loudly() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir);

        let err = catalog
            .fetch_torrents_by(&Filter::eq("colour", "red"))
            .await
            .unwrap_err();
        assert!(err.is_programming_error());

        let err = catalog
            .fetch_torrents_by(&Filter::eq("state", "paused"))
            .await
            .unwrap_err();
        assert!(err.is_programming_error());
    }

    #[tokio::test]
    async fn bulk_update_resolves_rows_before_changing_them() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir);
        for name in ["x.torrent", "y.torrent"] {
            let mut torrent = Torrent::new(name);
            torrent.mark_failed("flaky");
            catalog.save_torrent(&torrent).await.unwrap();
        }

        let mut values = ValueMap::new();
        values.insert("failed".into(), Value::Bool(false));
        values.insert("error_msg".into(), Value::Null);
        values.insert("retry_count".into(), Value::Int(1));
        let touched = catalog
            .bulk_update(&values, EntityKind::Torrent, &Filter::eq("failed", true))
            .await
            .unwrap();
        assert_eq!(touched, 2);

        let all = catalog.fetch_torrents_by(&Filter::and([])).await.unwrap();
        assert!(all
            .iter()
            .all(|t| !t.failed && t.error_msg.is_none() && t.retry_count == 1));
    }

    #[tokio::test]
    async fn deleting_a_torrent_cascades_to_media() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir);
        let torrent = torrent_in(&catalog, "gone.torrent", TorrentState::Done).await;
        let id = torrent.id.unwrap();
        catalog
            .bulk_create_medias(&[media(id, "a.mkv"), media(id, "b.mkv")])
            .await
            .unwrap();

        catalog.delete_torrent(id).await.unwrap();
        assert!(catalog.fetch_torrent(id).await.unwrap().is_none());
        assert!(catalog
            .fetch_medias_by(&Filter::and([]))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn delete_by_filter_counts_rows() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir);
        let id = torrent_in(&catalog, "t.torrent", TorrentState::Init)
            .await
            .id
            .unwrap();
        let mut synced = media(id, "a.mkv");
        synced.synced = true;
        catalog
            .bulk_create_medias(&[synced, media(id, "b.mkv")])
            .await
            .unwrap();

        let removed = catalog
            .delete_by(EntityKind::MediaFile, &Filter::eq("synced", true))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(catalog.get_processed_medias(id).await.unwrap().len(), 0);
        assert_eq!(catalog.count_medias(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn app_state_is_strictly_typed() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir);
        let now = Utc::now();

        assert!(catalog.get_app_state("last_purge_date").await.unwrap().is_none());
        catalog
            .set_app_state("last_purge_date", AppValue::DateTime(now))
            .await
            .unwrap();
        let stored = catalog.get_app_state("last_purge_date").await.unwrap().unwrap();
        assert_eq!(
            stored.as_datetime().unwrap().timestamp_millis(),
            now.timestamp_millis()
        );

        let err = catalog
            .set_app_state("last_purge_date", AppValue::Int(4))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::TypeMismatch { .. }));

        catalog.reset_app_state("last_purge_date").await.unwrap();
        catalog
            .set_app_state("last_purge_date", AppValue::Int(4))
            .await
            .unwrap();
        assert_eq!(
            catalog.get_app_state("last_purge_date").await.unwrap(),
            Some(AppValue::Int(4))
        );
    }

    #[tokio::test]
    async fn clear_backup_and_shrink() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir);
        torrent_in(&catalog, "keep.torrent", TorrentState::Init).await;

        catalog.backup().await.unwrap();
        assert!(dir.path().join("catalog.db.1").exists());

        catalog.clear().await.unwrap();
        assert!(catalog
            .fetch_torrents_by(&selectors::active_torrents())
            .await
            .unwrap()
            .is_empty());
        catalog.save_torrent(&Torrent::new("fresh.torrent")).await.unwrap();
        catalog.shrink_db().await.unwrap();
    }
}
