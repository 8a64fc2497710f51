use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::entities::{MediaFile, Torrent};
use crate::errors::DomainError;
use crate::repositories::{Catalog, ListedFile, TorrentParser};

/// Files the torrent client keeps next to its torrents.
const CLIENT_FILES: [&str; 2] = ["torrents.fastresume", "torrents.state"];

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub torrent_path: PathBuf,
    pub incomplete_path: Option<PathBuf>,
    pub media_paths: Vec<PathBuf>,
    pub video_filetypes: HashSet<String>,
    pub compressed_filetypes: HashSet<String>,
    pub minimum_file_size: u64,
}

impl LoaderOptions {
    /// Applies the video / archive / sample rules to one listed file.
    pub fn classify(&self, torrent_id: i32, file: &ListedFile) -> MediaFile {
        let mut media = MediaFile::new(torrent_id, file.path.clone(), file.size as i64);
        let ext = media.file_ext.as_str();

        if self.compressed_filetypes.contains(ext) {
            media.compressed = true;
        } else if self.video_filetypes.contains(ext) {
            media.skipped = file.size < self.minimum_file_size;
        } else {
            media.skipped = true;
        }

        if !media.skipped {
            match self
                .media_paths
                .iter()
                .find(|dir| dir.join(&file.path).exists())
            {
                Some(dir) => media.file_path = Some(dir.display().to_string()),
                None => media.missing = true,
            }
        }
        media
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub scanned: usize,
    pub loaded: usize,
    pub incomplete: usize,
    pub invalid: usize,
}

/// Discovers torrents in the client's directory and records their media.
pub struct Loader {
    catalog: Arc<dyn Catalog>,
    parser: Arc<dyn TorrentParser>,
    options: LoaderOptions,
}

impl Loader {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        parser: Arc<dyn TorrentParser>,
        options: LoaderOptions,
    ) -> Self {
        Self {
            catalog,
            parser,
            options,
        }
    }

    pub async fn load(&self) -> Result<LoadReport, DomainError> {
        let mut report = LoadReport::default();
        for path in self.torrent_files().await? {
            report.scanned += 1;
            self.load_torrent(&path, &mut report).await?;
        }
        info!(
            scanned = report.scanned,
            loaded = report.loaded,
            incomplete = report.incomplete,
            invalid = report.invalid,
            "torrent directory loaded"
        );
        Ok(report)
    }

    async fn torrent_files(&self) -> Result<Vec<PathBuf>, DomainError> {
        let mut entries = tokio::fs::read_dir(&self.options.torrent_path).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if is_torrent_candidate(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn load_torrent(&self, path: &Path, report: &mut LoadReport) -> Result<(), DomainError> {
        let name = file_name(path);
        let mut torrent = self.catalog.fetch_or_create_torrent(&name).await?;
        let torrent_id = torrent.id.ok_or_else(|| {
            DomainError::ValidationError(format!("torrent {name} has no id after save"))
        })?;

        if torrent.invalid || torrent.purged || self.catalog.count_medias(torrent_id).await? > 0 {
            return Ok(());
        }

        let parser = Arc::clone(&self.parser);
        let owned = path.to_path_buf();
        let listing = tokio::task::spawn_blocking(move || parser.list_files(&owned))
            .await
            .map_err(|e| DomainError::ValidationError(format!("parser task failed: {e}")))?;

        let files = match listing {
            Ok(files) => files,
            Err(err @ DomainError::InvalidTorrent(_)) => {
                warn!(torrent = %name, error = %err, "unparseable torrent, cancelling");
                self.invalidate(&mut torrent).await?;
                report.invalid += 1;
                return Ok(());
            }
            // Unreadable is not malformed: leave the torrent for the next tick.
            Err(err) => return Err(err),
        };

        if let Some(in_progress) = self.find_in_progress(&files) {
            debug!(torrent = %name, file = %in_progress.display(), "download still in progress");
            report.incomplete += 1;
            return Ok(());
        }

        let medias: Vec<MediaFile> = files
            .iter()
            .map(|file| self.options.classify(torrent_id, file))
            .collect();
        let created = self.catalog.bulk_create_medias(&medias).await?;
        info!(torrent = %name, media = created.len(), "torrent loaded");
        report.loaded += 1;
        Ok(())
    }

    async fn invalidate(&self, torrent: &mut Torrent) -> Result<(), DomainError> {
        torrent.mark_invalid();
        *torrent = self.catalog.save_torrent(torrent).await?;
        Ok(())
    }

    fn find_in_progress(&self, files: &[ListedFile]) -> Option<PathBuf> {
        let incomplete = self.options.incomplete_path.as_ref()?;
        files
            .iter()
            .map(|file| incomplete.join(&file.path))
            .find(|path| path.exists())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_torrent_candidate(path: &Path) -> bool {
    let name = file_name(path);
    if CLIENT_FILES.contains(&name.as_str()) {
        return false;
    }
    match path.extension() {
        None => true,
        Some(ext) => ext.eq_ignore_ascii_case("torrent"),
    }
}
