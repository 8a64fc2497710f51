use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A file listed by a torrent, or a file produced from one in the staging
/// directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: Option<i32>,
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

impl MediaFile {
    pub fn new(torrent_id: i32, filename: impl Into<String>, size: i64) -> Self {
        let filename = filename.into();
        Self {
            id: None,
            torrent_id,
            file_ext: extension_of(&filename),
            filename,
            file_path: None,
            size,
            compressed: false,
            synced: false,
            missing: false,
            skipped: false,
            error_msg: None,
            total_time: None,
        }
    }

    /// Absolute path of the file, when its directory is known.
    pub fn full_path(&self) -> Option<PathBuf> {
        self.file_path
            .as_ref()
            .map(|dir| Path::new(dir).join(&self.filename))
    }

    pub fn basename(&self) -> &str {
        Path::new(&self.filename)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.filename)
    }

    pub fn is_located_in(&self, dir: &Path) -> bool {
        self.file_path
            .as_deref()
            .map(|path| Path::new(path) == dir)
            .unwrap_or(false)
    }

    /// Synced, missing and skipped media need no further work.
    pub fn is_processed(&self) -> bool {
        self.synced || self.missing || self.skipped
    }

    pub fn has_error(&self) -> bool {
        self.error_msg.as_deref().map_or(false, |msg| !msg.is_empty())
    }
}

/// Lowercase extension including the leading dot, or an empty string.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercase_with_dot() {
        assert_eq!(extension_of("Show/Episode.MKV"), ".mkv");
        assert_eq!(extension_of("archive.part01.rar"), ".rar");
        assert_eq!(extension_of("README"), "");
    }

    #[test]
    fn staged_location_compares_paths() {
        let mut media = MediaFile::new(1, "Show/ep1.mkv", 10);
        assert!(!media.is_located_in(Path::new("/tmp/sync")));
        media.file_path = Some("/tmp/sync".to_string());
        assert!(media.is_located_in(Path::new("/tmp/sync")));
        assert_eq!(media.full_path(), Some(PathBuf::from("/tmp/sync/Show/ep1.mkv")));
        assert_eq!(media.basename(), "ep1.mkv");
    }

    #[test]
    fn blank_error_is_not_an_error() {
        let mut media = MediaFile::new(1, "a.mp4", 1);
        media.error_msg = Some(String::new());
        assert!(!media.has_error());
        media.error_msg = Some("boom".into());
        assert!(media.has_error());
    }
}
