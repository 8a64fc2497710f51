use std::path::Path;

use crate::errors::DomainError;

/// A file listed inside a `.torrent`, relative to the torrent's root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    pub path: String,
    pub size: u64,
}

/// Reads the file listing out of a `.torrent` file.
pub trait TorrentParser: Send + Sync {
    /// Fails with [`DomainError::InvalidTorrent`] when the file is malformed.
    fn list_files(&self, torrent_path: &Path) -> Result<Vec<ListedFile>, DomainError>;
}
