use bip_metainfo::Metainfo;
use domain::{DomainError, ListedFile, TorrentParser};
use std::path::Path;

/// Reads the file list out of a bencoded `.torrent` file.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetainfoParser;

impl MetainfoParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_bytes(&self, data: &[u8]) -> Result<Vec<ListedFile>, DomainError> {
        let metainfo = Metainfo::from_bytes(data)
            .map_err(|e| DomainError::InvalidTorrent(e.to_string()))?;
        let info = metainfo.info();

        let files = info
            .files()
            .map(|file| {
                let relative = match info.directory() {
                    Some(directory) => directory.join(file.path()),
                    None => file.path().to_path_buf(),
                };
                ListedFile {
                    path: relative.to_string_lossy().into_owned(),
                    size: file.length(),
                }
            })
            .collect::<Vec<_>>();

        if files.is_empty() {
            return Err(DomainError::InvalidTorrent("torrent lists no files".to_string()));
        }
        Ok(files)
    }
}

impl TorrentParser for MetainfoParser {
    fn list_files(&self, path: &Path) -> Result<Vec<ListedFile>, DomainError> {
        let data = std::fs::read(path)?;
        self.parse_bytes(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_an_invalid_torrent() {
        let err = MetainfoParser::new().parse_bytes(b"not bencode").unwrap_err();
        assert!(matches!(err, DomainError::InvalidTorrent(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = MetainfoParser::new()
            .list_files(&dir.path().join("absent.torrent"))
            .unwrap_err();
        assert!(matches!(err, DomainError::IoError(_)));
    }
}
