use domain::{MediaFile, Phase, Task, TaskDefinition, TaskError};
use std::path::PathBuf;
use tracing::info;

use super::media_accessors;

/// Removes a shipped file from the staging directory.
pub struct DeleteFile {
    staging: PathBuf,
}

impl DeleteFile {
    pub fn new(staging: PathBuf) -> Self {
        Self { staging }
    }
}

impl TaskDefinition for DeleteFile {
    fn name(&self) -> &str {
        "DeleteFile"
    }

    fn phase(&self) -> Phase {
        Phase::Complete
    }

    fn is_actionable(&self, media: &MediaFile) -> bool {
        media.synced
            && media.is_located_in(&self.staging)
            && media.full_path().map_or(false, |path| path.exists())
    }

    fn create(&self, media: MediaFile) -> Box<dyn Task> {
        Box::new(DeleteFileTask { media })
    }
}

struct DeleteFileTask {
    media: MediaFile,
}

impl Task for DeleteFileTask {
    media_accessors!("DeleteFile");

    /// A failed removal leaves `synced` set; the error is recorded.
    fn execute(&mut self) -> Result<Vec<MediaFile>, TaskError> {
        let path = self
            .media
            .full_path()
            .ok_or_else(|| TaskError::Failed(format!("{} has no location", self.media.filename)))?;
        std::fs::remove_file(&path).map_err(|e| TaskError::io(&path, e))?;
        info!(media = %self.media.filename, "removed from staging");
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::run_task;
    use tempfile::TempDir;

    fn staged(staging: &TempDir, name: &str) -> MediaFile {
        let mut media = MediaFile::new(1, name, 4);
        media.file_path = Some(staging.path().display().to_string());
        media.synced = true;
        media
    }

    #[test]
    fn deletes_synced_staged_file() {
        let staging = TempDir::new().unwrap();
        std::fs::write(staging.path().join("a.mp4"), b"data").unwrap();
        let delete = DeleteFile::new(staging.path().to_path_buf());

        let media = staged(&staging, "a.mp4");
        assert!(delete.is_actionable(&media));
        let mut unsynced = media.clone();
        unsynced.synced = false;
        assert!(!delete.is_actionable(&unsynced));

        let results = run_task(delete.create(media));
        assert!(!results[0].has_error());
        assert!(results[0].synced);
        assert!(!staging.path().join("a.mp4").exists());
        assert!(!delete.is_actionable(&results[0]));
    }

    #[test]
    fn failure_keeps_synced() {
        let staging = TempDir::new().unwrap();
        let delete = DeleteFile::new(staging.path().to_path_buf());

        let results = run_task(delete.create(staged(&staging, "already-gone.mp4")));
        assert!(results[0].has_error());
        assert!(results[0].synced);
    }
}
