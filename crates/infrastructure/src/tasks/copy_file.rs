use domain::{add_gen_files, MediaFile, Phase, Task, TaskDefinition, TaskError};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;

use super::media_accessors;

/// Copies an uncompressed video into the staging directory. The source is
/// marked `synced` once its copy is recorded, so a rerun of the phase does
/// not stage it twice.
pub struct CopyFile {
    staging: PathBuf,
    video_filetypes: HashSet<String>,
}

impl CopyFile {
    pub fn new(staging: PathBuf, video_filetypes: HashSet<String>) -> Self {
        Self {
            staging,
            video_filetypes,
        }
    }
}

impl TaskDefinition for CopyFile {
    fn name(&self) -> &str {
        "CopyFile"
    }

    fn phase(&self) -> Phase {
        Phase::Prepare
    }

    fn is_actionable(&self, media: &MediaFile) -> bool {
        !media.compressed
            && !media.synced
            && self.video_filetypes.contains(&media.file_ext)
            && media.file_path.is_some()
            && !media.is_located_in(&self.staging)
    }

    fn create(&self, media: MediaFile) -> Box<dyn Task> {
        Box::new(CopyFileTask {
            media,
            staging: self.staging.clone(),
        })
    }
}

struct CopyFileTask {
    media: MediaFile,
    staging: PathBuf,
}

impl Task for CopyFileTask {
    media_accessors!("CopyFile");

    fn execute(&mut self) -> Result<Vec<MediaFile>, TaskError> {
        let source = self
            .media
            .full_path()
            .ok_or_else(|| TaskError::Failed(format!("{} has no location", self.media.filename)))?;
        let name = self.media.basename().to_string();
        let target = self.staging.join(&name);

        std::fs::create_dir_all(&self.staging).map_err(|e| TaskError::io(&self.staging, e))?;
        let copied =
            std::fs::copy(&source, &target).map_err(|e| TaskError::copy(&source, &target, e))?;
        info!(media = %self.media.filename, target = %target.display(), bytes = copied, "copied");

        let generated = add_gen_files(&self.media, &self.staging, &[name])?;
        self.media.synced = true;
        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::run_task;
    use tempfile::TempDir;

    fn definition(staging: &TempDir) -> CopyFile {
        CopyFile::new(
            staging.path().to_path_buf(),
            [".mkv".to_string(), ".mp4".to_string()].into(),
        )
    }

    #[test]
    fn only_unstaged_videos_are_actionable() {
        let staging = TempDir::new().unwrap();
        let copy = definition(&staging);

        let mut video = MediaFile::new(1, "Show/ep1.mkv", 10);
        video.file_path = Some("/complete".into());
        assert!(copy.is_actionable(&video));

        let mut staged = video.clone();
        staged.file_path = Some(staging.path().display().to_string());
        assert!(!copy.is_actionable(&staged));

        let mut already_copied = video.clone();
        already_copied.synced = true;
        assert!(!copy.is_actionable(&already_copied));

        let mut archive = video.clone();
        archive.compressed = true;
        assert!(!copy.is_actionable(&archive));

        let mut nfo = MediaFile::new(1, "Show/info.nfo", 10);
        nfo.file_path = Some("/complete".into());
        assert!(!copy.is_actionable(&nfo));
    }

    #[test]
    fn copies_into_staging_and_records_the_copy() {
        let complete = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        std::fs::create_dir(complete.path().join("Show")).unwrap();
        std::fs::write(complete.path().join("Show/ep1.mkv"), b"0123456789").unwrap();

        let mut media = MediaFile::new(7, "Show/ep1.mkv", 10);
        media.id = Some(3);
        media.file_path = Some(complete.path().display().to_string());

        let results = run_task(definition(&staging).create(media));
        assert_eq!(results.len(), 2);
        assert!(results[0].error_msg.is_none());
        assert!(results[0].total_time.is_some());
        assert!(results[0].synced);

        let copy = &results[1];
        assert_eq!(copy.id, None);
        assert_eq!(copy.torrent_id, 7);
        assert_eq!(copy.filename, "ep1.mkv");
        assert_eq!(copy.size, 10);
        assert!(copy.is_located_in(staging.path()));
        assert!(staging.path().join("ep1.mkv").exists());
    }

    #[test]
    fn missing_source_is_recorded_on_the_media() {
        let staging = TempDir::new().unwrap();
        let mut media = MediaFile::new(7, "gone.mkv", 10);
        media.file_path = Some("/nonexistent-seedmgr".into());

        let results = run_task(definition(&staging).create(media));
        assert_eq!(results.len(), 1);
        assert!(results[0].has_error());
        assert!(!results[0].synced);
    }

    #[test]
    fn failed_write_names_the_target() {
        let complete = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        std::fs::write(complete.path().join("ep2.mkv"), b"0123456789").unwrap();
        std::fs::create_dir(staging.path().join("ep2.mkv")).unwrap();

        let mut media = MediaFile::new(7, "ep2.mkv", 10);
        media.file_path = Some(complete.path().display().to_string());

        let results = run_task(definition(&staging).create(media));
        assert_eq!(results.len(), 1);
        assert!(!results[0].synced);
        let error = results[0].error_msg.as_deref().unwrap();
        let target = staging.path().join("ep2.mkv").display().to_string();
        assert!(error.contains(&target), "{error}");
    }
}
