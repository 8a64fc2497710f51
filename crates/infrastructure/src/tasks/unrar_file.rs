use domain::{add_gen_files, ExternalCommand, MediaFile, Phase, Task, TaskDefinition, TaskError};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{media_accessors, run_command, UnrarOptions};

/// Extracts a rar archive into the staging directory. Only the head volume
/// is acted on; `unrar` follows the remaining volumes itself.
pub struct UnrarFile {
    staging: PathBuf,
    options: UnrarOptions,
}

impl UnrarFile {
    pub fn new(staging: PathBuf, options: UnrarOptions) -> Self {
        Self { staging, options }
    }
}

impl TaskDefinition for UnrarFile {
    fn name(&self) -> &str {
        "UnrarFile"
    }

    fn phase(&self) -> Phase {
        Phase::Prepare
    }

    fn is_actionable(&self, media: &MediaFile) -> bool {
        media.compressed
            && !media.synced
            && media.file_path.is_some()
            && is_head_volume(&media.filename)
    }

    fn create(&self, media: MediaFile) -> Box<dyn Task> {
        Box::new(UnrarFileTask {
            media,
            staging: self.staging.clone(),
            options: self.options.clone(),
        })
    }
}

/// `x.rar`, `x.part1.rar` and `x.part01.rar` start a set; `x.r00` and
/// `x.part2.rar` continue one.
pub fn is_head_volume(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    let Some(stem) = lower.strip_suffix(".rar") else {
        return false;
    };
    match stem.rsplit_once(".part") {
        Some((_, number)) if !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit()) => {
            number.trim_start_matches('0') == "1"
        }
        _ => true,
    }
}

struct UnrarFileTask {
    media: MediaFile,
    staging: PathBuf,
    options: UnrarOptions,
}

impl UnrarFileTask {
    fn list_command(&self, archive: &Path) -> ExternalCommand {
        ExternalCommand::new(&self.options.unrar_path)
            .arg("lb")
            .arg(archive.display().to_string())
    }

    fn extract_command(&self, archive: &Path) -> ExternalCommand {
        let mode = if self.options.preserve_paths { "x" } else { "e" };
        ExternalCommand::new(&self.options.unrar_path)
            .args([mode, "-o+", "-y"])
            .arg(archive.display().to_string())
            .arg(format!("{}/", self.staging.display()))
    }

    /// Names of the extracted files relative to the staging directory.
    fn extracted_names(&self, listing: &str) -> Vec<String> {
        let mut names: Vec<String> = listing
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|member| {
                if self.options.preserve_paths {
                    member.to_string()
                } else {
                    Path::new(member)
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| member.to_string())
                }
            })
            .filter(|name| self.staging.join(name).is_file())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl Task for UnrarFileTask {
    media_accessors!("UnrarFile");

    fn execute(&mut self) -> Result<Vec<MediaFile>, TaskError> {
        let archive = self
            .media
            .full_path()
            .ok_or_else(|| TaskError::Failed(format!("{} has no location", self.media.filename)))?;
        std::fs::create_dir_all(&self.staging).map_err(|e| TaskError::io(&self.staging, e))?;

        let listing = run_command(&self.list_command(&archive))?;
        run_command(&self.extract_command(&archive))?;

        let names = self.extracted_names(&String::from_utf8_lossy(&listing.stdout));
        let generated = add_gen_files(&self.media, &self.staging, &names)?;
        self.media.synced = true;
        info!(archive = %self.media.filename, extracted = generated.len(), "archive extracted");
        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn head_volume_rule() {
        assert!(is_head_volume("Movie/movie.rar"));
        assert!(is_head_volume("movie.part1.rar"));
        assert!(is_head_volume("movie.PART01.RAR"));
        assert!(!is_head_volume("movie.part02.rar"));
        assert!(!is_head_volume("movie.r00"));
        assert!(!is_head_volume("movie.mkv"));
        assert!(is_head_volume("party.rar"));
    }

    fn task(staging: &TempDir, preserve_paths: bool) -> UnrarFileTask {
        UnrarFileTask {
            media: MediaFile::new(1, "movie.rar", 10),
            staging: staging.path().to_path_buf(),
            options: UnrarOptions {
                unrar_path: "unrar".into(),
                preserve_paths,
            },
        }
    }

    #[test]
    fn extraction_mode_follows_preserve_paths() {
        let staging = TempDir::new().unwrap();
        let archive = Path::new("/complete/movie.rar");

        let flat = task(&staging, false).extract_command(archive);
        assert_eq!(flat.args[..3], ["e", "-o+", "-y"]);
        assert_eq!(flat.args[3], "/complete/movie.rar");

        let nested = task(&staging, true).extract_command(archive);
        assert_eq!(nested.args[0], "x");
        assert_eq!(task(&staging, true).list_command(archive).args, ["lb", "/complete/movie.rar"]);
    }

    #[test]
    fn listing_is_mapped_to_extracted_files() {
        let staging = TempDir::new().unwrap();
        std::fs::write(staging.path().join("movie.mkv"), b"x").unwrap();
        std::fs::write(staging.path().join("sample.mkv"), b"x").unwrap();

        let names = task(&staging, false).extracted_names("Movie/movie.mkv\nMovie/Sample/sample.mkv\nMovie\n\n");
        assert_eq!(names, ["movie.mkv", "sample.mkv"]);
    }

    #[test]
    fn actionable_only_for_unsynced_head_volumes() {
        let staging = TempDir::new().unwrap();
        let definition = UnrarFile::new(staging.path().to_path_buf(), UnrarOptions::default());

        let mut head = MediaFile::new(1, "movie.rar", 10);
        head.compressed = true;
        head.file_path = Some("/complete".into());
        assert!(definition.is_actionable(&head));

        let mut segment = head.clone();
        segment.filename = "movie.r00".into();
        assert!(!definition.is_actionable(&segment));

        head.synced = true;
        assert!(!definition.is_actionable(&head));
    }
}
