//! The standard task set: stage, extract, ship and clean up media.

/// Implements the media accessors of [`domain::Task`] for a struct with a
/// `media` field.
macro_rules! media_accessors {
    ($name:expr) => {
        fn name(&self) -> &str {
            $name
        }

        fn media(&self) -> &domain::MediaFile {
            &self.media
        }

        fn media_mut(&mut self) -> &mut domain::MediaFile {
            &mut self.media
        }

        fn into_media(self: Box<Self>) -> domain::MediaFile {
            self.media
        }
    };
}
pub(crate) use media_accessors;

mod copy_file;
mod delete_file;
mod sync_file;
mod unrar_file;

pub use copy_file::CopyFile;
pub use delete_file::DeleteFile;
pub use sync_file::SyncFile;
pub use unrar_file::{is_head_volume, UnrarFile};

use domain::{ExternalCommand, TaskError, TaskRegistry};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// Staging directory shared by every task.
    pub sync_path: PathBuf,
    pub video_filetypes: HashSet<String>,
    pub sync: SyncOptions,
    pub unrar: UnrarOptions,
}

/// Shape of the rsync invocation used by [`SyncFile`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub rsync_path: String,
    pub dryrun: bool,
    pub verbose: bool,
    pub progress: bool,
    pub perms: bool,
    pub delayupdates: bool,
    pub recursive: bool,
    pub chmod: Option<String>,
    pub identity: Option<PathBuf>,
    pub port: Option<u16>,
    pub remote_user: Option<String>,
    pub remote_host: Option<String>,
    pub remote_path: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            rsync_path: "rsync".to_string(),
            dryrun: false,
            verbose: false,
            progress: false,
            perms: false,
            delayupdates: false,
            recursive: false,
            chmod: None,
            identity: None,
            port: None,
            remote_user: None,
            remote_host: None,
            remote_path: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnrarOptions {
    pub unrar_path: String,
    /// Keep the archive's directory layout instead of flattening members.
    pub preserve_paths: bool,
}

impl Default for UnrarOptions {
    fn default() -> Self {
        Self {
            unrar_path: "unrar".to_string(),
            preserve_paths: false,
        }
    }
}

pub fn standard_registry(options: &TaskOptions) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register(Arc::new(CopyFile::new(
        options.sync_path.clone(),
        options.video_filetypes.clone(),
    )));
    registry.register(Arc::new(UnrarFile::new(
        options.sync_path.clone(),
        options.unrar.clone(),
    )));
    registry.register(Arc::new(SyncFile::new(
        options.sync_path.clone(),
        options.sync.clone(),
    )));
    registry.register(Arc::new(DeleteFile::new(options.sync_path.clone())));
    registry
}

/// Runs a command to completion on the calling thread.
pub(crate) fn run_command(command: &ExternalCommand) -> Result<Output, TaskError> {
    debug!(command = %command, "running");
    let output = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| TaskError::Command {
            command: command.program.clone(),
            detail: e.to_string(),
        })?;

    if output.status.success() {
        return Ok(output);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = match (output.status.code(), stderr.trim()) {
        (Some(code), "") => format!("Exited with error code {code}"),
        (Some(code), stderr) => format!("Exited with error code {code}: {stderr}"),
        (None, _) => "Killed by signal".to_string(),
    };
    Err(TaskError::Command {
        command: command.program.clone(),
        detail,
    })
}
