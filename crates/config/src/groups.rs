use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Inputs to the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorrentSettings {
    pub torrent_path: PathBuf,
    pub incomplete_path: Option<PathBuf>,
    pub media_paths: Vec<PathBuf>,
    pub video_filetypes: Vec<String>,
    pub compressed_filetypes: Vec<String>,
    /// Videos below this many bytes are treated as samples and skipped.
    pub minimum_file_size: u64,
}

impl Default for TorrentSettings {
    fn default() -> Self {
        Self {
            torrent_path: PathBuf::from("/var/lib/transmission-daemon/info/torrents"),
            incomplete_path: None,
            media_paths: vec![PathBuf::from("/var/lib/transmission-daemon/downloads")],
            video_filetypes: [".avi", ".m4v", ".mkv", ".mov", ".mp4", ".mpg", ".ts", ".wmv"]
                .map(String::from)
                .to_vec(),
            compressed_filetypes: [".rar", ".r00", ".r01", ".r02", ".r03", ".r04", ".r05"]
                .map(String::from)
                .to_vec(),
            minimum_file_size: 50 * 1024 * 1024,
        }
    }
}

/// Task names per phase and the scheduler width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    pub prepare: Vec<String>,
    pub activate: Vec<String>,
    pub complete: Vec<String>,
    pub max_processes: usize,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            prepare: vec!["CopyFile".into(), "UnrarFile".into()],
            activate: vec!["SyncFile".into()],
            complete: vec!["DeleteFile".into()],
            max_processes: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksSettings {
    /// Staging directory.
    pub sync_path: PathBuf,
}

impl Default for TasksSettings {
    fn default() -> Self {
        Self {
            sync_path: PathBuf::from("/tmp/sync"),
        }
    }
}

/// Shape of the rsync command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSyncSettings {
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
    /// Hand sync commands to the parallel subprocess manager.
    pub enable_parallel: bool,
}

impl Default for FileSyncSettings {
    fn default() -> Self {
        Self {
            rsync_path: "rsync".into(),
            dryrun: false,
            verbose: false,
            progress: false,
            perms: true,
            delayupdates: true,
            recursive: false,
            chmod: None,
            identity: None,
            port: None,
            remote_user: None,
            remote_host: None,
            remote_path: String::new(),
            enable_parallel: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnrarSettings {
    pub unrar_path: String,
    pub preserve_paths: bool,
}

impl Default for UnrarSettings {
    fn default() -> Self {
        Self {
            unrar_path: "unrar".into(),
            preserve_paths: false,
        }
    }
}

/// Parallel subprocess manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrsyncSettings {
    pub rsync_threads: usize,
    /// Seconds; 0 never times out.
    pub thread_timeout: u64,
    pub stdout_dir: Option<PathBuf>,
    pub stderr_dir: Option<PathBuf>,
    pub print_out: bool,
    pub stdout_buffer: bool,
    pub stderr_buffer: bool,
    pub stderr_verbose: bool,
}

impl Default for PrsyncSettings {
    fn default() -> Self {
        Self {
            rsync_threads: 4,
            thread_timeout: 0,
            stdout_dir: None,
            stderr_dir: None,
            print_out: false,
            stdout_buffer: false,
            stderr_buffer: true,
            stderr_verbose: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Relative paths are resolved against the config directory.
    pub connection: PathBuf,
    /// Seconds a connection waits on a locked database.
    pub idle_timeout: u64,
    pub connection_debug: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            connection: PathBuf::from("seedmgr.db"),
            idle_timeout: 30,
            connection_debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub plugin_paths: Vec<PathBuf>,
    pub disabled_phases: Vec<String>,
    pub max_retry: i32,
    /// Run every tick in retry mode.
    pub retry: bool,
    /// Seconds to wait for the run lock.
    pub lock_timeout: u64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            plugin_paths: Vec::new(),
            disabled_phases: Vec::new(),
            max_retry: 3,
            retry: false,
            lock_timeout: 10,
        }
    }
}
