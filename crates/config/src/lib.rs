mod groups;

pub use groups::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use toml::{Table, Value};
use tracing::{debug, info, warn};

pub const CONFIG_FILE: &str = "seedmgr.toml";
pub const LOCK_FILE: &str = "seedmgr.lock";
pub const ENV_PREFIX: &str = "SEEDMGR_";

const PHASES: [&str; 3] = ["prepare", "activate", "complete"];

/// Longest first so `tasks_filesync` wins over `tasks`.
const GROUPS: [&str; 8] = [
    "tasks_filesync",
    "tasks_unrar",
    "database",
    "workflow",
    "process",
    "torrent",
    "prsync",
    "tasks",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid settings: {0}")]
    Deserialize(#[from] toml::de::Error),
    #[error("cannot load .env: {0}")]
    Dotenv(#[from] dotenv::Error),
    #[error("{var}: {message}")]
    Env { var: String, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub torrent: TorrentSettings,
    pub process: ProcessSettings,
    pub tasks: TasksSettings,
    pub tasks_filesync: FileSyncSettings,
    pub tasks_unrar: UnrarSettings,
    pub prsync: PrsyncSettings,
    pub database: DatabaseSettings,
    pub workflow: WorkflowSettings,
    #[serde(skip)]
    pub config_dir: PathBuf,
}

impl Settings {
    /// `$XDG_CONFIG_HOME/seedmgr`, usually `~/.config/seedmgr`.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("seedmgr")
    }

    /// Defaults, then `seedmgr.toml`, then `.env` and `SEEDMGR_*` variables.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let env_file = config_dir.join(".env");
        match dotenv::from_path(&env_file) {
            Ok(()) => debug!(path = %env_file.display(), "loaded .env"),
            Err(dotenv::Error::Io(_)) => {}
            Err(err) => return Err(err.into()),
        }
        Self::load_with(config_dir, std::env::vars())
    }

    /// Like [`Settings::load`] with an explicit set of environment variables.
    pub fn load_with<I>(config_dir: &Path, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let path = config_dir.join(CONFIG_FILE);
        let mut table = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            info!(path = %path.display(), "loading configuration");
            toml::from_str::<Table>(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            info!(path = %path.display(), "no configuration file, using defaults");
            Table::new()
        };

        apply_env(&mut table, vars)?;

        let mut settings: Settings = Value::Table(table).try_into()?;
        settings.config_dir = config_dir.to_path_buf();
        settings.normalize();
        settings.validate()?;
        Ok(settings)
    }

    fn normalize(&mut self) {
        for list in [
            &mut self.torrent.video_filetypes,
            &mut self.torrent.compressed_filetypes,
        ] {
            for ext in list.iter_mut() {
                let lower = ext.trim().to_lowercase();
                *ext = if lower.starts_with('.') {
                    lower
                } else {
                    format!(".{lower}")
                };
            }
        }
        for phase in self.workflow.disabled_phases.iter_mut() {
            *phase = phase.trim().to_lowercase();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.process.max_processes == 0 {
            return Err(ConfigError::Invalid("process.max_processes must be at least 1".into()));
        }
        if self.prsync.rsync_threads == 0 {
            return Err(ConfigError::Invalid("prsync.rsync_threads must be at least 1".into()));
        }
        if self.tasks.sync_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("tasks.sync_path is empty".into()));
        }
        if self.workflow.max_retry < 0 {
            return Err(ConfigError::Invalid("workflow.max_retry is negative".into()));
        }
        if let Some(phase) = self
            .workflow
            .disabled_phases
            .iter()
            .find(|phase| !PHASES.contains(&phase.as_str()))
        {
            return Err(ConfigError::Invalid(format!(
                "workflow.disabled_phases: unknown phase {phase}"
            )));
        }
        if !self.workflow.plugin_paths.is_empty() {
            warn!(
                paths = ?self.workflow.plugin_paths,
                "workflow.plugin_paths is ignored, tasks are built in"
            );
        }
        Ok(())
    }

    /// Task names configured for each phase.
    pub fn phase_tasks(&self) -> [(&'static str, &[String]); 3] {
        [
            ("prepare", self.process.prepare.as_slice()),
            ("activate", self.process.activate.as_slice()),
            ("complete", self.process.complete.as_slice()),
        ]
    }

    pub fn database_path(&self) -> PathBuf {
        if self.database.connection.is_absolute() {
            self.database.connection.clone()
        } else {
            self.config_dir.join(&self.database.connection)
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.config_dir.join(LOCK_FILE)
    }

    pub fn thread_timeout(&self) -> Duration {
        Duration::from_secs(self.prsync.thread_timeout)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.database.idle_timeout)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.workflow.lock_timeout)
    }
}

/// Folds `SEEDMGR_<GROUP>_<KEY>` variables into the file table.
fn apply_env<I>(table: &mut Table, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let defaults = Value::try_from(Settings::default())
        .ok()
        .and_then(|value| value.as_table().cloned())
        .unwrap_or_default();

    for (var, raw) in vars {
        let Some(rest) = var.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let rest = rest.to_lowercase();
        let Some((group, key)) = GROUPS.iter().find_map(|group| {
            rest.strip_prefix(group)
                .and_then(|tail| tail.strip_prefix('_'))
                .filter(|key| !key.is_empty())
                .map(|key| (*group, key.to_string()))
        }) else {
            warn!(var = %var, "ignoring variable for an unknown settings group");
            continue;
        };

        let hint = defaults
            .get(group)
            .and_then(|section| section.get(key.as_str()));
        let value = parse_env_value(&var, &raw, hint)?;
        debug!(var = %var, "configuration overridden from environment");

        let section = table
            .entry(group.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        match section.as_table_mut() {
            Some(section) => {
                section.insert(key, value);
            }
            None => {
                return Err(ConfigError::Invalid(format!("[{group}] is not a table")));
            }
        }
    }
    Ok(())
}

/// Uses the default's type when the key has one, otherwise guesses.
fn parse_env_value(var: &str, raw: &str, hint: Option<&Value>) -> Result<Value, ConfigError> {
    let invalid = |expected: &str| ConfigError::Env {
        var: var.to_string(),
        message: format!("expected {expected}, got `{raw}`"),
    };
    let raw = raw.trim();
    match hint {
        Some(Value::Boolean(_)) => raw.parse().map(Value::Boolean).map_err(|_| invalid("a boolean")),
        Some(Value::Integer(_)) => raw.parse().map(Value::Integer).map_err(|_| invalid("an integer")),
        Some(Value::Array(_)) => Ok(Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        )),
        Some(_) => Ok(Value::String(raw.to_string())),
        None => Ok(raw
            .parse::<bool>()
            .map(Value::Boolean)
            .or_else(|_| raw.parse::<i64>().map(Value::Integer))
            .unwrap_or_else(|_| Value::String(raw.to_string()))),
    }
}
