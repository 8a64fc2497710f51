pub mod lock;
pub mod scheduler;

pub use lock::{LockError, PidLock};
pub use scheduler::{Scheduler, SchedulerOptions, TickSummary};

use config::{ConfigError, Settings};
use domain::*;
use infrastructure::{
    standard_registry, DatabaseOptions, MetainfoParser, ProcessError, ProcessOptions,
    SqliteCatalog, SyncOptions, TaskOptions, UnrarOptions,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl AppError {
    /// Bad configuration or bad filters, as opposed to runtime failures.
    pub fn is_programming_error(&self) -> bool {
        match self {
            AppError::Config(_) => true,
            AppError::Domain(err) => err.is_programming_error(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another instance holds the run lock.
    Locked,
    Completed(TickReport),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub load: LoadReport,
    pub retried: usize,
    pub cancelled: usize,
    pub workflows: usize,
    pub scheduler: TickSummary,
    pub maintenance: Option<CleanUpOutcome>,
}

/// Wires configuration, catalog, loader, workflows and scheduler into one
/// tick of the pipeline.
pub struct SeedManager {
    settings: Settings,
    parser: Arc<dyn TorrentParser>,
    plan: Arc<PhasePlan>,
    catalog: OnceCell<Arc<dyn Catalog>>,
    interrupt: CancellationToken,
}

impl SeedManager {
    pub fn new(settings: Settings, interrupt: CancellationToken) -> Result<Self, AppError> {
        Self::with_parser(settings, Arc::new(MetainfoParser::new()), interrupt)
    }

    pub fn with_parser(
        settings: Settings,
        parser: Arc<dyn TorrentParser>,
        interrupt: CancellationToken,
    ) -> Result<Self, AppError> {
        let registry = standard_registry(&task_options(&settings));

        let mut configured = HashMap::new();
        for (name, tasks) in settings.phase_tasks() {
            configured.insert(name.parse::<Phase>()?, tasks.to_vec());
        }
        let disabled = settings
            .workflow
            .disabled_phases
            .iter()
            .map(|phase| phase.parse::<Phase>())
            .collect::<Result<Vec<_>, _>>()?;
        let plan = PhasePlan::build(&registry, &configured, &disabled)?;

        Ok(Self {
            settings,
            parser,
            plan: Arc::new(plan),
            catalog: OnceCell::new(),
            interrupt,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Opens the catalog on first use, running pending migrations.
    pub async fn catalog(&self) -> Result<Arc<dyn Catalog>, AppError> {
        let catalog = self
            .catalog
            .get_or_try_init(|| async {
                let mut options = DatabaseOptions::new(self.settings.database_path());
                options.busy_timeout = self.settings.idle_timeout();
                options.debug = self.settings.database.connection_debug;
                let catalog = tokio::task::spawn_blocking(move || SqliteCatalog::open(&options))
                    .await
                    .map_err(|e| DomainError::from(CatalogError::new("opening the catalog", e)))??;
                Ok::<Arc<dyn Catalog>, AppError>(Arc::new(catalog))
            })
            .await?;
        Ok(Arc::clone(catalog))
    }

    /// One pass of the pipeline under the run lock. `retry` additionally
    /// gives failed torrents another attempt.
    pub async fn tick(&self, retry: bool) -> Result<TickOutcome, AppError> {
        let lock_path = self.settings.lock_path();
        let lock = match PidLock::acquire(&lock_path, self.settings.lock_timeout()).await {
            Ok(lock) => lock,
            Err(LockError::Busy { pid, .. }) => {
                info!(lock = %lock_path.display(), ?pid, "another instance is running");
                return Ok(TickOutcome::Locked);
            }
            Err(err) => return Err(err.into()),
        };

        let mut report = TickReport::default();
        let result = self.run_locked(retry, &mut report).await;

        // Maintenance runs whenever the catalog came up, even after a failed pass.
        if let Some(catalog) = self.catalog.get() {
            let maintenance = Maintenance::new(
                Arc::clone(catalog),
                self.settings.torrent.torrent_path.clone(),
            );
            match maintenance.clean_up().await {
                Ok(outcome) => report.maintenance = Some(outcome),
                Err(err) if result.is_ok() => return Err(err.into()),
                Err(err) => error!(error = %err, "maintenance failed"),
            }
        }
        drop(lock);

        result?;
        Ok(TickOutcome::Completed(report))
    }

    async fn run_locked(&self, retry: bool, report: &mut TickReport) -> Result<(), AppError> {
        let catalog = self.catalog().await?;

        let loader = Loader::new(
            Arc::clone(&catalog),
            Arc::clone(&self.parser),
            loader_options(&self.settings),
        );
        report.load = loader.load().await?;

        if retry || self.settings.workflow.retry {
            let (retried, cancelled) = self.prepare_retries(&catalog).await?;
            report.retried = retried;
            report.cancelled = cancelled;
        }

        let workflows: Vec<Workflow> = catalog
            .get_torrents_active()
            .await?
            .into_iter()
            .map(|torrent| Workflow::new(torrent, Arc::clone(&catalog), Arc::clone(&self.plan)))
            .collect();
        report.workflows = workflows.len();
        if workflows.is_empty() {
            info!("no active torrents");
            return Ok(());
        }

        let scheduler = Scheduler::new(
            Arc::clone(&catalog),
            scheduler_options(&self.settings),
            self.interrupt.clone(),
        );
        report.scheduler = scheduler.run(workflows).await?;
        Ok(())
    }

    /// Cancels failed torrents out of retries and resets the rest so the
    /// current phase runs again.
    async fn prepare_retries(&self, catalog: &Arc<dyn Catalog>) -> Result<(usize, usize), AppError> {
        let max_retry = self.settings.workflow.max_retry;
        let (mut retried, mut cancelled) = (0, 0);

        for mut torrent in catalog.get_torrents_failed().await? {
            let Some(id) = torrent.id else {
                continue;
            };
            if torrent.retry_count >= max_retry {
                warn!(torrent = %torrent.name, retries = torrent.retry_count, "out of retries, cancelling");
                let mut workflow =
                    Workflow::new(torrent, Arc::clone(catalog), Arc::clone(&self.plan));
                workflow.cancel().await?;
                cancelled += 1;
                continue;
            }

            let mut values = ValueMap::new();
            values.insert("error_msg".to_string(), Value::Null);
            catalog
                .bulk_update(
                    &values,
                    EntityKind::MediaFile,
                    &Filter::and([
                        selectors::medias_of(id),
                        Filter::ne("error_msg", Value::Null),
                    ]),
                )
                .await?;

            torrent.clear_failure();
            torrent.retry_count += 1;
            let torrent = catalog.save_torrent(&torrent).await?;
            info!(torrent = %torrent.name, attempt = torrent.retry_count, "retrying");
            retried += 1;
        }
        Ok((retried, cancelled))
    }
}

fn loader_options(settings: &Settings) -> LoaderOptions {
    let torrent = &settings.torrent;
    LoaderOptions {
        torrent_path: torrent.torrent_path.clone(),
        incomplete_path: torrent.incomplete_path.clone(),
        media_paths: torrent.media_paths.clone(),
        video_filetypes: torrent.video_filetypes.iter().cloned().collect(),
        compressed_filetypes: torrent.compressed_filetypes.iter().cloned().collect(),
        minimum_file_size: torrent.minimum_file_size,
    }
}

fn task_options(settings: &Settings) -> TaskOptions {
    let sync = &settings.tasks_filesync;
    TaskOptions {
        sync_path: settings.tasks.sync_path.clone(),
        video_filetypes: settings
            .torrent
            .video_filetypes
            .iter()
            .cloned()
            .collect::<HashSet<_>>(),
        sync: SyncOptions {
            rsync_path: sync.rsync_path.clone(),
            dryrun: sync.dryrun,
            verbose: sync.verbose,
            progress: sync.progress,
            perms: sync.perms,
            delayupdates: sync.delayupdates,
            recursive: sync.recursive,
            chmod: sync.chmod.clone(),
            identity: sync.identity.clone(),
            port: sync.port,
            remote_user: sync.remote_user.clone(),
            remote_host: sync.remote_host.clone(),
            remote_path: sync.remote_path.clone(),
        },
        unrar: UnrarOptions {
            unrar_path: settings.tasks_unrar.unrar_path.clone(),
            preserve_paths: settings.tasks_unrar.preserve_paths,
        },
    }
}

fn scheduler_options(settings: &Settings) -> SchedulerOptions {
    let prsync = &settings.prsync;
    SchedulerOptions {
        max_processes: settings.process.max_processes,
        enable_parallel: settings.tasks_filesync.enable_parallel,
        process: ProcessOptions {
            max_threads: prsync.rsync_threads,
            timeout: settings.thread_timeout(),
            stdout_dir: prsync.stdout_dir.clone(),
            stderr_dir: prsync.stderr_dir.clone(),
            print_out: prsync.print_out,
            stdout_buffer: prsync.stdout_buffer,
            stderr_buffer: prsync.stderr_buffer,
            stderr_verbose: prsync.stderr_verbose,
        },
    }
}
