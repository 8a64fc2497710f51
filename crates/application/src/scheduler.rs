use domain::{
    complete_external, run_task, Advance, Catalog, CommandOutcome, DomainError, MediaFile, Task,
    Workflow,
};
use futures::future;
use futures::stream::{self, StreamExt};
use infrastructure::{ProcessManager, ProcessOptions};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub max_processes: usize,
    /// Send tasks with an external command through the process manager.
    pub enable_parallel: bool,
    pub process: ProcessOptions,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_processes: 4,
            enable_parallel: false,
            process: ProcessOptions::default(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub rounds: usize,
    pub tasks: usize,
    pub failed_tasks: usize,
    pub finished: usize,
    pub interrupted: bool,
}

/// A task queued for a round, tagged with the workflow it came from.
struct Queued {
    slot: usize,
    task: Box<dyn Task>,
}

/// Drives workflows round by round: collect tasks, run them with bounded
/// parallelism, persist what they return, then advance each workflow.
pub struct Scheduler {
    catalog: Arc<dyn Catalog>,
    options: SchedulerOptions,
    interrupt: CancellationToken,
}

impl Scheduler {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        options: SchedulerOptions,
        interrupt: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            options,
            interrupt,
        }
    }

    pub async fn run(&self, mut workflows: Vec<Workflow>) -> Result<TickSummary, DomainError> {
        let mut summary = TickSummary::default();

        while !workflows.is_empty() {
            if self.interrupt.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            summary.rounds += 1;

            let mut queue = Vec::new();
            for (slot, workflow) in workflows.iter().enumerate() {
                for task in workflow.next_tasks().await? {
                    queue.push(Queued { slot, task });
                }
            }
            summary.tasks += queue.len();
            debug!(round = summary.rounds, workflows = workflows.len(), tasks = queue.len(), "round started");

            let names: Vec<String> = workflows.iter().map(|w| w.torrent().name.clone()).collect();
            let results = self.execute(queue, &names).await?;
            summary.failed_tasks += results
                .iter()
                .flatten()
                .filter(|media| media.has_error())
                .count();

            // Unfinished phases must not advance; the next tick resumes them.
            if self.interrupt.is_cancelled() {
                warn!("interrupted, leaving remaining work for the next tick");
                summary.interrupted = true;
                break;
            }

            let mut remaining = Vec::new();
            for (mut workflow, produced) in workflows.into_iter().zip(results) {
                match workflow.advance(&produced).await? {
                    Advance::Finished => summary.finished += 1,
                    Advance::Continue => remaining.push(workflow),
                    Advance::Yield => {}
                }
            }
            workflows = remaining;
        }

        info!(
            rounds = summary.rounds,
            tasks = summary.tasks,
            failed = summary.failed_tasks,
            finished = summary.finished,
            "scheduler done"
        );
        Ok(summary)
    }

    /// Runs one round and returns the persisted media per workflow slot.
    async fn execute(
        &self,
        queue: Vec<Queued>,
        names: &[String],
    ) -> Result<Vec<Vec<MediaFile>>, DomainError> {
        let (external, inline): (Vec<Queued>, Vec<Queued>) = queue
            .into_iter()
            .partition(|queued| self.options.enable_parallel && queued.task.external_command().is_some());

        let (inline, external) = tokio::join!(self.run_inline(inline), self.run_external(external, names));

        let mut results = vec![Vec::new(); names.len()];
        for (slot, media) in inline?.into_iter().chain(external?) {
            results[slot].extend(media);
        }
        Ok(results)
    }

    async fn run_inline(&self, queue: Vec<Queued>) -> Result<Vec<(usize, Vec<MediaFile>)>, DomainError> {
        let interrupt = self.interrupt.clone();
        let mut completed = stream::iter(queue)
            .take_while(move |_| future::ready(!interrupt.is_cancelled()))
            .map(|Queued { slot, task }| async move {
                let name = task.name().to_string();
                let original = task.media().clone();
                match tokio::task::spawn_blocking(move || run_task(task)).await {
                    Ok(media) => (slot, media),
                    Err(err) => {
                        error!(task = %name, media = %original.filename, error = %err, "task aborted");
                        let mut media = original;
                        media.error_msg = Some(format!("{name} aborted: {err}"));
                        (slot, vec![media])
                    }
                }
            })
            .buffer_unordered(self.options.max_processes.max(1));

        let mut persisted = Vec::new();
        while let Some((slot, media)) = completed.next().await {
            persisted.push((slot, self.persist(media).await?));
        }
        Ok(persisted)
    }

    async fn run_external(
        &self,
        queue: Vec<Queued>,
        names: &[String],
    ) -> Result<Vec<(usize, Vec<MediaFile>)>, DomainError> {
        if queue.is_empty() {
            return Ok(Vec::new());
        }
        let mut manager = ProcessManager::new(self.options.process.clone(), self.interrupt.clone())
            .map_err(|e| DomainError::ValidationError(e.to_string()))?;

        let mut waiting: HashMap<(String, String), Queued> = HashMap::new();
        let mut rejected = Vec::new();
        for queued in queue {
            let key = (names[queued.slot].clone(), queued.task.media().filename.clone());
            let added = match queued.task.external_command() {
                Some(command) => manager.add_task(key.0.clone(), key.1.clone(), command),
                None => continue,
            };
            match added {
                Ok(()) => {
                    waiting.insert(key, queued);
                }
                Err(err) => rejected.push((queued, err.to_string())),
            }
        }

        let mut outcomes: Vec<(String, String, CommandOutcome)> = Vec::new();
        let report = manager
            .run(|torrent, media, outcome| {
                outcomes.push((torrent.to_string(), media.to_string(), outcome.clone()));
            })
            .await;
        debug!(
            torrents = report.len(),
            children = report.values().map(Vec::len).sum::<usize>(),
            "process manager finished"
        );

        let mut persisted = Vec::new();
        for (torrent, media, outcome) in outcomes {
            if let Some(Queued { slot, task }) = waiting.remove(&(torrent, media)) {
                let produced = complete_external(task, &outcome);
                persisted.push((slot, self.persist(produced).await?));
            }
        }
        for (Queued { slot, task }, reason) in rejected {
            let mut media = task.into_media();
            media.error_msg = Some(reason);
            persisted.push((slot, self.persist(vec![media]).await?));
        }
        if !waiting.is_empty() {
            debug!(count = waiting.len(), "external tasks never started");
        }
        Ok(persisted)
    }

    async fn persist(&self, medias: Vec<MediaFile>) -> Result<Vec<MediaFile>, DomainError> {
        let mut saved = Vec::with_capacity(medias.len());
        for media in medias {
            saved.push(self.catalog.save_media(&media).await?);
        }
        Ok(saved)
    }
}
