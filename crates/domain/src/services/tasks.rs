use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::entities::{extension_of, MediaFile};
use crate::errors::{DomainError, TaskError};

pub const DEFAULT_PRIORITY: i32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prepare,
    Activate,
    Complete,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Prepare, Phase::Activate, Phase::Complete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Activate => "activate",
            Phase::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepare" => Ok(Phase::Prepare),
            "activate" => Ok(Phase::Activate),
            "complete" => Ok(Phase::Complete),
            other => Err(DomainError::ValidationError(format!("unknown phase: {other}"))),
        }
    }
}

/// An external program invocation run by the subprocess manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How an external command ended.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    /// `0` on success, the exit code on error, `-N` when killed by signal N.
    pub exit_status: i32,
    pub stderr: String,
    /// Timeouts, interruptions and pipe errors recorded while running.
    pub failures: Vec<String>,
    pub elapsed: Duration,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_status == 0 && self.failures.is_empty()
    }

    pub fn describe(&self) -> String {
        let mut parts = self.failures.clone();
        if self.exit_status < 0 {
            parts.push(format!("Killed by signal {}", -self.exit_status));
        } else if self.exit_status > 0 {
            parts.push(format!("Exited with error code {}", self.exit_status));
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            parts.push(stderr.to_string());
        }
        parts.join(": ")
    }
}

/// A registered kind of task: decides which media it applies to and builds
/// the per-media instance.
pub trait TaskDefinition: Send + Sync {
    fn name(&self) -> &str;
    fn phase(&self) -> Phase;

    /// Higher runs first.
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    fn is_actionable(&self, media: &MediaFile) -> bool;
    fn create(&self, media: MediaFile) -> Box<dyn Task>;
}

/// One unit of work over a single media record.
pub trait Task: Send {
    fn name(&self) -> &str;
    fn media(&self) -> &MediaFile;
    fn media_mut(&mut self) -> &mut MediaFile;
    fn into_media(self: Box<Self>) -> MediaFile;

    /// Performs the work in-process, mutating the captured media and
    /// returning any newly generated media.
    fn execute(&mut self) -> Result<Vec<MediaFile>, TaskError>;

    /// A task that can hand its work to the parallel subprocess manager
    /// returns the command here.
    fn external_command(&self) -> Option<ExternalCommand> {
        None
    }

    /// Applies the outcome of [`Task::external_command`].
    fn finish_external(&mut self, outcome: &CommandOutcome) -> Result<Vec<MediaFile>, TaskError> {
        if outcome.success() {
            Ok(Vec::new())
        } else {
            Err(TaskError::Failed(outcome.describe()))
        }
    }
}

/// Runs a task to completion. Errors are recorded on the media rather than
/// propagated; the result is `[media, generated...]`.
pub fn run_task(mut task: Box<dyn Task>) -> Vec<MediaFile> {
    let started = Instant::now();
    task.media_mut().error_msg = None;
    let outcome = task.execute();
    settle(task, started.elapsed(), outcome)
}

/// Applies an external command outcome to a task, see [`run_task`].
pub fn complete_external(mut task: Box<dyn Task>, outcome: &CommandOutcome) -> Vec<MediaFile> {
    task.media_mut().error_msg = None;
    let result = task.finish_external(outcome);
    settle(task, outcome.elapsed, result)
}

fn settle(
    task: Box<dyn Task>,
    elapsed: Duration,
    outcome: Result<Vec<MediaFile>, TaskError>,
) -> Vec<MediaFile> {
    let name = task.name().to_string();
    let mut media = task.into_media();
    media.total_time = Some(elapsed.as_secs_f64());

    match outcome {
        Ok(generated) => {
            debug!(
                task = %name,
                media = %media.filename,
                generated = generated.len(),
                elapsed = ?elapsed,
                "task finished"
            );
            let mut results = Vec::with_capacity(generated.len() + 1);
            results.push(media);
            results.extend(generated);
            results
        }
        Err(err) => {
            warn!(task = %name, media = %media.filename, error = %err, "task failed");
            media.error_msg = Some(err.to_string());
            vec![media]
        }
    }
}

/// Builds media records for files a task wrote into `staging_dir`, owned by
/// the same torrent as `source`.
pub fn add_gen_files(
    source: &MediaFile,
    staging_dir: &Path,
    filenames: &[String],
) -> Result<Vec<MediaFile>, TaskError> {
    filenames
        .iter()
        .map(|filename| {
            let full = staging_dir.join(filename);
            let metadata = std::fs::metadata(&full).map_err(|e| TaskError::io(&full, e))?;
            Ok(MediaFile {
                id: None,
                torrent_id: source.torrent_id,
                filename: filename.clone(),
                file_ext: extension_of(filename),
                file_path: Some(staging_dir.display().to_string()),
                size: metadata.len() as i64,
                compressed: false,
                synced: false,
                missing: false,
                skipped: false,
                error_msg: None,
                total_time: None,
            })
        })
        .collect()
}

/// Every task kind known to this build, by name.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    definitions: HashMap<String, Arc<dyn TaskDefinition>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: Arc<dyn TaskDefinition>) {
        self.definitions
            .insert(definition.name().to_string(), definition);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskDefinition>> {
        self.definitions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// The configured tasks of each phase, highest priority first.
#[derive(Clone, Default)]
pub struct PhasePlan {
    phases: HashMap<Phase, Vec<Arc<dyn TaskDefinition>>>,
}

impl PhasePlan {
    pub fn build(
        registry: &TaskRegistry,
        configured: &HashMap<Phase, Vec<String>>,
        disabled: &[Phase],
    ) -> Result<Self, DomainError> {
        let mut phases = HashMap::new();
        for phase in Phase::ALL {
            let names = configured.get(&phase).map(Vec::as_slice).unwrap_or(&[]);
            let mut definitions = Vec::with_capacity(names.len());
            for name in names {
                let definition = registry
                    .get(name)
                    .ok_or_else(|| DomainError::UnknownTask(name.clone()))?;
                if definition.phase() != phase {
                    return Err(DomainError::ValidationError(format!(
                        "task {name} belongs to phase {}, not {phase}",
                        definition.phase()
                    )));
                }
                definitions.push(definition);
            }
            if disabled.contains(&phase) {
                debug!(%phase, "phase disabled");
                definitions.clear();
            }
            definitions.sort_by_key(|definition| std::cmp::Reverse(definition.priority()));
            phases.insert(phase, definitions);
        }
        Ok(Self { phases })
    }

    pub fn tasks(&self, phase: Phase) -> &[Arc<dyn TaskDefinition>] {
        self.phases.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Configurable stand-in task used across the domain tests.
    pub struct StubTask {
        pub name: &'static str,
        pub phase: Phase,
        pub priority: i32,
        pub fail_with: Option<&'static str>,
    }

    impl TaskDefinition for StubTask {
        fn name(&self) -> &str {
            self.name
        }

        fn phase(&self) -> Phase {
            self.phase
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn is_actionable(&self, media: &MediaFile) -> bool {
            !media.synced
        }

        fn create(&self, media: MediaFile) -> Box<dyn Task> {
            Box::new(StubInstance {
                name: self.name,
                media,
                fail_with: self.fail_with,
            })
        }
    }

    pub struct StubInstance {
        name: &'static str,
        media: MediaFile,
        fail_with: Option<&'static str>,
    }

    impl Task for StubInstance {
        fn name(&self) -> &str {
            self.name
        }

        fn media(&self) -> &MediaFile {
            &self.media
        }

        fn media_mut(&mut self) -> &mut MediaFile {
            &mut self.media
        }

        fn into_media(self: Box<Self>) -> MediaFile {
            self.media
        }

        fn execute(&mut self) -> Result<Vec<MediaFile>, TaskError> {
            match self.fail_with {
                Some(msg) => Err(TaskError::Failed(msg.to_string())),
                None => {
                    self.media.synced = true;
                    Ok(Vec::new())
                }
            }
        }
    }

    pub fn stub(name: &'static str, phase: Phase, priority: i32) -> Arc<dyn TaskDefinition> {
        Arc::new(StubTask {
            name,
            phase,
            priority,
            fail_with: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use tempfile::TempDir;

    fn registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.register(stub("Low", Phase::Prepare, 10));
        registry.register(stub("High", Phase::Prepare, 200));
        registry.register(stub("Sync", Phase::Activate, DEFAULT_PRIORITY));
        registry
    }

    fn configured(entries: &[(Phase, &[&str])]) -> HashMap<Phase, Vec<String>> {
        entries
            .iter()
            .map(|(phase, names)| (*phase, names.iter().map(|n| n.to_string()).collect()))
            .collect()
    }

    #[test]
    fn plan_orders_by_descending_priority() {
        let plan = PhasePlan::build(
            &registry(),
            &configured(&[(Phase::Prepare, &["Low", "High"]), (Phase::Activate, &["Sync"])]),
            &[],
        )
        .unwrap();

        let names: Vec<&str> = plan.tasks(Phase::Prepare).iter().map(|t| t.name()).collect();
        assert_eq!(names, ["High", "Low"]);
        assert_eq!(plan.tasks(Phase::Activate).len(), 1);
        assert!(plan.tasks(Phase::Complete).is_empty());
    }

    #[test]
    fn plan_rejects_unknown_and_misplaced_tasks() {
        let err = PhasePlan::build(&registry(), &configured(&[(Phase::Prepare, &["Nope"])]), &[])
            .err()
            .unwrap();
        assert!(matches!(err, DomainError::UnknownTask(ref name) if name == "Nope"));

        let err = PhasePlan::build(&registry(), &configured(&[(Phase::Complete, &["Sync"])]), &[])
            .err()
            .unwrap();
        assert!(matches!(err, DomainError::ValidationError(_)));
    }

    #[test]
    fn disabled_phase_has_no_tasks() {
        let plan = PhasePlan::build(
            &registry(),
            &configured(&[(Phase::Prepare, &["Low"])]),
            &[Phase::Prepare],
        )
        .unwrap();
        assert!(plan.tasks(Phase::Prepare).is_empty());
    }

    #[test]
    fn failing_task_records_error_and_time() {
        let definition = StubTask {
            name: "Broken",
            phase: Phase::Activate,
            priority: 1,
            fail_with: Some("disk on fire"),
        };
        let results = run_task(definition.create(MediaFile::new(7, "a.mp4", 1)));

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error_msg.as_deref(), Some("disk on fire"));
        assert!(results[0].total_time.is_some());
        assert!(!results[0].synced);
    }

    #[test]
    fn successful_run_clears_previous_error() {
        let mut media = MediaFile::new(7, "a.mp4", 1);
        media.error_msg = Some("old".into());
        let results = run_task(stub("Ok", Phase::Activate, 1).create(media));
        assert!(results[0].error_msg.is_none());
        assert!(results[0].synced);
    }

    #[test]
    fn external_outcome_is_described() {
        let outcome = CommandOutcome {
            exit_status: 23,
            stderr: "some files vanished\n".into(),
            failures: vec![],
            elapsed: Duration::from_millis(5),
        };
        assert!(!outcome.success());
        assert_eq!(
            outcome.describe(),
            "Exited with error code 23: some files vanished"
        );

        let results = complete_external(stub("Sync", Phase::Activate, 1).create(MediaFile::new(1, "a.mp4", 1)), &outcome);
        assert_eq!(
            results[0].error_msg.as_deref(),
            Some("Exited with error code 23: some files vanished")
        );
    }

    #[test]
    fn generated_files_are_staged_fresh_records() {
        let staging = TempDir::new().unwrap();
        std::fs::write(staging.path().join("movie.MKV"), b"12345").unwrap();

        let mut source = MediaFile::new(3, "pack/movie.rar", 99);
        source.compressed = true;
        source.error_msg = Some("stale".into());

        let generated =
            add_gen_files(&source, staging.path(), &["movie.MKV".to_string()]).unwrap();
        assert_eq!(generated.len(), 1);
        let media = &generated[0];
        assert_eq!(media.torrent_id, 3);
        assert_eq!(media.file_ext, ".mkv");
        assert_eq!(media.size, 5);
        assert!(media.is_located_in(staging.path()));
        assert!(!media.compressed && !media.synced && media.error_msg.is_none());

        assert!(add_gen_files(&source, staging.path(), &["gone.mkv".to_string()]).is_err());
    }
}
