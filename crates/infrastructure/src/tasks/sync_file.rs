use domain::{CommandOutcome, ExternalCommand, MediaFile, Phase, Task, TaskDefinition, TaskError};
use std::path::PathBuf;
use tracing::info;

use super::{media_accessors, run_command, SyncOptions};

/// Ships a staged file to the remote library with rsync.
pub struct SyncFile {
    staging: PathBuf,
    options: SyncOptions,
}

impl SyncFile {
    pub fn new(staging: PathBuf, options: SyncOptions) -> Self {
        Self { staging, options }
    }
}

impl TaskDefinition for SyncFile {
    fn name(&self) -> &str {
        "SyncFile"
    }

    fn phase(&self) -> Phase {
        Phase::Activate
    }

    fn is_actionable(&self, media: &MediaFile) -> bool {
        !media.synced && media.is_located_in(&self.staging)
    }

    fn create(&self, media: MediaFile) -> Box<dyn Task> {
        let command = sync_command(&self.options, &media);
        Box::new(SyncFileTask { media, command })
    }
}

/// `rsync [flags] [-e "ssh ..."] <source> [user@host:]<remote_path>/`
pub fn sync_command(options: &SyncOptions, media: &MediaFile) -> ExternalCommand {
    let flags = [
        (options.dryrun, "--dry-run"),
        (options.verbose, "--verbose"),
        (options.progress, "--progress"),
        (options.perms, "--perms"),
        (options.delayupdates, "--delay-updates"),
        (options.recursive, "--recursive"),
    ];
    let mut command = ExternalCommand::new(&options.rsync_path).args(
        flags
            .iter()
            .filter(|(enabled, _)| *enabled)
            .map(|(_, flag)| *flag),
    );

    if let Some(chmod) = options.chmod.as_deref().filter(|c| !c.is_empty()) {
        command = command.arg(format!("--chmod={chmod}"));
    }
    if let Some(shell) = remote_shell(options) {
        command = command.arg("-e").arg(shell);
    }

    let source = media
        .full_path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| media.filename.clone());
    command.arg(source).arg(destination(options))
}

fn remote_shell(options: &SyncOptions) -> Option<String> {
    if options.identity.is_none() && options.port.is_none() {
        return None;
    }
    let mut shell = String::from("ssh");
    if let Some(identity) = &options.identity {
        shell.push_str(&format!(" -i {}", identity.display()));
    }
    if let Some(port) = options.port {
        shell.push_str(&format!(" -p {port}"));
    }
    Some(shell)
}

fn destination(options: &SyncOptions) -> String {
    let path = format!("{}/", options.remote_path.trim_end_matches('/'));
    match (options.remote_user.as_deref(), options.remote_host.as_deref()) {
        (_, None) | (_, Some("")) => path,
        (Some(user), Some(host)) if !user.is_empty() => format!("{user}@{host}:{path}"),
        (_, Some(host)) => format!("{host}:{path}"),
    }
}

struct SyncFileTask {
    media: MediaFile,
    command: ExternalCommand,
}

impl Task for SyncFileTask {
    media_accessors!("SyncFile");

    fn execute(&mut self) -> Result<Vec<MediaFile>, TaskError> {
        run_command(&self.command)?;
        self.media.synced = true;
        info!(media = %self.media.filename, "synced");
        Ok(Vec::new())
    }

    fn external_command(&self) -> Option<ExternalCommand> {
        Some(self.command.clone())
    }

    fn finish_external(&mut self, outcome: &CommandOutcome) -> Result<Vec<MediaFile>, TaskError> {
        if !outcome.success() {
            return Err(TaskError::Command {
                command: self.command.program.clone(),
                detail: outcome.describe(),
            });
        }
        self.media.synced = true;
        info!(media = %self.media.filename, elapsed = ?outcome.elapsed, "synced");
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{complete_external, run_task};
    use std::time::Duration;

    fn staged(name: &str) -> MediaFile {
        let mut media = MediaFile::new(1, name, 4);
        media.file_path = Some("/tmp/sync".into());
        media
    }

    fn remote() -> SyncOptions {
        SyncOptions {
            verbose: true,
            perms: true,
            delayupdates: true,
            chmod: Some("ugo=rwX".into()),
            identity: Some(PathBuf::from("/home/me/.ssh/id_ed25519")),
            port: Some(2222),
            remote_user: Some("media".into()),
            remote_host: Some("nas".into()),
            remote_path: "/srv/lib/".into(),
            ..SyncOptions::default()
        }
    }

    #[test]
    fn command_is_assembled_from_options() {
        let command = sync_command(&remote(), &staged("a.mp4"));
        assert_eq!(command.program, "rsync");
        assert_eq!(
            command.args,
            [
                "--verbose",
                "--perms",
                "--delay-updates",
                "--chmod=ugo=rwX",
                "-e",
                "ssh -i /home/me/.ssh/id_ed25519 -p 2222",
                "/tmp/sync/a.mp4",
                "media@nas:/srv/lib/",
            ]
        );
    }

    #[test]
    fn local_destination_without_host() {
        let options = SyncOptions {
            remote_path: "/srv/lib".into(),
            ..SyncOptions::default()
        };
        let command = sync_command(&options, &staged("a.mp4"));
        assert_eq!(command.args, ["/tmp/sync/a.mp4", "/srv/lib/"]);
    }

    #[test]
    fn actionable_when_staged_and_unsynced() {
        let sync = SyncFile::new(PathBuf::from("/tmp/sync"), SyncOptions::default());
        let mut media = staged("a.mp4");
        assert!(sync.is_actionable(&media));
        media.synced = true;
        assert!(!sync.is_actionable(&media));
        media.synced = false;
        media.file_path = Some("/complete".into());
        assert!(!sync.is_actionable(&media));
    }

    #[test]
    fn inline_run_marks_synced() {
        let ok = SyncFile::new(
            PathBuf::from("/tmp/sync"),
            SyncOptions {
                rsync_path: "true".into(),
                ..SyncOptions::default()
            },
        );
        assert!(run_task(ok.create(staged("a.mp4")))[0].synced);

        let failing = SyncFile::new(
            PathBuf::from("/tmp/sync"),
            SyncOptions {
                rsync_path: "false".into(),
                ..SyncOptions::default()
            },
        );
        let results = run_task(failing.create(staged("a.mp4")));
        assert!(!results[0].synced);
        assert!(results[0].has_error());
    }

    #[test]
    fn external_outcome_is_applied() {
        let sync = SyncFile::new(PathBuf::from("/tmp/sync"), remote());
        let task = sync.create(staged("a.mp4"));
        assert!(task.external_command().is_some());

        let timed_out = CommandOutcome {
            exit_status: -15,
            stderr: String::new(),
            failures: vec!["Timed out".into()],
            elapsed: Duration::from_secs(3),
        };
        let results = complete_external(task, &timed_out);
        assert!(!results[0].synced);
        assert_eq!(
            results[0].error_msg.as_deref(),
            Some("rsync failed: Timed out: Killed by signal 15")
        );
        assert_eq!(results[0].total_time, Some(3.0));

        let done = CommandOutcome {
            exit_status: 0,
            stderr: "warning: skipped xattrs\n".into(),
            failures: Vec::new(),
            elapsed: Duration::from_secs(1),
        };
        assert!(complete_external(sync.create(staged("b.mp4")), &done)[0].synced);
    }
}
