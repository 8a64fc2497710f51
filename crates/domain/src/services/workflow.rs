use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::entities::{MediaFile, Torrent, TorrentState};
use crate::errors::DomainError;
use crate::repositories::Catalog;
use crate::services::tasks::{Phase, PhasePlan, Task, TaskDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Prepare,
    Activate,
    Complete,
    Cancel,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Prepare => "prepare",
            Transition::Activate => "activate",
            Transition::Complete => "complete",
            Transition::Cancel => "cancel",
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            Transition::Prepare => Some(Phase::Prepare),
            Transition::Activate => Some(Phase::Activate),
            Transition::Complete => Some(Phase::Complete),
            Transition::Cancel => None,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Rule {
    transition: Transition,
    sources: &'static [TorrentState],
    target: TorrentState,
}

// Declaration order matters: the first rule leaving a state is its phase.
const RULES: [Rule; 4] = [
    Rule {
        transition: Transition::Prepare,
        sources: &[TorrentState::Init],
        target: TorrentState::Ready,
    },
    Rule {
        transition: Transition::Activate,
        sources: &[TorrentState::Ready],
        target: TorrentState::Active,
    },
    Rule {
        transition: Transition::Complete,
        sources: &[TorrentState::Active],
        target: TorrentState::Done,
    },
    Rule {
        transition: Transition::Cancel,
        sources: &[TorrentState::Init, TorrentState::Ready, TorrentState::Active],
        target: TorrentState::Cancelled,
    },
];

/// Computes the state reached by firing `transition` from `current`.
pub fn apply_transition(
    current: TorrentState,
    transition: Transition,
) -> Result<TorrentState, DomainError> {
    RULES
        .iter()
        .find(|rule| rule.transition == transition && rule.sources.contains(&current))
        .map(|rule| rule.target)
        .ok_or_else(|| DomainError::IllegalTransition {
            transition: transition.to_string(),
            from: current.to_string(),
        })
}

/// The phase whose transition leaves `state`, if any.
pub fn phase_of(state: TorrentState) -> Option<Phase> {
    RULES
        .iter()
        .find(|rule| rule.sources.contains(&state))
        .and_then(|rule| rule.transition.phase())
}

/// What the scheduler should do with a workflow after a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Reached `done` or `cancelled`.
    Finished,
    /// Moved through a phase without doing any work; run the next phase now.
    Continue,
    /// Done for this tick: work was performed, a task failed, or the torrent
    /// has nothing to work on yet.
    Yield,
}

/// Per-torrent state machine, resumed from the torrent's stored state.
pub struct Workflow {
    torrent: Torrent,
    catalog: Arc<dyn Catalog>,
    plan: Arc<PhasePlan>,
}

impl Workflow {
    pub fn new(torrent: Torrent, catalog: Arc<dyn Catalog>, plan: Arc<PhasePlan>) -> Self {
        Self {
            torrent,
            catalog,
            plan,
        }
    }

    pub fn torrent(&self) -> &Torrent {
        &self.torrent
    }

    pub fn state(&self) -> TorrentState {
        self.torrent.state
    }

    pub fn is_finished(&self) -> bool {
        self.torrent.state.is_terminal()
    }

    pub fn phase(&self) -> Option<Phase> {
        phase_of(self.torrent.state)
    }

    pub fn tasks(&self) -> &[Arc<dyn TaskDefinition>] {
        match self.phase() {
            Some(phase) => self.plan.tasks(phase),
            None => &[],
        }
    }

    /// One task instance per `(task, media)` pair the current phase applies to.
    pub async fn next_tasks(&self) -> Result<Vec<Box<dyn Task>>, DomainError> {
        let definitions = self.tasks();
        if definitions.is_empty() {
            return Ok(Vec::new());
        }
        let torrent_id = self.torrent_id()?;
        let medias = self.catalog.get_medias_by(torrent_id, None).await?;

        let mut tasks = Vec::new();
        for definition in definitions {
            for media in medias.iter().filter(|m| !m.missing && !m.skipped) {
                if definition.is_actionable(media) {
                    tasks.push(definition.create(media.clone()));
                }
            }
        }
        debug!(
            torrent = %self.torrent.name,
            phase = ?self.phase(),
            count = tasks.len(),
            "collected tasks"
        );
        Ok(tasks)
    }

    /// Fires the current phase's transition once its tasks for this round are
    /// done. `results` holds every media returned by those tasks.
    pub async fn advance(&mut self, results: &[MediaFile]) -> Result<Advance, DomainError> {
        if self.is_finished() {
            return Ok(Advance::Finished);
        }

        if let Some(failed) = results.iter().find(|media| media.has_error()) {
            let reason = format!(
                "{}: {}",
                failed.filename,
                failed.error_msg.as_deref().unwrap_or_default()
            );
            warn!(torrent = %self.torrent.name, state = %self.torrent.state, %reason, "phase failed");
            self.torrent.mark_failed(reason);
            self.torrent = self.catalog.save_torrent(&self.torrent).await?;
            return Ok(Advance::Yield);
        }

        let Some(phase) = self.phase() else {
            return Ok(Advance::Finished);
        };

        if self.catalog.count_medias(self.torrent_id()?).await? == 0 {
            debug!(torrent = %self.torrent.name, "no media recorded yet");
            return Ok(Advance::Yield);
        }

        let target = apply_transition(self.torrent.state, Transition::from(phase))?;
        self.set_state(target).await?;
        info!(torrent = %self.torrent.name, %phase, state = %target, "workflow advanced");

        Ok(if target.is_terminal() {
            Advance::Finished
        } else if results.is_empty() {
            Advance::Continue
        } else {
            Advance::Yield
        })
    }

    pub async fn cancel(&mut self) -> Result<(), DomainError> {
        let target = apply_transition(self.torrent.state, Transition::Cancel)?;
        self.set_state(target).await?;
        info!(torrent = %self.torrent.name, "workflow cancelled");
        Ok(())
    }

    async fn set_state(&mut self, state: TorrentState) -> Result<(), DomainError> {
        self.torrent.set_state(state);
        self.torrent = self.catalog.save_torrent(&self.torrent).await?;
        Ok(())
    }

    fn torrent_id(&self) -> Result<i32, DomainError> {
        self.torrent.id.ok_or_else(|| {
            DomainError::ValidationError(format!("torrent {} was never saved", self.torrent.name))
        })
    }
}

impl From<Phase> for Transition {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Prepare => Transition::Prepare,
            Phase::Activate => Transition::Activate,
            Phase::Complete => Transition::Complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use TorrentState::*;
        assert_eq!(apply_transition(Init, Transition::Prepare).unwrap(), Ready);
        assert_eq!(apply_transition(Ready, Transition::Activate).unwrap(), Active);
        assert_eq!(apply_transition(Active, Transition::Complete).unwrap(), Done);
        assert_eq!(apply_transition(Ready, Transition::Cancel).unwrap(), Cancelled);
        assert_eq!(apply_transition(Init, Transition::Cancel).unwrap(), Cancelled);
        assert!(apply_transition(Init, Transition::Activate).is_err());
        assert!(apply_transition(Done, Transition::Cancel).is_err());
        assert!(apply_transition(Cancelled, Transition::Prepare).is_err());
    }

    #[test]
    fn phase_follows_state() {
        assert_eq!(phase_of(TorrentState::Init), Some(Phase::Prepare));
        assert_eq!(phase_of(TorrentState::Ready), Some(Phase::Activate));
        assert_eq!(phase_of(TorrentState::Active), Some(Phase::Complete));
        assert_eq!(phase_of(TorrentState::Done), None);
        assert_eq!(phase_of(TorrentState::Cancelled), None);
    }
}
