use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TorrentState {
    Init,
    Ready,
    Active,
    Done,
    Cancelled,
}

impl TorrentState {
    pub const ALL: [TorrentState; 5] = [
        TorrentState::Init,
        TorrentState::Ready,
        TorrentState::Active,
        TorrentState::Done,
        TorrentState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentState::Init => "init",
            TorrentState::Ready => "ready",
            TorrentState::Active => "active",
            TorrentState::Done => "done",
            TorrentState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TorrentState::Done | TorrentState::Cancelled)
    }
}

impl fmt::Display for TorrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TorrentState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(TorrentState::Init),
            "ready" => Ok(TorrentState::Ready),
            "active" => Ok(TorrentState::Active),
            "done" => Ok(TorrentState::Done),
            "cancelled" => Ok(TorrentState::Cancelled),
            other => Err(DomainError::ValidationError(format!(
                "unknown torrent state: {other}"
            ))),
        }
    }
}

/// A `.torrent` file tracked by the pipeline. `name` is the file basename and
/// is unique across the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Torrent {
    pub id: Option<i32>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: TorrentState,
    pub retry_count: i32,
    pub failed: bool,
    pub error_msg: Option<String>,
    pub invalid: bool,
    pub purged: bool,
}

impl Torrent {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            name: name.into(),
            created_at: now,
            updated_at: now,
            state: TorrentState::Init,
            retry_count: 0,
            failed: false,
            error_msg: None,
            invalid: false,
            purged: false,
        }
    }

    /// Marks the torrent as permanently unparseable. The parse error is only
    /// logged: `error_msg` stays reserved for task failures.
    pub fn mark_invalid(&mut self) {
        self.invalid = true;
        self.state = TorrentState::Cancelled;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.failed = true;
        self.error_msg = Some(if reason.is_empty() {
            "unknown error".to_string()
        } else {
            reason
        });
        self.updated_at = Utc::now();
    }

    pub fn clear_failure(&mut self) {
        self.failed = false;
        self.error_msg = None;
        self.updated_at = Utc::now();
    }

    pub fn set_state(&mut self, state: TorrentState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    pub fn is_active(&self) -> bool {
        !self.invalid && !self.purged && !self.failed && !self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_round_trip_through_from_str() {
        for state in TorrentState::ALL {
            assert_eq!(state.as_str().parse::<TorrentState>().unwrap(), state);
        }
        assert!("paused".parse::<TorrentState>().is_err());
    }

    #[test]
    fn invalid_torrent_is_cancelled() {
        let mut torrent = Torrent::new("broken.torrent");
        torrent.mark_invalid();
        assert!(torrent.invalid);
        assert_eq!(torrent.state, TorrentState::Cancelled);
        assert!(!torrent.is_active());
    }

    #[test]
    fn failure_always_carries_a_message() {
        let mut torrent = Torrent::new("a.torrent");
        torrent.mark_failed("");
        assert!(torrent.failed);
        assert_eq!(torrent.error_msg.as_deref(), Some("unknown error"));
        torrent.clear_failure();
        assert!(!torrent.failed);
        assert!(torrent.error_msg.is_none());
        assert!(torrent.is_active());
    }
}
