//! Run state machine
//!
//! ```text
//! idle ──start──► running ──complete──► completed
//!                  │  ▲    ──fail─────► failed
//!             pause│  │resume
//!                  ▼  │
//!                 paused (complete/fail also allowed)
//! ```
//!
//! `completed` and `failed` are terminal: late progress, completion, or failure
//! signals are ignored, and user commands are rejected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a simulation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

/// Something that happened to a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunEvent {
    Start,
    Progress(f64),
    Complete,
    Fail,
    Pause,
    Resume,
}

/// Result of applying an event to a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to a new status
    To(RunStatus),
    /// Event accepted, status unchanged
    Stay,
    /// Stale signal for a finished run; drop it
    Ignore,
    /// Event not allowed from this status
    Invalid,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Running or paused: the run still owns its input
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Paused)
    }

    /// Pure transition function
    pub fn apply(self, event: RunEvent) -> Transition {
        use RunEvent as E;
        use RunStatus as S;

        match (self, event) {
            (S::Idle, E::Start) => Transition::To(S::Running),
            (S::Idle, _) => Transition::Invalid,

            (S::Running | S::Paused, E::Progress(_)) => Transition::Stay,
            (S::Running | S::Paused, E::Complete) => Transition::To(S::Completed),
            (S::Running | S::Paused, E::Fail) => Transition::To(S::Failed),
            (S::Running, E::Pause) => Transition::To(S::Paused),
            (S::Paused, E::Resume) => Transition::To(S::Running),
            (S::Running | S::Paused, _) => Transition::Invalid,

            (S::Completed | S::Failed, E::Progress(_) | E::Complete | E::Fail) => {
                Transition::Ignore
            }
            (S::Completed | S::Failed, _) => Transition::Invalid,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunEvent::Start => f.write_str("start"),
            RunEvent::Progress(p) => write!(f, "progress({:.1})", p),
            RunEvent::Complete => f.write_str("complete"),
            RunEvent::Fail => f.write_str("fail"),
            RunEvent::Pause => f.write_str("pause"),
            RunEvent::Resume => f.write_str("resume"),
        }
    }
}
