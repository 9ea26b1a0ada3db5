//! Control signals into a run and progress events out of it

use crate::models::{CheckOutcome, RunTally};
use std::fmt;
use uuid::Uuid;

/// Flag written by the controlling surface and read by the run loop between checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlFlag {
    #[default]
    Running,
    Paused,
    Cancelled,
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Paused,
    Cancelled,
    Completed,
}

impl RunPhase {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunPhase::Cancelled | RunPhase::Completed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::Running => write!(f, "running"),
            RunPhase::Paused => write!(f, "paused"),
            RunPhase::Cancelled => write!(f, "cancelled"),
            RunPhase::Completed => write!(f, "completed"),
        }
    }
}

/// Progress notification emitted by the run loop
#[derive(Debug, Clone)]
pub enum RunEvent {
    Started { run_id: Uuid, total: usize },
    Outcome { outcome: CheckOutcome, tally: RunTally },
    Paused { tally: RunTally },
    Resumed { tally: RunTally },
    Cancelled { tally: RunTally },
    Completed { tally: RunTally },
}

impl RunEvent {
    /// Tally at the time of the event, if the event carries one
    pub fn tally(&self) -> Option<&RunTally> {
        match self {
            RunEvent::Started { .. } => None,
            RunEvent::Outcome { tally, .. }
            | RunEvent::Paused { tally }
            | RunEvent::Resumed { tally }
            | RunEvent::Cancelled { tally }
            | RunEvent::Completed { tally } => Some(tally),
        }
    }
}

/// What a finished run hands back
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub phase: RunPhase,
    pub tally: RunTally,
    pub outcomes: Vec<CheckOutcome>,
    /// Valid accounts that never made it into the output file
    pub unwritten: usize,
}

impl RunSummary {
    pub fn valid_accounts(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.outcomes.iter().filter(|o| o.is_valid())
    }
}
