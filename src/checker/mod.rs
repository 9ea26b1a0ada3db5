//! Orchestration of a checking run
//!
//! This module provides functionality for:
//! - Running accounts through a validator one at a time
//! - Pausing, resuming and cancelling a run between checks
//! - Streaming per-account outcomes and run-level progress

pub mod events;
pub mod run;

pub use events::{ControlFlag, RunEvent, RunPhase, RunSummary};
pub use run::{AccountChecker, RunControl, RunHandle};
