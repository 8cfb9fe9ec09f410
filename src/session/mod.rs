//! Session Controller
//!
//! One workout session at a time, run as a single tokio task. The task owns
//! the phase state machine, the in-progress run, the location subscription
//! and the heart-rate link; callers talk to it through a cloneable
//! [`SessionHandle`] and watch its published [`SessionSnapshot`].
//!
//! ```text
//! Idle ──Start──▶ Running ──Pause──▶ Paused
//!                    ▲                  │
//!                    └──────Resume──────┘
//! Running | Paused ──Stop / Finish──▶ Stopped ──Start──▶ Running
//! ```

mod accumulator;
mod controller;
mod handle;

pub use accumulator::RunAccumulator;
pub use controller::SessionController;
pub use handle::SessionHandle;

use std::fmt;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::TrackerError;
use crate::types::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

impl SessionPhase {
    /// Running or Paused: a run is being recorded.
    pub fn is_active(self) -> bool {
        matches!(self, SessionPhase::Running | SessionPhase::Paused)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Running => "running",
            SessionPhase::Paused => "paused",
            SessionPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Read-only view of the controller, republished after every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub running: bool,
    pub paused: bool,
    pub sensor_connected: bool,
    pub sensor_address: Option<String>,
    pub current_bpm: Option<u16>,
    pub distance_m: f64,
    pub elapsed_secs: u64,
    /// Every accepted fix of the current run, in arrival order.
    pub route: Vec<Position>,
    pub run_id: Option<String>,
    pub start_time: Option<String>,
    /// Finished runs the store refused, oldest first.
    pub unsaved_run_ids: Vec<String>,
    pub last_error: Option<String>,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, TrackerError>>;

pub(crate) enum Command {
    Start { address: Option<String> },
    Pause,
    Resume,
    Stop,
    Finish { reply: Option<Reply<String>> },
    RetrySave { reply: Reply<Vec<String>> },
    Shutdown { reply: oneshot::Sender<()> },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Start { .. } => "Start",
            Command::Pause => "Pause",
            Command::Resume => "Resume",
            Command::Stop => "Stop",
            Command::Finish { .. } => "Finish",
            Command::RetrySave { .. } => "RetrySave",
            Command::Shutdown { .. } => "Shutdown",
        }
    }
}
