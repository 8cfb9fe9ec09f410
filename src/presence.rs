//! Foreground presence
//!
//! While a session is active the host keeps a visible, persistent status
//! entry (on mobile hosts a foreground-service notification) so it is not reclaimed.
//! The controller drives an implementation of [`ForegroundPresence`] with a
//! two-line [`LiveStatus`] on every fix, heart-rate event and phase change.

use std::fmt;

use crate::session::{SessionPhase, SessionSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveStatus {
    pub title: String,
    pub text: String,
}

impl LiveStatus {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        let title = match snapshot.phase {
            SessionPhase::Paused => "Tracking paused",
            _ => "Tracking ongoing",
        };
        let bpm = snapshot
            .current_bpm
            .map(|b| b.to_string())
            .unwrap_or_else(|| "--".to_string());
        Self {
            title: title.to_string(),
            text: format!("HR: {} bpm, Dist: {:.1} m", bpm, snapshot.distance_m),
        }
    }
}

impl fmt::Display for LiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.title, self.text)
    }
}

/// Host-side keep-alive surface.
pub trait ForegroundPresence: Send + Sync {
    /// A session became active; show the status entry.
    fn session_started(&self, status: &LiveStatus);

    fn update(&self, status: &LiveStatus);

    /// No session is active any more; remove the status entry.
    fn session_ended(&self);
}

/// Writes the status to the log. Used by headless hosts and the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresence;

impl ForegroundPresence for LogPresence {
    fn session_started(&self, status: &LiveStatus) {
        log::info!("{}", status);
    }

    fn update(&self, status: &LiveStatus) {
        log::debug!("{}", status);
    }

    fn session_ended(&self) {
        log::info!("Tracking ended");
    }
}
