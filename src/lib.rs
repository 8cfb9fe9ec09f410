// runtrack - Workout Tracking Core

pub mod ble;
pub mod config;
pub mod error;
pub mod geo;
pub mod location;
pub mod presence;
pub mod session;
pub mod storage;
pub mod summary;
pub mod types;

pub use config::TrackerConfig;
pub use error::TrackerError;
pub use session::{SessionController, SessionHandle, SessionPhase, SessionSnapshot};
pub use storage::{LocalRunStore, RunStore};
pub use types::{HeartRateSample, Position, PositionFix, RunRecord, SpeedSample};
