use thiserror::Error;

use crate::ble::BleError;
use crate::location::LocationError;
use crate::session::SessionPhase;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("BLE error: {0}")]
    Ble(#[from] BleError),

    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{command} is not valid while {phase}")]
    InvalidPhase {
        command: &'static str,
        phase: SessionPhase,
    },

    #[error("Nothing to save")]
    NothingToSave,

    #[error("Session controller has shut down")]
    ControllerClosed,
}
