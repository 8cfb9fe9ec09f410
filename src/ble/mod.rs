//! BLE heart-rate sensor support
//!
//! Provides the GATT transport traits, the Heart Rate Profile decoder and
//! connection lifecycle, an in-process simulated sensor for tests, and
//! (behind `ble-central`) a btleplug-backed central for real hardware.

#[cfg(feature = "ble-central")]
pub mod btleplug_central;
pub mod heart_rate;
pub mod simulated;
pub mod transport;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BleError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("GATT error: {0}")]
    GattError(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Bluetooth unavailable: {0}")]
    Unavailable(String),

    #[error("Bluetooth permission not granted")]
    PermissionDenied,

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Operation timed out")]
    Timeout,
}
