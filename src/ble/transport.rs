//! GATT transport trait definitions and core types
//!
//! Defines the central-role GATT interface that the heart-rate link drives.
//! Both the simulated central and the btleplug central conform to it.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::BleError;

/// A 6-byte BLE device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BleAddress(pub [u8; 6]);

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e, g)
    }
}

impl FromStr for BleAddress {
    type Err = BleError;

    /// Accepts `AA:BB:CC:DD:EE:FF` or `AA-BB-CC-DD-EE-FF`, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BleError::InvalidAddress(s.to_string());
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(|c| c == ':' || c == '-');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(BleAddress(bytes))
    }
}

/// A characteristic found during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

/// A primary service found during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// An established GATT connection to a peripheral.
#[async_trait]
pub trait GattConnection: Send + Sync {
    /// Discover the peripheral's primary services and their characteristics.
    async fn discover_services(&self) -> Result<Vec<GattService>, BleError>;

    /// Write a characteristic descriptor, e.g. the client characteristic
    /// configuration to turn notifications on.
    async fn write_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), BleError>;

    /// Wait for the next notification from any subscribed characteristic.
    ///
    /// Returns `Err(BleError::Disconnected)` once the link is gone.
    async fn next_notification(&self) -> Result<(Uuid, Vec<u8>), BleError>;

    /// Tear the link down.
    async fn disconnect(&self) -> Result<(), BleError>;

    /// Address of the connected peripheral.
    fn peer_address(&self) -> &BleAddress;

    /// Check whether the link is still up.
    fn is_connected(&self) -> bool;
}

/// BLE central role: connecting to peripherals by address.
#[async_trait]
pub trait GattCentral: Send + Sync {
    /// `Ok` when the radio exists, is switched on and may be used.
    fn availability(&self) -> Result<(), BleError>;

    /// Connect to the peripheral at `address`.
    async fn connect(&self, address: &BleAddress) -> Result<Box<dyn GattConnection>, BleError>;
}
