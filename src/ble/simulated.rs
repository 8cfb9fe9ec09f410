//! In-process heart-rate sensor simulator
//!
//! A simulated central with any number of simulated sensors behind it. Each
//! sensor exposes the Heart Rate service (or, for protocol-mismatch tests,
//! only a Battery service) and pushes measurement frames once its CCC
//! descriptor has been written. Used for tests and the CLI `simulate`
//! command without real BLE hardware.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::heart_rate::{
    CLIENT_CHARACTERISTIC_CONFIG, ENABLE_NOTIFICATION_VALUE, HEART_RATE_MEASUREMENT,
    HEART_RATE_SERVICE,
};
use super::transport::{BleAddress, GattCentral, GattCharacteristic, GattConnection, GattService};
use super::BleError;

const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
const BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// Live side of one simulated link, held by the sensor.
struct SimLink {
    tx: mpsc::UnboundedSender<(Uuid, Vec<u8>)>,
    connected: Arc<AtomicBool>,
    notifying: Arc<AtomicBool>,
}

struct SimSensorState {
    address: BleAddress,
    has_heart_rate: bool,
    link: StdMutex<Option<SimLink>>,
    connect_count: AtomicUsize,
}

impl SimSensorState {
    fn link(&self) -> std::sync::MutexGuard<'_, Option<SimLink>> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A simulated BLE central with its own registry of sensors.
pub struct SimGattCentral {
    sensors: StdMutex<HashMap<BleAddress, Arc<SimSensorState>>>,
    available: AtomicBool,
    permitted: AtomicBool,
    connect_latency: StdMutex<Duration>,
}

impl SimGattCentral {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sensors: StdMutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            permitted: AtomicBool::new(true),
            connect_latency: StdMutex::new(Duration::ZERO),
        })
    }

    /// Register a heart-rate sensor at `address`.
    pub fn add_sensor(&self, address: BleAddress) -> SimHeartRateSensor {
        self.register(address, true)
    }

    /// Register a device at `address` that does not speak the Heart Rate Profile.
    pub fn add_sensor_without_heart_rate(&self, address: BleAddress) -> SimHeartRateSensor {
        self.register(address, false)
    }

    fn register(&self, address: BleAddress, has_heart_rate: bool) -> SimHeartRateSensor {
        let state = Arc::new(SimSensorState {
            address,
            has_heart_rate,
            link: StdMutex::new(None),
            connect_count: AtomicUsize::new(0),
        });
        self.sensors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address, Arc::clone(&state));
        SimHeartRateSensor { state }
    }

    /// Simulate the radio being switched off (or back on).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Simulate the Bluetooth permission being revoked (or granted).
    pub fn set_permitted(&self, permitted: bool) {
        self.permitted.store(permitted, Ordering::SeqCst);
    }

    /// Delay applied to every connect. Uses tokio time, so paused clocks
    /// advance instantly in tests.
    pub fn set_connect_latency(&self, latency: Duration) {
        *self.connect_latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }
}

#[async_trait]
impl GattCentral for SimGattCentral {
    fn availability(&self) -> Result<(), BleError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BleError::Unavailable("simulated radio is off".to_string()));
        }
        if !self.permitted.load(Ordering::SeqCst) {
            return Err(BleError::PermissionDenied);
        }
        Ok(())
    }

    async fn connect(&self, address: &BleAddress) -> Result<Box<dyn GattConnection>, BleError> {
        self.availability()?;

        let latency = *self.connect_latency.lock().unwrap_or_else(|e| e.into_inner());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = self
            .sensors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .cloned()
            .ok_or_else(|| BleError::ConnectionError(format!("no device at {}", address)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let notifying = Arc::new(AtomicBool::new(false));

        // A new connection supersedes whatever link the sensor had.
        let previous = state.link().replace(SimLink {
            tx,
            connected: Arc::clone(&connected),
            notifying: Arc::clone(&notifying),
        });
        if let Some(old) = previous {
            old.connected.store(false, Ordering::SeqCst);
        }
        state.connect_count.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SimGattConnection {
            rx: Mutex::new(rx),
            connected,
            notifying,
            sensor: state,
        }))
    }
}

/// Central-side end of a simulated link.
pub struct SimGattConnection {
    rx: Mutex<mpsc::UnboundedReceiver<(Uuid, Vec<u8>)>>,
    connected: Arc<AtomicBool>,
    notifying: Arc<AtomicBool>,
    sensor: Arc<SimSensorState>,
}

#[async_trait]
impl GattConnection for SimGattConnection {
    async fn discover_services(&self) -> Result<Vec<GattService>, BleError> {
        if !self.is_connected() {
            return Err(BleError::Disconnected);
        }

        let mut services = vec![GattService {
            uuid: BATTERY_SERVICE,
            characteristics: vec![GattCharacteristic {
                uuid: BATTERY_LEVEL,
                descriptors: vec![],
            }],
        }];
        if self.sensor.has_heart_rate {
            services.push(GattService {
                uuid: HEART_RATE_SERVICE,
                characteristics: vec![GattCharacteristic {
                    uuid: HEART_RATE_MEASUREMENT,
                    descriptors: vec![CLIENT_CHARACTERISTIC_CONFIG],
                }],
            });
        }
        Ok(services)
    }

    async fn write_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), BleError> {
        if !self.is_connected() {
            return Err(BleError::Disconnected);
        }
        if !self.sensor.has_heart_rate
            || service != HEART_RATE_SERVICE
            || characteristic != HEART_RATE_MEASUREMENT
            || descriptor != CLIENT_CHARACTERISTIC_CONFIG
        {
            return Err(BleError::GattError(format!("no descriptor {}", descriptor)));
        }
        self.notifying
            .store(value == ENABLE_NOTIFICATION_VALUE, Ordering::SeqCst);
        Ok(())
    }

    async fn next_notification(&self) -> Result<(Uuid, Vec<u8>), BleError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(BleError::Disconnected)
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        self.connected.store(false, Ordering::SeqCst);
        let mut link = self.sensor.link();
        let ours = link
            .as_ref()
            .is_some_and(|l| Arc::ptr_eq(&l.connected, &self.connected));
        if ours {
            link.take();
        }
        Ok(())
    }

    fn peer_address(&self) -> &BleAddress {
        &self.sensor.address
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Test handle for driving a simulated sensor.
#[derive(Clone)]
pub struct SimHeartRateSensor {
    state: Arc<SimSensorState>,
}

impl SimHeartRateSensor {
    pub fn address(&self) -> BleAddress {
        self.state.address
    }

    /// Push a raw Heart Rate Measurement frame. Returns `false` when nobody
    /// is subscribed, in which case the frame is dropped like on the air.
    pub fn notify(&self, frame: &[u8]) -> bool {
        let link = self.state.link();
        match link.as_ref() {
            Some(l) if l.connected.load(Ordering::SeqCst) && l.notifying.load(Ordering::SeqCst) => {
                l.tx.send((HEART_RATE_MEASUREMENT, frame.to_vec())).is_ok()
            }
            _ => false,
        }
    }

    /// Push an 8-bit-format measurement.
    pub fn notify_bpm(&self, bpm: u8) -> bool {
        self.notify(&[0x00, bpm])
    }

    /// Drop the link from the sensor side, as when it goes out of range.
    pub fn drop_connection(&self) {
        if let Some(link) = self.state.link().take() {
            link.connected.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .link()
            .as_ref()
            .is_some_and(|l| l.connected.load(Ordering::SeqCst))
    }

    pub fn notifications_enabled(&self) -> bool {
        self.state
            .link()
            .as_ref()
            .is_some_and(|l| l.notifying.load(Ordering::SeqCst))
    }

    /// How many times a central has connected to this sensor.
    pub fn connect_count(&self) -> usize {
        self.state.connect_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> BleAddress {
        BleAddress([0xA0, 0x9E, 0x1A, 0x00, 0x00, 0x02])
    }

    #[tokio::test]
    async fn test_frames_need_subscription() {
        let central = SimGattCentral::new();
        let sensor = central.add_sensor(addr());
        let conn = central.connect(&addr()).await.unwrap();

        assert!(sensor.is_connected());
        assert!(!sensor.notify_bpm(70));

        conn.write_descriptor(
            HEART_RATE_SERVICE,
            HEART_RATE_MEASUREMENT,
            CLIENT_CHARACTERISTIC_CONFIG,
            &ENABLE_NOTIFICATION_VALUE,
        )
        .await
        .unwrap();
        assert!(sensor.notify_bpm(70));

        let (uuid, frame) = conn.next_notification().await.unwrap();
        assert_eq!(uuid, HEART_RATE_MEASUREMENT);
        assert_eq!(frame, vec![0x00, 70]);
    }

    #[tokio::test]
    async fn test_drop_ends_notifications() {
        let central = SimGattCentral::new();
        let sensor = central.add_sensor(addr());
        let conn = central.connect(&addr()).await.unwrap();

        sensor.drop_connection();
        assert!(!sensor.is_connected());
        assert!(matches!(conn.next_notification().await, Err(BleError::Disconnected)));
    }

    #[tokio::test]
    async fn test_services_without_heart_rate() {
        let central = SimGattCentral::new();
        central.add_sensor_without_heart_rate(addr());
        let conn = central.connect(&addr()).await.unwrap();

        let services = conn.discover_services().await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].uuid, BATTERY_SERVICE);
        assert!(conn
            .write_descriptor(
                HEART_RATE_SERVICE,
                HEART_RATE_MEASUREMENT,
                CLIENT_CHARACTERISTIC_CONFIG,
                &ENABLE_NOTIFICATION_VALUE,
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_address() {
        let central = SimGattCentral::new();
        assert!(matches!(
            central.connect(&addr()).await,
            Err(BleError::ConnectionError(_))
        ));
    }
}
