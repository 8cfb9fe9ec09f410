//! Heart Rate Profile client
//!
//! Decodes Heart Rate Measurement frames and runs one connection cycle at a
//! time against a single sensor: connect, discover, enable notifications,
//! then decode every notification into a BPM event.
//!
//! Events are tagged with the connect cycle that produced them. Samples from
//! a cycle that has since been disconnected are dropped in [`HeartRateLink::recv`],
//! so nothing from a torn-down link can reach the session after `disconnect`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::transport::{BleAddress, GattCentral, GattConnection};
use super::BleError;

/// Heart Rate service (0x180D).
pub const HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
/// Heart Rate Measurement characteristic (0x2A37).
pub const HEART_RATE_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);
/// Client Characteristic Configuration descriptor (0x2902).
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);
/// CCC value that turns notifications on.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Flags bit 0: heart rate value is a little-endian u16.
const FLAG_HR_U16: u8 = 0x01;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Decode the BPM from a Heart Rate Measurement frame.
///
/// Only the value format bit of the flags byte is honoured; sensor contact,
/// energy expended and RR-interval fields are left undecoded. An empty frame
/// yields `None`. A frame shorter than its declared format reads as 0 BPM.
pub fn decode_measurement(frame: &[u8]) -> Option<u16> {
    let flags = *frame.first()?;
    let bpm = if flags & FLAG_HR_U16 != 0 {
        match frame.get(1..3) {
            Some(&[lo, hi]) => u16::from_le_bytes([lo, hi]),
            _ => 0,
        }
    } else {
        frame.get(1).map(|b| u16::from(*b)).unwrap_or(0)
    };
    Some(bpm)
}

/// What the link reports to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrEvent {
    Bpm(u16),
    ConnectionChanged(bool),
}

#[derive(Debug)]
struct CycleEvent {
    cycle: u64,
    event: HrEvent,
}

/// Sends `ConnectionChanged(false)` for a cycle at most once, whoever gets there first.
#[derive(Clone)]
struct DownReporter {
    cycle: u64,
    reported: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<CycleEvent>,
}

impl DownReporter {
    fn report(&self) {
        if !self.reported.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(CycleEvent {
                cycle: self.cycle,
                event: HrEvent::ConnectionChanged(false),
            });
        }
    }
}

struct ActiveCycle {
    id: u64,
    address: BleAddress,
    task: JoinHandle<()>,
    connection: Arc<Mutex<Option<Arc<dyn GattConnection>>>>,
    down: DownReporter,
}

/// Connection to a single heart-rate sensor.
pub struct HeartRateLink {
    central: Arc<dyn GattCentral>,
    connect_timeout: Duration,
    events_tx: mpsc::UnboundedSender<CycleEvent>,
    events_rx: mpsc::UnboundedReceiver<CycleEvent>,
    next_cycle: u64,
    active: Option<ActiveCycle>,
}

impl HeartRateLink {
    pub fn new(central: Arc<dyn GattCentral>, connect_timeout: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            central,
            connect_timeout,
            events_tx,
            events_rx,
            next_cycle: 1,
            active: None,
        }
    }

    /// Whether a connect cycle is in progress or established.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Address of the current cycle's sensor.
    pub fn address(&self) -> Option<BleAddress> {
        self.active.as_ref().map(|a| a.address)
    }

    /// Start a connect cycle to the sensor at `address`.
    ///
    /// Returns once the cycle is started, not once it is connected. Fails
    /// immediately when the address is malformed or the radio is unusable.
    /// An existing cycle is torn down first.
    pub async fn connect(&mut self, address: &str) -> Result<(), BleError> {
        let address: BleAddress = address.parse()?;
        self.central.availability()?;

        if self.active.is_some() {
            self.disconnect().await;
        }

        let cycle = self.next_cycle;
        self.next_cycle += 1;

        let down = DownReporter {
            cycle,
            reported: Arc::new(AtomicBool::new(false)),
            tx: self.events_tx.clone(),
        };
        let connection: Arc<Mutex<Option<Arc<dyn GattConnection>>>> = Arc::new(Mutex::new(None));

        let task = tokio::spawn(run_cycle(
            Arc::clone(&self.central),
            address,
            cycle,
            self.connect_timeout,
            self.events_tx.clone(),
            Arc::clone(&connection),
            down.clone(),
        ));

        log::info!("Heart-rate link: connecting to {} (cycle {})", address, cycle);
        self.active = Some(ActiveCycle {
            id: cycle,
            address,
            task,
            connection,
            down,
        });
        Ok(())
    }

    /// Tear down the current cycle, if any.
    ///
    /// When this returns the cycle's task is cancelled, the link is released
    /// and `ConnectionChanged(false)` has been queued unless the sensor
    /// already dropped the link itself. Safe to call when not connected.
    pub async fn disconnect(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.task.abort();
        let connection = active
            .connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(conn) = connection {
            match tokio::time::timeout(DISCONNECT_TIMEOUT, conn.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Heart-rate link: disconnect from {} failed: {}", active.address, e),
                Err(_) => log::warn!("Heart-rate link: disconnect from {} timed out", active.address),
            }
        }
        active.down.report();
        log::info!("Heart-rate link: disconnected from {} (cycle {})", active.address, active.id);
    }

    /// Wait for the next event.
    ///
    /// Never resolves while no events are queued, so it can sit in a
    /// `select!` permanently. Cancel safe.
    pub async fn recv(&mut self) -> HrEvent {
        loop {
            let Some(queued) = self.events_rx.recv().await else {
                // We hold a sender, so the channel cannot close.
                return std::future::pending().await;
            };
            if let Some(event) = self.accept(queued) {
                return event;
            }
        }
    }

    /// An event that is already queued, without waiting for one.
    pub fn try_recv(&mut self) -> Option<HrEvent> {
        while let Ok(queued) = self.events_rx.try_recv() {
            if let Some(event) = self.accept(queued) {
                return Some(event);
            }
        }
        None
    }

    fn accept(&self, CycleEvent { cycle, event }: CycleEvent) -> Option<HrEvent> {
        let current = self.active.as_ref().map(|a| a.id) == Some(cycle);
        match event {
            HrEvent::ConnectionChanged(false) => Some(event),
            _ if current => Some(event),
            _ => {
                log::debug!("Heart-rate link: dropping {:?} from stale cycle {}", event, cycle);
                None
            }
        }
    }
}

impl Drop for HeartRateLink {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
    }
}

/// One connect cycle: connect, discover, subscribe, then pump notifications
/// until the link drops.
async fn run_cycle(
    central: Arc<dyn GattCentral>,
    address: BleAddress,
    cycle: u64,
    connect_timeout: Duration,
    tx: mpsc::UnboundedSender<CycleEvent>,
    slot: Arc<Mutex<Option<Arc<dyn GattConnection>>>>,
    down: DownReporter,
) {
    let conn: Arc<dyn GattConnection> =
        match tokio::time::timeout(connect_timeout, central.connect(&address)).await {
            Ok(Ok(conn)) => Arc::from(conn),
            Ok(Err(e)) => {
                log::warn!("Heart-rate link: failed to connect to {}: {}", address, e);
                down.report();
                return;
            }
            Err(_) => {
                log::warn!("Heart-rate link: connecting to {} timed out", address);
                down.report();
                return;
            }
        };

    *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&conn));
    let _ = tx.send(CycleEvent {
        cycle,
        event: HrEvent::ConnectionChanged(true),
    });

    if let Err(e) = enable_notifications(conn.as_ref()).await {
        // The transport link stays up; the sensor just never sends samples.
        log::error!("Heart-rate link: {} cannot stream heart rate: {}", address, e);
    }

    loop {
        match conn.next_notification().await {
            Ok((uuid, frame)) if uuid == HEART_RATE_MEASUREMENT => {
                if let Some(bpm) = decode_measurement(&frame) {
                    log::debug!("Heart-rate link: {} bpm from {}", bpm, address);
                    let _ = tx.send(CycleEvent {
                        cycle,
                        event: HrEvent::Bpm(bpm),
                    });
                }
            }
            Ok(_) => {}
            Err(e) => {
                log::info!("Heart-rate link: {} went away: {}", address, e);
                break;
            }
        }
    }

    slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    down.report();
}

/// Find the measurement characteristic and write the CCC enable value.
async fn enable_notifications(conn: &dyn GattConnection) -> Result<(), BleError> {
    let services = conn.discover_services().await?;
    let measurement = services
        .iter()
        .find(|s| s.uuid == HEART_RATE_SERVICE)
        .and_then(|s| s.characteristic(HEART_RATE_MEASUREMENT))
        .ok_or_else(|| {
            BleError::GattError("no heart rate measurement characteristic".to_string())
        })?;

    if !measurement.descriptors.contains(&CLIENT_CHARACTERISTIC_CONFIG) {
        log::warn!("Heart rate measurement has no CCC descriptor listed, writing anyway");
    }

    conn.write_descriptor(
        HEART_RATE_SERVICE,
        HEART_RATE_MEASUREMENT,
        CLIENT_CHARACTERISTIC_CONFIG,
        &ENABLE_NOTIFICATION_VALUE,
    )
    .await
}
