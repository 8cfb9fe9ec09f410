//! btleplug-backed central for real heart-rate straps
//!
//! Only compiled with the `ble-central` feature.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::stream::{Stream, StreamExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::heart_rate::{CLIENT_CHARACTERISTIC_CONFIG, ENABLE_NOTIFICATION_VALUE};
use super::transport::{BleAddress, GattCentral, GattCharacteristic, GattConnection, GattService};
use super::BleError;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;
type AdapterEventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

fn map_err(e: btleplug::Error) -> BleError {
    match e {
        btleplug::Error::PermissionDenied => BleError::PermissionDenied,
        btleplug::Error::NotConnected => BleError::Disconnected,
        btleplug::Error::TimedOut(_) => BleError::Timeout,
        other => BleError::ConnectionError(other.to_string()),
    }
}

/// Central role on the host's first Bluetooth adapter.
pub struct BtleplugCentral {
    adapter: Adapter,
    scan_timeout: Duration,
}

impl BtleplugCentral {
    /// Open the first adapter the platform reports.
    pub async fn new(scan_timeout: Duration) -> Result<Self, BleError> {
        let manager = Manager::new().await.map_err(map_err)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(map_err)?
            .into_iter()
            .next()
            .ok_or_else(|| BleError::Unavailable("no Bluetooth adapter found".to_string()))?;
        Ok(Self { adapter, scan_timeout })
    }

    async fn find_peripheral(&self, address: &BleAddress) -> Result<Peripheral, BleError> {
        let wanted = BDAddr::from(address.0);
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(map_err)?;

        let deadline = tokio::time::Instant::now() + self.scan_timeout;
        let found = loop {
            let peripherals = self.adapter.peripherals().await.map_err(map_err)?;
            if let Some(p) = peripherals.into_iter().find(|p| p.address() == wanted) {
                break Ok(p);
            }
            if tokio::time::Instant::now() >= deadline {
                break Err(BleError::ConnectionError(format!("{} not found while scanning", address)));
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            log::warn!("Failed to stop BLE scan: {}", e);
        }
        found
    }
}

#[async_trait]
impl GattCentral for BtleplugCentral {
    fn availability(&self) -> Result<(), BleError> {
        // Adapter power state is only observable asynchronously; a powered-off
        // radio surfaces as a connect failure instead.
        Ok(())
    }

    async fn connect(&self, address: &BleAddress) -> Result<Box<dyn GattConnection>, BleError> {
        let peripheral = self.find_peripheral(address).await?;
        // Subscribe before connecting so an early link loss is not missed.
        let adapter_events = self.adapter.events().await.map_err(map_err)?;
        peripheral.connect().await.map_err(map_err)?;
        log::info!("Connected to {}", address);

        Ok(Box::new(BtleplugConnection {
            peripheral,
            address: *address,
            connected: AtomicBool::new(true),
            streams: Mutex::new(LinkStreams {
                notifications: None,
                adapter_events,
            }),
        }))
    }
}

struct LinkStreams {
    notifications: Option<NotificationStream>,
    /// The notification stream does not end when the device drops the link;
    /// only the adapter reports that.
    adapter_events: AdapterEventStream,
}

pub struct BtleplugConnection {
    peripheral: Peripheral,
    address: BleAddress,
    connected: AtomicBool,
    streams: Mutex<LinkStreams>,
}

#[async_trait]
impl GattConnection for BtleplugConnection {
    async fn discover_services(&self) -> Result<Vec<GattService>, BleError> {
        self.peripheral.discover_services().await.map_err(map_err)?;
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|s| GattService {
                uuid: s.uuid,
                characteristics: s
                    .characteristics
                    .into_iter()
                    .map(|c| GattCharacteristic {
                        uuid: c.uuid,
                        descriptors: c.descriptors.into_iter().map(|d| d.uuid).collect(),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn write_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), BleError> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
            .ok_or_else(|| BleError::GattError(format!("no characteristic {}", characteristic)))?;

        // btleplug owns the CCC descriptor; subscribe/unsubscribe write it for us.
        if descriptor == CLIENT_CHARACTERISTIC_CONFIG {
            if value == ENABLE_NOTIFICATION_VALUE {
                self.peripheral.subscribe(&target).await.map_err(map_err)?;
            } else {
                self.peripheral.unsubscribe(&target).await.map_err(map_err)?;
            }
            return Ok(());
        }

        let desc = target
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor)
            .ok_or_else(|| BleError::GattError(format!("no descriptor {}", descriptor)))?;
        self.peripheral
            .write_descriptor(desc, value)
            .await
            .map_err(|e| BleError::GattError(e.to_string()))
    }

    async fn next_notification(&self) -> Result<(Uuid, Vec<u8>), BleError> {
        let mut guard = self.streams.lock().await;
        let streams = &mut *guard;
        if streams.notifications.is_none() {
            streams.notifications = Some(self.peripheral.notifications().await.map_err(map_err)?);
        }
        let Some(notifications) = streams.notifications.as_mut() else {
            return Err(BleError::Disconnected);
        };

        let id = self.peripheral.id();
        let next = next_or_lost(notifications, &mut streams.adapter_events, |event| {
            matches!(event, CentralEvent::DeviceDisconnected(gone) if *gone == id)
        })
        .await;
        match next {
            Ok(n) => Ok((n.uuid, n.value)),
            Err(e) => {
                log::info!("{} dropped the link", self.address);
                self.connected.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        self.connected.store(false, Ordering::SeqCst);
        self.peripheral.disconnect().await.map_err(map_err)
    }

    fn peer_address(&self) -> &BleAddress {
        &self.address
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Next item from `notifications`, or `Disconnected` once `events` yields an
/// item matching `is_loss` or either stream ends.
async fn next_or_lost<N, E, F>(
    notifications: &mut N,
    events: &mut E,
    is_loss: F,
) -> Result<N::Item, BleError>
where
    N: Stream + Unpin,
    E: Stream + Unpin,
    F: Fn(&E::Item) -> bool,
{
    loop {
        tokio::select! {
            item = notifications.next() => return item.ok_or(BleError::Disconnected),
            event = events.next() => match event {
                Some(event) if is_loss(&event) => return Err(BleError::Disconnected),
                Some(_) => {}
                None => return Err(BleError::Disconnected),
            },
        }
    }
}
