//! Heart-rate sensor integration tests
//!
//! A controller talking to a simulated Heart Rate Profile sensor through the
//! simulated GATT central.
//!
//! Run with:
//!   cargo test --test heart_rate_session

use std::sync::Arc;
use std::time::Duration;

use runtrack::ble::simulated::{SimGattCentral, SimHeartRateSensor};
use runtrack::location::SimulatedLocationSource;
use runtrack::storage::InMemoryRunStore;
use runtrack::{RunStore, SessionController, SessionHandle, TrackerConfig};

const SENSOR: &str = "A0:9E:1A:55:66:77";

struct Harness {
    handle: SessionHandle,
    central: Arc<SimGattCentral>,
    store: Arc<InMemoryRunStore>,
}

fn spawn(config: TrackerConfig) -> Harness {
    let central = SimGattCentral::new();
    let store = Arc::new(InMemoryRunStore::new());
    let handle = SessionController::new(
        config,
        store.clone(),
        SimulatedLocationSource::new(),
        central.clone(),
    )
    .spawn();
    Harness { handle, central, store }
}

fn add_sensor(central: &SimGattCentral) -> SimHeartRateSensor {
    central.add_sensor(SENSOR.parse().unwrap())
}

/// Wait until the link reports connected and the CCC write has gone through.
async fn wait_streaming(handle: &SessionHandle, sensor: &SimHeartRateSensor) {
    handle.wait_for(|s| s.sensor_connected).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(sensor.notifications_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_samples_recorded_only_while_running() {
    let Harness { handle, central, store } = spawn(TrackerConfig::default());
    let sensor = add_sensor(&central);

    handle.start(Some(SENSOR)).await.unwrap();
    wait_streaming(&handle, &sensor).await;

    assert!(sensor.notify(&[0x00, 120]));
    let snapshot = handle.wait_for(|s| s.current_bpm == Some(120)).await.unwrap();
    assert_eq!(snapshot.sensor_address.as_deref(), Some(SENSOR));

    handle.pause().await.unwrap();
    let paused = handle.wait_for(|s| s.paused && !s.sensor_connected).await.unwrap();
    assert_eq!(paused.current_bpm, None);
    assert!(!sensor.is_connected());
    assert!(!sensor.notify_bpm(130));

    handle.resume().await.unwrap();
    wait_streaming(&handle, &sensor).await;
    // 16-bit value format.
    assert!(sensor.notify(&[0x01, 0x7D, 0x00]));
    handle.wait_for(|s| s.current_bpm == Some(125)).await.unwrap();

    let id = handle.finish_and_wait().await.unwrap();
    let record = store.get_by_id(&id).unwrap().unwrap();
    let bpm: Vec<u16> = record.heart_rate.iter().map(|s| s.bpm).collect();
    assert_eq!(bpm, vec![120, 125]);
    assert_eq!(sensor.connect_count(), 2);
    handle.wait_for(|s| !s.sensor_connected).await.unwrap();
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sample_notified_before_pause_is_kept() {
    let Harness { handle, central, store } = spawn(TrackerConfig::default());
    let sensor = add_sensor(&central);

    handle.start(Some(SENSOR)).await.unwrap();
    wait_streaming(&handle, &sensor).await;

    assert!(sensor.notify_bpm(150));
    handle.pause().await.unwrap();
    handle.wait_for(|s| s.paused).await.unwrap();

    let id = handle.finish_and_wait().await.unwrap();
    let bpm: Vec<u16> = store
        .get_by_id(&id)
        .unwrap()
        .unwrap()
        .heart_rate
        .iter()
        .map(|s| s.bpm)
        .collect();
    assert_eq!(bpm, vec![150]);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sample_notified_before_finish_is_saved() {
    let Harness { handle, central, store } = spawn(TrackerConfig::default());
    let sensor = add_sensor(&central);

    handle.start(Some(SENSOR)).await.unwrap();
    wait_streaming(&handle, &sensor).await;

    assert!(sensor.notify_bpm(151));
    let id = handle.finish_and_wait().await.unwrap();
    assert_eq!(store.get_by_id(&id).unwrap().unwrap().heart_rate.len(), 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_configured_sensor_used_by_default() {
    let mut config = TrackerConfig::default();
    config.heart_rate.sensor_address = Some(SENSOR.to_string());
    let Harness { handle, central, .. } = spawn(config);
    let sensor = add_sensor(&central);

    handle.start(None).await.unwrap();
    wait_streaming(&handle, &sensor).await;
    handle.stop().await.unwrap();
    handle.wait_for(|s| !s.sensor_connected).await.unwrap();

    // An empty address records without a sensor.
    handle.start(Some("")).await.unwrap();
    let snapshot = handle.wait_for(|s| s.running).await.unwrap();
    assert_eq!(snapshot.sensor_address, None);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sensor.connect_count(), 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_empty_and_short_frames() {
    let Harness { handle, central, store } = spawn(TrackerConfig::default());
    let sensor = add_sensor(&central);

    handle.start(Some(SENSOR)).await.unwrap();
    wait_streaming(&handle, &sensor).await;

    assert!(sensor.notify(&[]));
    assert!(sensor.notify(&[0x01, 0x50]));
    assert!(sensor.notify(&[0x00, 99]));
    handle.wait_for(|s| s.current_bpm == Some(99)).await.unwrap();

    let id = handle.finish_and_wait().await.unwrap();
    let bpm: Vec<u16> = store
        .get_by_id(&id)
        .unwrap()
        .unwrap()
        .heart_rate
        .iter()
        .map(|s| s.bpm)
        .collect();
    assert_eq!(bpm, vec![0, 99]);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sensor_dropping_out_mid_run() {
    let Harness { handle, central, store } = spawn(TrackerConfig::default());
    let sensor = add_sensor(&central);

    handle.start(Some(SENSOR)).await.unwrap();
    wait_streaming(&handle, &sensor).await;
    assert!(sensor.notify_bpm(140));
    handle.wait_for(|s| s.current_bpm == Some(140)).await.unwrap();

    sensor.drop_connection();
    let snapshot = handle.wait_for(|s| !s.sensor_connected).await.unwrap();
    assert!(snapshot.running);
    assert_eq!(snapshot.current_bpm, None);

    let id = handle.finish_and_wait().await.unwrap();
    assert_eq!(store.get_by_id(&id).unwrap().unwrap().heart_rate.len(), 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_device_without_heart_rate_service() {
    let Harness { handle, central, store } = spawn(TrackerConfig::default());
    let sensor = central.add_sensor_without_heart_rate(SENSOR.parse().unwrap());

    handle.start(Some(SENSOR)).await.unwrap();
    handle.wait_for(|s| s.sensor_connected).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let snapshot = handle.snapshot();
    assert!(snapshot.sensor_connected);
    assert_eq!(snapshot.current_bpm, None);
    assert!(!sensor.notify_bpm(100));

    let id = handle.finish_and_wait().await.unwrap();
    assert!(store.get_by_id(&id).unwrap().unwrap().heart_rate.is_empty());
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_radio_unavailable_session_runs_without_sensor() {
    let Harness { handle, central, .. } = spawn(TrackerConfig::default());
    let sensor = add_sensor(&central);
    central.set_available(false);

    handle.start(Some(SENSOR)).await.unwrap();
    let snapshot = handle.wait_for(|s| s.running).await.unwrap();
    assert!(!snapshot.sensor_connected);
    assert_eq!(snapshot.current_bpm, None);
    assert!(snapshot.last_error.is_some());
    assert_eq!(sensor.connect_count(), 0);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(handle.snapshot().elapsed_secs, 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_address_is_refused() {
    let Harness { handle, .. } = spawn(TrackerConfig::default());

    handle.start(Some("polar-h10")).await.unwrap();
    let snapshot = handle.wait_for(|s| s.running).await.unwrap();
    assert!(!snapshot.sensor_connected);
    assert!(snapshot
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("polar-h10")));
    handle.shutdown().await;
}
