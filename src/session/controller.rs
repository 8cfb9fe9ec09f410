use std::sync::Arc;

use chrono::Local;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use super::accumulator::RunAccumulator;
use super::handle::SessionHandle;
use super::{Command, SessionPhase, SessionSnapshot};
use crate::ble::heart_rate::{HeartRateLink, HrEvent};
use crate::ble::transport::GattCentral;
use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::location::{LocationFuser, LocationSource, StampedFix};
use crate::presence::{ForegroundPresence, LiveStatus, LogPresence};
use crate::storage::{start_time_at, RunStore, StorageError};
use crate::types::{now_millis, RunRecord};

/// Wires the controller's collaborators together and spawns its task.
pub struct SessionController {
    config: TrackerConfig,
    store: Arc<dyn RunStore>,
    location: Arc<dyn LocationSource>,
    central: Arc<dyn GattCentral>,
    presence: Arc<dyn ForegroundPresence>,
}

impl SessionController {
    pub fn new(
        config: TrackerConfig,
        store: Arc<dyn RunStore>,
        location: Arc<dyn LocationSource>,
        central: Arc<dyn GattCentral>,
    ) -> Self {
        Self {
            config,
            store,
            location,
            central,
            presence: Arc::new(LogPresence),
        }
    }

    pub fn with_presence(mut self, presence: Arc<dyn ForegroundPresence>) -> Self {
        self.presence = presence;
        self
    }

    /// Spawn the controller task on the current runtime.
    pub fn spawn(self) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(self.config.command_buffer.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let task = ControllerTask {
            fuser: LocationFuser::new(self.location, self.config.location.clone()),
            hr: HeartRateLink::new(self.central, self.config.heart_rate.connect_timeout()),
            store: self.store,
            presence: self.presence,
            commands: command_rx,
            snapshot_tx,
            phase: SessionPhase::Idle,
            run: None,
            sensor_address: None,
            sensor_connected: false,
            current_bpm: None,
            unsaved: Vec::new(),
            last_error: None,
            config: self.config,
        };
        tokio::spawn(task.run());

        SessionHandle::new(command_tx, snapshot_rx)
    }
}

enum Event {
    Command(Option<Command>),
    Tick,
    Fix(StampedFix),
    HeartRate(HrEvent),
}

struct ControllerTask {
    config: TrackerConfig,
    store: Arc<dyn RunStore>,
    presence: Arc<dyn ForegroundPresence>,
    fuser: LocationFuser,
    hr: HeartRateLink,
    commands: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<SessionSnapshot>,

    phase: SessionPhase,
    /// Current run while active; the finished run after a Finish, for display.
    run: Option<RunAccumulator>,
    sensor_address: Option<String>,
    sensor_connected: bool,
    current_bpm: Option<u16>,
    /// Finished runs the store refused to take.
    unsaved: Vec<RunRecord>,
    last_error: Option<String>,
}

impl ControllerTask {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick is immediate.
        ticker.tick().await;

        let shutdown_reply = loop {
            let event = tokio::select! {
                biased;
                cmd = self.commands.recv() => Event::Command(cmd),
                _ = ticker.tick() => Event::Tick,
                Some(fix) = self.fuser.recv() => Event::Fix(fix),
                ev = self.hr.recv() => Event::HeartRate(ev),
            };

            match event {
                Event::Command(Some(Command::Shutdown { reply })) => break Some(reply),
                Event::Command(Some(cmd)) => self.handle_command(cmd).await,
                Event::Command(None) => break None,
                Event::Tick => self.on_tick(),
                Event::Fix(fix) => self.on_fix(fix),
                Event::HeartRate(ev) => self.on_heart_rate(ev),
            }
        };

        self.shutdown().await;
        // Release the command queue before acknowledging, so callers see a closed handle.
        drop(self);
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        let name = cmd.name();
        let phase = self.phase;
        let invalid = || TrackerError::InvalidPhase { command: name, phase };

        match cmd {
            Command::Start { address } => {
                if phase.is_active() {
                    log::warn!("{}", invalid());
                } else {
                    self.start(address).await;
                }
            }
            Command::Pause => {
                if phase == SessionPhase::Running {
                    self.pause().await;
                } else {
                    log::warn!("{}", invalid());
                }
            }
            Command::Resume => {
                if phase == SessionPhase::Paused {
                    self.resume().await;
                } else {
                    log::warn!("{}", invalid());
                }
            }
            Command::Stop => {
                if phase.is_active() {
                    self.drain_pending();
                    log::info!("Session stopped, run discarded");
                    self.teardown().await;
                    self.run = None;
                    self.publish();
                } else {
                    log::warn!("{}", invalid());
                }
            }
            Command::Finish { reply } => {
                let result = if phase.is_active() {
                    self.finish().await
                } else {
                    let err = invalid();
                    log::warn!("{}", err);
                    Err(err)
                };
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Command::RetrySave { reply } => {
                let result = self.retry_save().await;
                let _ = reply.send(result);
            }
            // Intercepted by the event loop.
            Command::Shutdown { .. } => {}
        }
    }

    async fn start(&mut self, address: Option<String>) {
        let id = self.store.generate_id();
        let start_time = start_time_at(&Local::now());
        log::info!("Session {} started at {}", id, start_time);

        self.run = Some(RunAccumulator::new(id, start_time));
        self.current_bpm = None;
        self.sensor_connected = false;
        self.last_error = None;
        self.sensor_address = match address {
            Some(a) => Some(a).filter(|a| !a.trim().is_empty()),
            None => self.config.heart_rate.sensor_address.clone(),
        };
        self.phase = SessionPhase::Running;

        self.activate_sources().await;
        self.presence
            .session_started(&LiveStatus::from_snapshot(&self.snapshot()));
        self.publish();
    }

    async fn pause(&mut self) {
        self.drain_pending();
        self.phase = SessionPhase::Paused;
        self.deactivate_sources().await;
        log::info!("Session paused");
        self.publish();
    }

    async fn resume(&mut self) {
        self.phase = SessionPhase::Running;
        self.activate_sources().await;
        log::info!("Session resumed");
        self.publish();
    }

    async fn finish(&mut self) -> Result<String, TrackerError> {
        self.drain_pending();
        let Some(record) = self.run.as_ref().map(RunAccumulator::to_record) else {
            return Err(TrackerError::NothingToSave);
        };
        let id = record.id.clone();

        // Sources stay up until the store has answered.
        let result = match self.save(record).await {
            Ok(()) => {
                log::info!("Session {} finished and saved", id);
                Ok(id)
            }
            Err((record, e)) => {
                log::error!("Failed to save run {}: {}", id, e);
                self.last_error = Some(e.to_string());
                self.unsaved.push(record);
                Err(TrackerError::Storage(e))
            }
        };

        self.teardown().await;
        self.publish();
        result
    }

    async fn retry_save(&mut self) -> Result<Vec<String>, TrackerError> {
        if self.unsaved.is_empty() {
            return Err(TrackerError::NothingToSave);
        }

        let mut saved = Vec::new();
        let mut failure = None;
        for record in std::mem::take(&mut self.unsaved) {
            if failure.is_some() {
                self.unsaved.push(record);
                continue;
            }
            let id = record.id.clone();
            match self.save(record).await {
                Ok(()) => {
                    log::info!("Saved previously unsaved run {}", id);
                    saved.push(id);
                }
                Err((record, e)) => {
                    log::error!("Retrying save of run {} failed: {}", id, e);
                    self.unsaved.push(record);
                    failure = Some(e);
                }
            }
        }

        let result = match failure {
            Some(e) => {
                self.last_error = Some(e.to_string());
                Err(TrackerError::Storage(e))
            }
            None => {
                self.last_error = None;
                Ok(saved)
            }
        };
        self.publish();
        result
    }

    /// Write a record on the blocking pool. On failure the record comes back.
    async fn save(&self, record: RunRecord) -> Result<(), (RunRecord, StorageError)> {
        let store = Arc::clone(&self.store);
        let record = Arc::new(record);
        let pending = Arc::clone(&record);
        let result = tokio::task::spawn_blocking(move || store.save(&pending))
            .await
            .unwrap_or_else(|e| Err(StorageError::IoError(format!("save task failed: {}", e))));
        result.map_err(|e| {
            let record = Arc::try_unwrap(record).unwrap_or_else(|shared| (*shared).clone());
            (record, e)
        })
    }

    /// Deactivate both sources and leave the active phase.
    async fn teardown(&mut self) {
        self.phase = SessionPhase::Stopped;
        self.deactivate_sources().await;
        self.presence.session_ended();
    }

    /// Apply fixes and heart-rate events that arrived while Running but are
    /// still queued behind a command. Deactivating the sources would drop them.
    fn drain_pending(&mut self) {
        if self.phase != SessionPhase::Running {
            return;
        }
        while let Some(fix) = self.fuser.try_recv() {
            self.on_fix(fix);
        }
        while let Some(event) = self.hr.try_recv() {
            self.on_heart_rate(event);
        }
    }

    async fn activate_sources(&mut self) {
        if let Err(e) = self.fuser.activate() {
            // The run goes on without distance or speed.
            self.last_error = Some(e.to_string());
        }

        let Some(address) = self.sensor_address.clone() else {
            return;
        };
        if let Err(e) = self.hr.connect(&address).await {
            log::warn!("Heart-rate sensor {} not connected: {}", address, e);
            self.sensor_connected = false;
            self.current_bpm = None;
            self.last_error = Some(e.to_string());
        }
    }

    async fn deactivate_sources(&mut self) {
        self.fuser.deactivate();
        self.hr.disconnect().await;
    }

    async fn shutdown(&mut self) {
        if self.phase.is_active() {
            log::warn!("Controller shutting down during an active session, run discarded");
            self.teardown().await;
            self.run = None;
        }

        if !self.unsaved.is_empty() {
            if let Err(e) = self.retry_save().await {
                log::error!(
                    "{} finished run(s) could not be saved before shutdown: {}",
                    self.unsaved.len(),
                    e
                );
            }
        }
        self.publish();
        log::debug!("Session controller stopped");
    }

    fn on_tick(&mut self) {
        if self.phase != SessionPhase::Running {
            return;
        }
        if let Some(run) = self.run.as_mut() {
            run.tick();
            self.publish();
        }
    }

    fn on_fix(&mut self, stamped: StampedFix) {
        if self.phase != SessionPhase::Running {
            log::debug!("Dropping fix received while {}", self.phase);
            return;
        }
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let delta = run.apply_fix(&stamped.fix, stamped.received_at_ms);
        log::debug!(
            "Fix {:.6},{:.6}: +{:.1} m, total {:.1} m",
            stamped.fix.position.latitude,
            stamped.fix.position.longitude,
            delta,
            run.distance_m()
        );
        self.publish();
    }

    fn on_heart_rate(&mut self, event: HrEvent) {
        match event {
            HrEvent::Bpm(bpm) => {
                if self.phase != SessionPhase::Running {
                    return;
                }
                let Some(run) = self.run.as_mut() else {
                    return;
                };
                run.apply_bpm(bpm, now_millis());
                self.current_bpm = Some(bpm);
            }
            HrEvent::ConnectionChanged(connected) => {
                log::info!(
                    "Heart-rate sensor {}",
                    if connected { "connected" } else { "disconnected" }
                );
                self.sensor_connected = connected;
                if !connected {
                    self.current_bpm = None;
                }
            }
        }
        self.publish();
    }

    fn snapshot(&self) -> SessionSnapshot {
        let run = self.run.as_ref();
        SessionSnapshot {
            phase: self.phase,
            running: self.phase == SessionPhase::Running,
            paused: self.phase == SessionPhase::Paused,
            sensor_connected: self.sensor_connected,
            sensor_address: self.sensor_address.clone(),
            current_bpm: self.current_bpm,
            distance_m: run.map(RunAccumulator::distance_m).unwrap_or(0.0),
            elapsed_secs: run.map(RunAccumulator::elapsed_secs).unwrap_or(0),
            route: run.map(|r| r.route().to_vec()).unwrap_or_default(),
            run_id: run.map(|r| r.id().to_string()),
            start_time: run.map(|r| r.start_time().to_string()),
            unsaved_run_ids: self.unsaved.iter().map(|r| r.id.clone()).collect(),
            last_error: self.last_error.clone(),
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        if snapshot.phase.is_active() {
            self.presence.update(&LiveStatus::from_snapshot(&snapshot));
        }
        self.snapshot_tx.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::simulated::SimGattCentral;
    use crate::location::SimulatedLocationSource;
    use crate::storage::InMemoryRunStore;
    use std::time::Duration;

    fn spawn() -> (SessionHandle, Arc<SimulatedLocationSource>, Arc<InMemoryRunStore>) {
        let store = Arc::new(InMemoryRunStore::new());
        let location = SimulatedLocationSource::new();
        let handle = SessionController::new(
            TrackerConfig::default(),
            store.clone(),
            location.clone(),
            SimGattCentral::new(),
        )
        .spawn();
        (handle, location, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_commands_are_harmless() {
        let (handle, _location, store) = spawn();

        handle.pause().await.unwrap();
        handle.resume().await.unwrap();
        handle.stop().await.unwrap();
        assert!(matches!(
            handle.finish_and_wait().await,
            Err(TrackerError::InvalidPhase { command: "Finish", phase: SessionPhase::Idle })
        ));
        assert_eq!(handle.snapshot().phase, SessionPhase::Idle);

        handle.start(None).await.unwrap();
        handle.start(None).await.unwrap();
        handle.resume().await.unwrap();
        let snapshot = handle.wait_for(|s| s.running).await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Running);

        handle.stop().await.unwrap();
        handle.wait_for(|s| s.phase == SessionPhase::Stopped).await.unwrap();
        assert!(store.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_counts_only_while_running() {
        let (handle, _location, _store) = spawn();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        handle.start(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(handle.snapshot().elapsed_secs, 3);

        handle.pause().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.snapshot().elapsed_secs, 3);

        handle.resume().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(handle.snapshot().elapsed_secs, 5);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_run() {
        let (handle, location, store) = spawn();

        handle.start(None).await.unwrap();
        handle.wait_for(|s| s.running).await.unwrap();
        location.push(crate::types::PositionFix::new(0.0, 0.0));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await.unwrap();

        let snapshot = handle.wait_for(|s| s.phase == SessionPhase::Stopped).await.unwrap();
        assert!(snapshot.run_id.is_none());
        assert!(snapshot.route.is_empty());
        assert!(!location.is_subscribed());
        assert!(store.is_empty());
        handle.shutdown().await;
    }
}
