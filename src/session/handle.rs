use tokio::sync::{mpsc, oneshot, watch};

use super::{Command, SessionSnapshot};
use crate::error::TrackerError;

/// Cloneable command and observation handle for a running controller.
///
/// The plain commands are fire-and-forget: they return once the command is
/// queued, and an invalid one is logged and ignored by the controller.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub(super) fn new(
        commands: mpsc::Sender<Command>,
        snapshot: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self { commands, snapshot }
    }

    async fn send(&self, cmd: Command) -> Result<(), TrackerError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| TrackerError::ControllerClosed)
    }

    /// Begin a new run. `None` uses the configured sensor, an empty string
    /// records without one.
    pub async fn start(&self, sensor_address: Option<&str>) -> Result<(), TrackerError> {
        self.send(Command::Start {
            address: sensor_address.map(str::to_string),
        })
        .await
    }

    pub async fn pause(&self) -> Result<(), TrackerError> {
        self.send(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<(), TrackerError> {
        self.send(Command::Resume).await
    }

    /// End the run without saving it.
    pub async fn stop(&self) -> Result<(), TrackerError> {
        self.send(Command::Stop).await
    }

    pub async fn finish(&self) -> Result<(), TrackerError> {
        self.send(Command::Finish { reply: None }).await
    }

    /// Finish and wait for the store. Returns the saved run's id.
    ///
    /// When the store fails the run is kept by the controller (see
    /// [`SessionSnapshot::unsaved_run_ids`]) and the session still ends.
    pub async fn finish_and_wait(&self) -> Result<String, TrackerError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Finish { reply: Some(tx) }).await?;
        rx.await.map_err(|_| TrackerError::ControllerClosed)?
    }

    /// Try again to save every run the store refused. Returns the ids saved.
    pub async fn retry_save(&self) -> Result<Vec<String>, TrackerError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::RetrySave { reply: tx }).await?;
        rx.await.map_err(|_| TrackerError::ControllerClosed)?
    }

    /// Stop the controller. An active run is discarded, unsaved runs get one
    /// last save attempt. Returns once the controller task has finished.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver that is notified on every published change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> Result<SessionSnapshot, TrackerError>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| TrackerError::ControllerClosed)?;
        Ok(snapshot.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
