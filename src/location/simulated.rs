//! Location sources that need no GPS hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::{LocationError, LocationSource};
use crate::config::LocationPolicy;
use crate::types::PositionFix;

const FIX_BUFFER: usize = 64;

/// A source fed by hand: whatever is pushed goes to the current subscriber.
pub struct SimulatedLocationSource {
    subscriber: Mutex<Option<mpsc::Sender<PositionFix>>>,
    permitted: AtomicBool,
    subscriptions: AtomicUsize,
}

impl SimulatedLocationSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscriber: Mutex::new(None),
            permitted: AtomicBool::new(true),
            subscriptions: AtomicUsize::new(0),
        })
    }

    pub fn set_permission(&self, granted: bool) {
        self.permitted.store(granted, Ordering::SeqCst);
    }

    /// Deliver a fix. Returns `false` when nobody is subscribed, in which case
    /// the fix is lost like one the platform computed with no listener.
    pub fn push(&self, fix: PositionFix) -> bool {
        let guard = self.subscriber.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.try_send(fix).is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscriber
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// How many subscriptions have been opened so far.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

impl LocationSource for SimulatedLocationSource {
    fn subscribe(&self, _policy: &LocationPolicy) -> Result<mpsc::Receiver<PositionFix>, LocationError> {
        if !self.permitted.load(Ordering::SeqCst) {
            return Err(LocationError::PermissionDenied);
        }
        let (tx, rx) = mpsc::channel(FIX_BUFFER);
        *self.subscriber.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }
}

/// Replays a recorded route, one fix per policy interval.
///
/// Every subscription starts again from the first fix. The stream ends after
/// the last fix unless `looping` is set.
pub struct ReplayLocationSource {
    route: Arc<Vec<PositionFix>>,
    looping: bool,
}

impl ReplayLocationSource {
    pub fn new(route: Vec<PositionFix>) -> Self {
        Self {
            route: Arc::new(route),
            looping: false,
        }
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

impl LocationSource for ReplayLocationSource {
    fn subscribe(&self, policy: &LocationPolicy) -> Result<mpsc::Receiver<PositionFix>, LocationError> {
        if self.route.is_empty() {
            return Err(LocationError::Unavailable("empty route".to_string()));
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| LocationError::Unavailable(e.to_string()))?;

        let (tx, rx) = mpsc::channel(FIX_BUFFER);
        let route = Arc::clone(&self.route);
        let looping = self.looping;
        let interval = policy.interval();

        handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; fixes start one interval in.
            ticker.tick().await;
            loop {
                for fix in route.iter() {
                    ticker.tick().await;
                    if tx.send(*fix).await.is_err() {
                        return;
                    }
                }
                if !looping {
                    return;
                }
            }
        });
        Ok(rx)
    }
}
