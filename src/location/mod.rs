//! Location Fuser
//!
//! Wraps a platform position subscription. The fuser holds at most one
//! subscription at a time and stamps each fix with its arrival time; the
//! session controller turns the stamped fixes into distance and speed.

pub mod simulated;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::config::LocationPolicy;
use crate::types::{now_millis, PositionFix};

pub use simulated::{ReplayLocationSource, SimulatedLocationSource};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location permission not granted")]
    PermissionDenied,

    #[error("Location provider unavailable: {0}")]
    Unavailable(String),
}

/// A platform position provider.
///
/// Each successful `subscribe` opens a fresh stream. Dropping the receiver
/// ends the subscription; the source must stop delivering into it.
pub trait LocationSource: Send + Sync {
    fn subscribe(&self, policy: &LocationPolicy) -> Result<mpsc::Receiver<PositionFix>, LocationError>;
}

/// A fix together with the wall-clock time it reached the fuser.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedFix {
    pub fix: PositionFix,
    pub received_at_ms: i64,
}

pub struct LocationFuser {
    source: Arc<dyn LocationSource>,
    policy: LocationPolicy,
    subscription: Option<mpsc::Receiver<PositionFix>>,
}

impl LocationFuser {
    pub fn new(source: Arc<dyn LocationSource>, policy: LocationPolicy) -> Self {
        Self {
            source,
            policy,
            subscription: None,
        }
    }

    pub fn policy(&self) -> &LocationPolicy {
        &self.policy
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    /// Open the position subscription. Already active is fine.
    pub fn activate(&mut self) -> Result<(), LocationError> {
        if self.subscription.is_some() {
            return Ok(());
        }
        match self.source.subscribe(&self.policy) {
            Ok(rx) => {
                log::debug!(
                    "Location updates requested every {:?} (min {:?}, {:?})",
                    self.policy.interval(),
                    self.policy.min_interval(),
                    self.policy.accuracy
                );
                self.subscription = Some(rx);
                Ok(())
            }
            Err(e) => {
                log::warn!("Location updates refused: {}", e);
                Err(e)
            }
        }
    }

    /// Drop the subscription. Anything still queued in it is discarded.
    pub fn deactivate(&mut self) {
        if self.subscription.take().is_some() {
            log::debug!("Location updates stopped");
        }
    }

    /// Next fix in arrival order.
    ///
    /// Pends forever while inactive. Returns `None` once if the source ends
    /// the stream on its own, after which the fuser is inactive.
    pub async fn recv(&mut self) -> Option<StampedFix> {
        let Some(rx) = self.subscription.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Some(fix) => Some(StampedFix {
                fix,
                received_at_ms: now_millis(),
            }),
            None => {
                log::warn!("Location source closed the subscription");
                self.subscription = None;
                None
            }
        }
    }

    /// A fix that has already arrived, without waiting for one.
    pub fn try_recv(&mut self) -> Option<StampedFix> {
        let rx = self.subscription.as_mut()?;
        match rx.try_recv() {
            Ok(fix) => Some(StampedFix {
                fix,
                received_at_ms: now_millis(),
            }),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::warn!("Location source closed the subscription");
                self.subscription = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fixes_in_arrival_order() {
        let source = SimulatedLocationSource::new();
        let mut fuser = LocationFuser::new(source.clone(), LocationPolicy::default());

        assert!(!source.push(PositionFix::new(1.0, 1.0)));
        fuser.activate().unwrap();
        assert!(source.push(PositionFix::new(1.0, 1.0)));
        assert!(source.push(PositionFix::new(2.0, 2.0)));

        assert_eq!(fuser.recv().await.unwrap().fix.position.latitude, 1.0);
        assert_eq!(fuser.recv().await.unwrap().fix.position.latitude, 2.0);
    }

    #[tokio::test]
    async fn test_activate_is_idempotent() {
        let source = SimulatedLocationSource::new();
        let mut fuser = LocationFuser::new(source.clone(), LocationPolicy::default());

        fuser.activate().unwrap();
        fuser.activate().unwrap();
        assert_eq!(source.subscription_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_carry_over_between_subscriptions() {
        let source = SimulatedLocationSource::new();
        let mut fuser = LocationFuser::new(source.clone(), LocationPolicy::default());

        fuser.activate().unwrap();
        source.push(PositionFix::new(1.0, 1.0));
        fuser.deactivate();
        fuser.deactivate();
        assert!(!source.is_subscribed());

        fuser.activate().unwrap();
        source.push(PositionFix::new(3.0, 3.0));
        assert_eq!(fuser.recv().await.unwrap().fix.position.latitude, 3.0);

        fuser.deactivate();
        let idle = tokio::time::timeout(Duration::from_secs(5), fuser.recv()).await;
        assert!(idle.is_err());
    }

    #[tokio::test]
    async fn test_try_recv_takes_only_queued_fixes() {
        let source = SimulatedLocationSource::new();
        let mut fuser = LocationFuser::new(source.clone(), LocationPolicy::default());

        assert!(fuser.try_recv().is_none());
        fuser.activate().unwrap();
        assert!(fuser.try_recv().is_none());

        source.push(PositionFix::new(4.0, 4.0));
        assert_eq!(fuser.try_recv().unwrap().fix.position.latitude, 4.0);
        assert!(fuser.try_recv().is_none());
        assert!(fuser.is_active());
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let source = SimulatedLocationSource::new();
        source.set_permission(false);
        let mut fuser = LocationFuser::new(source.clone(), LocationPolicy::default());

        assert_eq!(fuser.activate(), Err(LocationError::PermissionDenied));
        assert!(!fuser.is_active());
    }
}
