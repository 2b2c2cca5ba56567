//! Hosted database reachability monitoring
//!
//! Probes the remote periodically and emits an event whenever reachability
//! flips. The service runs a reconciliation pass on every `Online` event.

use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info};

use crate::RemoteDatabase;

/// Events emitted by the connectivity monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// Last probe result
#[derive(Debug, Clone, Copy)]
struct CheckResult {
    online: bool,
    checked_at: DateTime<Local>,
}

/// Shared, cheaply cloneable view of the last probe
#[derive(Clone, Default)]
pub struct ConnectivityStatus {
    inner: Arc<RwLock<Option<CheckResult>>>,
}

impl ConnectivityStatus {
    /// False until the first probe succeeds
    pub async fn is_online(&self) -> bool {
        self.inner.read().await.as_ref().is_some_and(|r| r.online)
    }

    pub async fn last_check_time(&self) -> Option<DateTime<Local>> {
        self.inner.read().await.as_ref().map(|r| r.checked_at)
    }

    /// Record a probe result, returning the transition if there was one
    async fn update(&self, online: bool) -> Option<ConnectivityEvent> {
        let mut status = self.inner.write().await;
        let previous = status.as_ref().map(|r| r.online);

        *status = Some(CheckResult {
            online,
            checked_at: spadesk_util::now(),
        });

        if previous == Some(online) {
            return None;
        }

        // The first probe only reports going offline; starting online is
        // not a reconnect
        if previous.is_none() && online {
            return None;
        }

        Some(if online {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        })
    }
}

/// Periodically probes the hosted database
pub struct ConnectivityMonitor {
    db: Arc<dyn RemoteDatabase>,
    interval: Duration,
    status: ConnectivityStatus,
    event_tx: mpsc::Sender<ConnectivityEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectivityMonitor {
    pub fn new(
        db: Arc<dyn RemoteDatabase>,
        interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, mpsc::Receiver<ConnectivityEvent>) {
        let (event_tx, event_rx) = mpsc::channel(32);

        let monitor = Self {
            db,
            interval,
            status: ConnectivityStatus::default(),
            event_tx,
            shutdown_rx,
        };

        (monitor, event_rx)
    }

    pub fn status(&self) -> ConnectivityStatus {
        self.status.clone()
    }

    /// Probe once and emit an event on a transition
    pub async fn check_now(&self) -> bool {
        let online = self.db.is_healthy().await;
        debug!(online, "Connectivity probe complete");

        if let Some(event) = self.status.update(online).await {
            info!(online, "Hosted database connectivity changed");
            let _ = self.event_tx.send(event).await;
        }

        online
    }

    /// Run until shutdown
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_now().await;
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        debug!("Connectivity monitor shutting down");
                        break;
                    }
                }
            }
        }

        info!("Connectivity monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockDatabase;

    #[tokio::test]
    async fn emits_transitions_only() {
        let db = Arc::new(MockDatabase::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (monitor, mut events) =
            ConnectivityMonitor::new(db.clone(), Duration::from_secs(60), shutdown_rx);

        // Starting online is not an event
        assert!(monitor.check_now().await);
        assert!(events.try_recv().is_err());
        assert!(monitor.status().is_online().await);

        db.set_offline(true);
        assert!(!monitor.check_now().await);
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Offline);

        // No repeat while still offline
        monitor.check_now().await;
        assert!(events.try_recv().is_err());

        db.set_offline(false);
        monitor.check_now().await;
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Online);
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let db = Arc::new(MockDatabase::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (monitor, _events) =
            ConnectivityMonitor::new(db, Duration::from_millis(10), shutdown_rx);

        let handle = tokio::spawn(monitor.run());
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
