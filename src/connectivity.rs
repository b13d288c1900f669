//! Network reachability signal.
//!
//! `ConnectivityObserver` abstracts "are we online" plus a stream of
//! transitions. `ConnectivitySignal` is the push-based implementation the
//! host runtime (or a test) drives directly; `HealthProbe` drives one by
//! polling the order server's health endpoint.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::HttpOrderApi;

pub trait ConnectivityObserver: Send + Sync + 'static {
    fn is_online(&self) -> bool;

    /// Receiver that changes only on online/offline transitions.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

#[derive(Clone)]
pub struct ConnectivitySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx: Arc::new(tx) }
    }

    /// Publish the current state. Returns `true` when this was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }
}

impl ConnectivityObserver for ConnectivitySignal {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Polls `HEAD /api/health` and publishes the result into a signal.
pub struct HealthProbe {
    api: HttpOrderApi,
    interval: Duration,
    signal: ConnectivitySignal,
}

impl HealthProbe {
    /// Starts offline until the first probe answers.
    pub fn new(api: HttpOrderApi, interval: Duration) -> Self {
        Self {
            api,
            interval,
            signal: ConnectivitySignal::new(false),
        }
    }

    pub fn signal(&self) -> ConnectivitySignal {
        self.signal.clone()
    }

    /// Probe once and publish the result.
    pub async fn probe_once(&self) -> bool {
        let online = self.api.check_health().await;
        self.signal.set_online(online);
        online
    }

    /// Probe on every tick until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Health probe stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.probe_once().await;
                    }
                }
            }
        })
    }
}

impl ConnectivityObserver for HealthProbe {
    fn is_online(&self) -> bool {
        self.signal.is_online()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }
}
