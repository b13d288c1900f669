//! Storefront-side order service.
//!
//! `OrderClient` is constructed once at startup and handed to whatever needs
//! to place orders. It owns the offline queue, the sync engine and the
//! connectivity monitor; nothing here is global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{OrderApi, SubmitError};
use crate::connectivity::ConnectivityObserver;
use crate::models::{
    OrderSubmission, PendingOrder, SubmitReceipt, SyncOutcome, SyncStatus, ValidationErrors,
};
use crate::queue::{next_local_id, OfflineQueue};
use crate::storage::LocalStore;
use crate::sync::SyncEngine;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("order rejected by server (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("local storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The server persisted the order.
    Submitted(SubmitReceipt),
    /// The order is in the offline queue and will be delivered later.
    SavedOffline { local_id: String },
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Upper bound for one submission attempt.
    pub request_timeout: Duration,
    /// Delay before the first sync after `start()` when orders are pending.
    pub startup_sync_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            startup_sync_delay: Duration::from_millis(2000),
        }
    }
}

// ---------------------------------------------------------------------------
// Connectivity monitor
// ---------------------------------------------------------------------------

/// Single listener bridging connectivity transitions to the sync engine.
pub struct ConnectivityMonitor<A: OrderApi, C: ConnectivityObserver> {
    engine: Arc<SyncEngine<A, C>>,
    connectivity: Arc<C>,
    queue: OfflineQueue,
    startup_sync_delay: Duration,
    started: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl<A: OrderApi, C: ConnectivityObserver> ConnectivityMonitor<A, C> {
    pub fn new(
        engine: Arc<SyncEngine<A, C>>,
        connectivity: Arc<C>,
        queue: OfflineQueue,
        startup_sync_delay: Duration,
    ) -> Self {
        Self {
            engine,
            connectivity,
            queue,
            startup_sync_delay,
            started: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    /// Start listening. Returns `false` if the monitor is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            debug!("Connectivity monitor already running");
            return false;
        }

        let token = CancellationToken::new();
        match self.cancel.lock() {
            Ok(mut slot) => *slot = Some(token.clone()),
            Err(e) => warn!(error = %e, "Connectivity monitor cancel slot poisoned"),
        }

        // Cold start: the server may be booting alongside us, so give it a
        // moment before draining.
        if self.connectivity.is_online() && self.queue.count() > 0 {
            let engine = self.engine.clone();
            let delay = self.startup_sync_delay;
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        info!("Running startup sync");
                        engine.sync_pending_orders().await;
                    }
                }
            });
        }

        let engine = self.engine.clone();
        let mut rx = self.connectivity.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *rx.borrow_and_update();
                        if online {
                            info!("Back online, syncing offline orders");
                            let engine = engine.clone();
                            tokio::spawn(async move {
                                engine.sync_pending_orders().await;
                            });
                        } else {
                            info!("Offline, new orders will be queued");
                        }
                    }
                }
            }
            debug!("Connectivity monitor stopped");
        });

        info!("Connectivity monitor started");
        true
    }

    pub fn stop(&self) {
        let token = match self.cancel.lock() {
            Ok(mut slot) => slot.take(),
            Err(e) => {
                warn!(error = %e, "Connectivity monitor cancel slot poisoned");
                None
            }
        };
        if let Some(token) = token {
            token.cancel();
        }
        self.started.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Order client
// ---------------------------------------------------------------------------

pub struct OrderClient<A: OrderApi, C: ConnectivityObserver> {
    api: Arc<A>,
    connectivity: Arc<C>,
    queue: OfflineQueue,
    engine: Arc<SyncEngine<A, C>>,
    monitor: ConnectivityMonitor<A, C>,
    request_timeout: Duration,
}

impl<A: OrderApi, C: ConnectivityObserver> OrderClient<A, C> {
    pub fn new(
        api: Arc<A>,
        connectivity: Arc<C>,
        store: Arc<LocalStore>,
        options: ClientOptions,
    ) -> Self {
        let queue = OfflineQueue::new(store.clone());
        let engine = Arc::new(SyncEngine::new(
            api.clone(),
            connectivity.clone(),
            queue.clone(),
            store,
            options.request_timeout,
        ));
        let monitor = ConnectivityMonitor::new(
            engine.clone(),
            connectivity.clone(),
            queue.clone(),
            options.startup_sync_delay,
        );
        Self {
            api,
            connectivity,
            queue,
            engine,
            monitor,
            request_timeout: options.request_timeout,
        }
    }

    /// Place an order, falling back to the offline queue when the server
    /// cannot take it right now.
    pub async fn submit_order(
        &self,
        submission: OrderSubmission,
    ) -> Result<SubmitOutcome, ClientError> {
        submission.validate()?;

        if !self.connectivity.is_online() {
            let local_id = self.queue.enqueue(submission).map_err(ClientError::Storage)?;
            info!(%local_id, "Offline, order saved locally");
            return Ok(SubmitOutcome::SavedOffline { local_id });
        }

        let local_id = next_local_id();
        let attempt = tokio::time::timeout(
            self.request_timeout,
            self.api.submit_order(&submission, Some(local_id.as_str())),
        )
        .await
        .unwrap_or(Err(SubmitError::Timeout));

        match attempt {
            Ok(receipt) => {
                info!(order_id = receipt.order_id, "Order submitted");
                Ok(SubmitOutcome::Submitted(receipt))
            }
            Err(SubmitError::Rejected { status, detail }) => {
                warn!(status, %detail, "Order rejected by server");
                Err(ClientError::Rejected { status, detail })
            }
            Err(e) => {
                warn!(error = %e, %local_id, "Direct submission failed, saving offline");
                self.queue
                    .enqueue_as(&local_id, submission)
                    .map_err(ClientError::Storage)?;
                Ok(SubmitOutcome::SavedOffline { local_id })
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.queue.count()
    }

    pub fn pending_orders(&self) -> Vec<PendingOrder> {
        self.queue.list()
    }

    pub fn clear_pending(&self) -> Result<(), ClientError> {
        self.queue.clear().map_err(ClientError::Storage)
    }

    pub async fn sync_now(&self) -> SyncOutcome {
        self.engine.sync_pending_orders().await
    }

    pub fn last_sync_status(&self) -> Option<SyncStatus> {
        self.engine.last_status()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Start the connectivity monitor. Returns `false` if already started.
    pub fn start(&self) -> bool {
        self.monitor.start()
    }

    pub fn stop(&self) {
        self.monitor.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivitySignal;
    use crate::queue::tests::submission;
    use crate::sync::tests::FakeApi;

    fn client(
        api: Arc<FakeApi>,
        online: bool,
        startup_sync_delay: Duration,
    ) -> (OrderClient<FakeApi, ConnectivitySignal>, ConnectivitySignal) {
        let signal = ConnectivitySignal::new(online);
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let client = OrderClient::new(
            api,
            Arc::new(signal.clone()),
            store,
            ClientOptions {
                request_timeout: Duration::from_secs(5),
                startup_sync_delay,
            },
        );
        (client, signal)
    }

    async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_offline_submission_never_touches_network() {
        let api = Arc::new(FakeApi::default());
        let (client, _signal) = client(api.clone(), false, Duration::from_millis(10));

        let outcome = client.submit_order(submission("Ana")).await.unwrap();
        let SubmitOutcome::SavedOffline { local_id } = outcome else {
            panic!("expected offline save");
        };
        assert_eq!(api.call_count(), 0);
        assert_eq!(client.pending_orders()[0].local_id, local_id);
    }

    #[tokio::test]
    async fn test_invalid_submission_is_neither_sent_nor_queued() {
        let api = Arc::new(FakeApi::default());
        let (client, _signal) = client(api.clone(), true, Duration::from_millis(10));
        let mut sub = submission("Ana");
        sub.items.clear();

        let err = client.submit_order(sub).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(ref v) if v.has_field("items")));
        assert_eq!(api.call_count(), 0);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_online_submission_goes_direct() {
        let api = Arc::new(FakeApi::default());
        let (client, _signal) = client(api.clone(), true, Duration::from_millis(10));
        let outcome = client.submit_order(submission("Ana")).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Submitted(_)));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_server_failure_queues_under_sent_key() {
        let api = Arc::new(FakeApi::default());
        api.fail_for("Ana");
        let (client, _signal) = client(api.clone(), true, Duration::from_millis(10));

        let outcome = client.submit_order(submission("Ana")).await.unwrap();
        let SubmitOutcome::SavedOffline { local_id } = outcome else {
            panic!("expected offline save");
        };
        let sent_key = api.keys.lock().unwrap()[0].clone();
        assert_eq!(sent_key.as_deref(), Some(local_id.as_str()));
        assert_eq!(client.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_rejection_is_surfaced_not_queued() {
        let api = Arc::new(FakeApi::default());
        api.reject_for("Ana");
        let (client, _signal) = client(api.clone(), true, Duration::from_millis(10));
        let err = client.submit_order(submission("Ana")).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected { status: 400, .. }));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_going_online_drains_queue() {
        let api = Arc::new(FakeApi::default());
        let (client, signal) = client(api.clone(), false, Duration::from_millis(10));
        client.submit_order(submission("A")).await.unwrap();
        client.submit_order(submission("B")).await.unwrap();
        assert!(client.start());

        signal.set_online(true);
        assert!(wait_for(|| client.pending_count() == 0).await);
        assert_eq!(api.call_count(), 2);
        assert_eq!(client.last_sync_status().unwrap().success_count, 2);
        client.stop();
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let api = Arc::new(FakeApi::default());
        let (client, _signal) = client(api, true, Duration::from_millis(10));
        assert!(client.start());
        assert!(!client.start());
        client.stop();
        assert!(client.start());
        client.stop();
    }

    #[tokio::test]
    async fn test_startup_sync_runs_after_delay() {
        let api = Arc::new(FakeApi::default());
        let (client, signal) = client(api.clone(), false, Duration::from_millis(50));
        client.submit_order(submission("A")).await.unwrap();
        // Online before start: the monitor sees no transition, only the
        // delayed startup sync can drain the queue.
        signal.set_online(true);
        client.start();

        assert_eq!(api.call_count(), 0);
        assert!(wait_for(|| client.pending_count() == 0).await);
        assert_eq!(api.call_count(), 1);
        client.stop();
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_startup_sync() {
        let api = Arc::new(FakeApi::default());
        let (client, signal) = client(api.clone(), false, Duration::from_millis(100));
        client.submit_order(submission("A")).await.unwrap();
        signal.set_online(true);
        client.start();
        client.stop();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(api.call_count(), 0);
        assert_eq!(client.pending_count(), 1);
    }
}
