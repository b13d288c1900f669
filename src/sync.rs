//! Offline queue drain.
//!
//! `SyncEngine` posts every queued order to the order server, oldest first,
//! and removes an entry only after the server acknowledged it. A failing
//! entry stays queued and the cycle moves on to the next one. Only one cycle
//! runs at a time; a trigger that arrives mid-cycle is ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::api::{OrderApi, SubmitError};
use crate::connectivity::ConnectivityObserver;
use crate::models::{SyncItemError, SyncOutcome, SyncReport, SyncStatus};
use crate::queue::OfflineQueue;
use crate::storage::{LocalStore, KEY_SYNC_STATUS, OFFLINE_CATEGORY};

pub const MSG_NO_CONNECTION: &str = "no connection";
pub const MSG_IN_PROGRESS: &str = "sync already in progress";
pub const MSG_NOTHING_PENDING: &str = "no pending orders";

/// Clears the in-progress flag when a cycle ends, including on panic.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncEngine<A: OrderApi, C: ConnectivityObserver> {
    api: Arc<A>,
    connectivity: Arc<C>,
    queue: OfflineQueue,
    store: Arc<LocalStore>,
    attempt_timeout: Duration,
    in_progress: AtomicBool,
}

impl<A: OrderApi, C: ConnectivityObserver> SyncEngine<A, C> {
    pub fn new(
        api: Arc<A>,
        connectivity: Arc<C>,
        queue: OfflineQueue,
        store: Arc<LocalStore>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            api,
            connectivity,
            queue,
            store,
            attempt_timeout,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Drain the queue once.
    pub async fn sync_pending_orders(&self) -> SyncOutcome {
        if !self.connectivity.is_online() {
            debug!("Sync skipped: offline");
            return SyncOutcome {
                success: false,
                message: MSG_NO_CONNECTION.into(),
                results: None,
            };
        }

        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            debug!("Sync trigger ignored: cycle already running");
            return SyncOutcome {
                success: false,
                message: MSG_IN_PROGRESS.into(),
                results: None,
            };
        }
        let _guard = CycleGuard(&self.in_progress);

        let snapshot = self.queue.list();
        if snapshot.is_empty() {
            return SyncOutcome {
                success: true,
                message: MSG_NOTHING_PENDING.into(),
                results: Some(SyncReport::default()),
            };
        }

        info!(pending = snapshot.len(), "Syncing offline orders");
        let mut report = SyncReport {
            total: snapshot.len(),
            ..SyncReport::default()
        };

        for pending in &snapshot {
            let attempt = tokio::time::timeout(
                self.attempt_timeout,
                self.api
                    .submit_order(&pending.payload, Some(pending.local_id.as_str())),
            )
            .await
            .unwrap_or(Err(SubmitError::Timeout));

            match attempt {
                Ok(receipt) => {
                    report.success += 1;
                    info!(
                        local_id = %pending.local_id,
                        order_id = receipt.order_id,
                        deduplicated = receipt.deduplicated,
                        "Offline order delivered"
                    );
                    // The server already holds the order. A failed dequeue only
                    // means a replay next cycle, which the idempotency key absorbs.
                    if let Err(e) = self.queue.dequeue(&pending.local_id) {
                        warn!(local_id = %pending.local_id, error = %e, "Failed to dequeue delivered order");
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        local_id = %pending.local_id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Offline order delivery failed"
                    );
                    let details = match &e {
                        SubmitError::Rejected { detail, .. } | SubmitError::Server { detail, .. } => {
                            Some(detail.clone())
                        }
                        _ => None,
                    };
                    report.errors.push(SyncItemError {
                        local_id: pending.local_id.clone(),
                        error: e.to_string(),
                        details,
                    });
                }
            }
        }

        self.save_status(&report);
        info!(
            total = report.total,
            success = report.success,
            failed = report.failed,
            "Sync cycle finished"
        );

        SyncOutcome {
            success: true,
            message: format!("synced {} of {} orders", report.success, report.total),
            results: Some(report),
        }
    }

    /// Status of the last drained cycle, if one was recorded and is readable.
    pub fn last_status(&self) -> Option<SyncStatus> {
        let raw = self.store.get_json(OFFLINE_CATEGORY, KEY_SYNC_STATUS).ok()?;
        if raw.is_null() {
            return None;
        }
        serde_json::from_value(raw).ok()
    }

    fn save_status(&self, report: &SyncReport) {
        let status = SyncStatus {
            last_sync_at: Utc::now(),
            total: report.total,
            success_count: report.success,
            failure_count: report.failed,
            errors: report.errors.clone(),
        };
        let saved = serde_json::to_value(&status)
            .map_err(|e| e.to_string())
            .and_then(|v| self.store.set_json(OFFLINE_CATEGORY, KEY_SYNC_STATUS, &v));
        if let Err(e) = saved {
            warn!(error = %e, "Failed to persist sync status");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::connectivity::ConnectivitySignal;
    use crate::models::{OrderSubmission, SubmitReceipt};
    use crate::queue::tests::submission;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Scripted order server.
    #[derive(Default)]
    pub(crate) struct FakeApi {
        pub calls: AtomicUsize,
        pub keys: Mutex<Vec<Option<String>>>,
        /// Customer names the server answers with a 500.
        pub failing: Mutex<HashSet<String>>,
        /// Customer names the server answers with a 400.
        pub rejecting: Mutex<HashSet<String>>,
        pub delay: Option<Duration>,
    }

    impl FakeApi {
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn fail_for(&self, name: &str) {
            self.failing.lock().unwrap().insert(name.to_string());
        }

        pub fn reject_for(&self, name: &str) {
            self.rejecting.lock().unwrap().insert(name.to_string());
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl OrderApi for FakeApi {
        async fn submit_order(
            &self,
            submission: &OrderSubmission,
            idempotency_key: Option<&str>,
        ) -> Result<SubmitReceipt, SubmitError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            self.keys
                .lock()
                .unwrap()
                .push(idempotency_key.map(str::to_string));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let name = submission.customer.name.clone();
            if self.rejecting.lock().unwrap().contains(&name) {
                return Err(SubmitError::Rejected {
                    status: 400,
                    detail: "items: order must have at least one item".into(),
                });
            }
            if self.failing.lock().unwrap().contains(&name) {
                return Err(SubmitError::Server {
                    status: 500,
                    detail: "internal error".into(),
                });
            }
            Ok(SubmitReceipt {
                order_id: n,
                total_amount: 80.0,
                deduplicated: false,
            })
        }
    }

    pub(crate) fn engine(
        api: Arc<FakeApi>,
        online: bool,
        attempt_timeout: Duration,
    ) -> (SyncEngine<FakeApi, ConnectivitySignal>, OfflineQueue) {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let queue = OfflineQueue::new(store.clone());
        let signal = Arc::new(ConnectivitySignal::new(online));
        let engine = SyncEngine::new(api, signal, queue.clone(), store, attempt_timeout);
        (engine, queue)
    }

    #[tokio::test]
    async fn test_offline_sync_leaves_queue_untouched() {
        let api = Arc::new(FakeApi::default());
        let (engine, queue) = engine(api.clone(), false, Duration::from_secs(5));
        queue.enqueue(submission("A")).unwrap();

        let outcome = engine.sync_pending_orders().await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, MSG_NO_CONNECTION);
        assert_eq!(queue.count(), 1);
        assert_eq!(api.call_count(), 0);
        assert!(engine.last_status().is_none());
    }

    #[tokio::test]
    async fn test_empty_queue_is_trivial_success() {
        let api = Arc::new(FakeApi::default());
        let (engine, _queue) = engine(api.clone(), true, Duration::from_secs(5));
        let outcome = engine.sync_pending_orders().await;
        assert!(outcome.success);
        assert_eq!(outcome.results.unwrap().total, 0);
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_rest() {
        let api = Arc::new(FakeApi::default());
        api.fail_for("B");
        let (engine, queue) = engine(api.clone(), true, Duration::from_secs(5));
        queue.enqueue(submission("A")).unwrap();
        let b = queue.enqueue(submission("B")).unwrap();
        queue.enqueue(submission("C")).unwrap();

        let outcome = engine.sync_pending_orders().await;
        let report = outcome.results.expect("results");
        assert_eq!((report.total, report.success, report.failed), (3, 2, 1));
        assert_eq!(report.errors[0].local_id, b);
        assert_eq!(report.errors[0].details.as_deref(), Some("internal error"));

        let remaining: Vec<String> = queue.list().into_iter().map(|p| p.local_id).collect();
        assert_eq!(remaining, vec![b]);

        let status = engine.last_status().expect("status persisted");
        assert_eq!((status.success_count, status.failure_count), (2, 1));
    }

    #[tokio::test]
    async fn test_local_id_is_sent_as_idempotency_key() {
        let api = Arc::new(FakeApi::default());
        let (engine, queue) = engine(api.clone(), true, Duration::from_secs(5));
        let id = queue.enqueue(submission("A")).unwrap();
        engine.sync_pending_orders().await;
        assert_eq!(*api.keys.lock().unwrap(), vec![Some(id)]);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_do_not_double_submit() {
        let api = Arc::new(FakeApi::with_delay(Duration::from_millis(50)));
        let (engine, queue) = engine(api.clone(), true, Duration::from_secs(5));
        for name in ["A", "B", "C"] {
            queue.enqueue(submission(name)).unwrap();
        }

        let (first, second) = tokio::join!(engine.sync_pending_orders(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            engine.sync_pending_orders().await
        });

        assert!(first.success);
        assert!(!second.success);
        assert_eq!(second.message, MSG_IN_PROGRESS);
        assert_eq!(api.call_count(), 3);
        assert_eq!(queue.count(), 0);
        assert!(!engine.is_syncing());
    }

    #[tokio::test]
    async fn test_timeout_keeps_order_queued() {
        let api = Arc::new(FakeApi::with_delay(Duration::from_millis(500)));
        let (engine, queue) = engine(api.clone(), true, Duration::from_millis(20));
        queue.enqueue(submission("A")).unwrap();

        let report = engine.sync_pending_orders().await.results.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors[0].error, SubmitError::Timeout.to_string());
        assert_eq!(queue.count(), 1);
    }

    #[tokio::test]
    async fn test_status_is_overwritten_each_cycle() {
        let api = Arc::new(FakeApi::default());
        api.fail_for("A");
        let (engine, queue) = engine(api.clone(), true, Duration::from_secs(5));
        queue.enqueue(submission("A")).unwrap();
        engine.sync_pending_orders().await;
        assert_eq!(engine.last_status().unwrap().failure_count, 1);

        api.failing.lock().unwrap().clear();
        engine.sync_pending_orders().await;
        let status = engine.last_status().unwrap();
        assert_eq!((status.success_count, status.failure_count), (1, 0));
        assert!(status.errors.is_empty());
    }
}
