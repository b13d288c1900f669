//! Durable offline order queue.
//!
//! The whole queue is a single JSON array in the local store. Every mutation
//! reads the full list and writes it back under `write_lock`, so concurrent
//! tasks never interleave their read-modify-write cycles.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::{OrderSubmission, PendingOrder};
use crate::storage::{LocalStore, KEY_PENDING_ORDERS, OFFLINE_CATEGORY};

const LOCAL_ID_PREFIX: &str = "offline_";
const LOCAL_ID_SUFFIX_LEN: usize = 9;

/// Generate `offline_<unix-millis>_<9 random chars>`.
pub fn next_local_id() -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(LOCAL_ID_SUFFIX_LEN)
        .collect();
    format!(
        "{LOCAL_ID_PREFIX}{}_{suffix}",
        Utc::now().timestamp_millis()
    )
}

#[derive(Clone)]
pub struct OfflineQueue {
    store: Arc<LocalStore>,
    write_lock: Arc<Mutex<()>>,
}

impl OfflineQueue {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Append `payload` under a fresh local id and return the id.
    pub fn enqueue(&self, payload: OrderSubmission) -> Result<String, String> {
        let local_id = next_local_id();
        self.enqueue_as(&local_id, payload)?;
        Ok(local_id)
    }

    /// Append `payload` under a caller-chosen id.
    ///
    /// Used when a direct submission fails and the order must keep the
    /// idempotency key it was already sent with.
    pub fn enqueue_as(&self, local_id: &str, payload: OrderSubmission) -> Result<(), String> {
        let _guard = self.write_lock.lock().map_err(|e| e.to_string())?;
        let mut entries = self.read_entries();
        entries.push(PendingOrder {
            local_id: local_id.to_string(),
            payload,
            enqueued_at: Utc::now(),
        });
        self.write_entries(&entries)?;
        info!(local_id, pending = entries.len(), "Order saved to offline queue");
        Ok(())
    }

    /// Remove the entry with `local_id`. Returns whether anything was removed.
    pub fn dequeue(&self, local_id: &str) -> Result<bool, String> {
        let _guard = self.write_lock.lock().map_err(|e| e.to_string())?;
        let mut entries = self.read_entries();
        let before = entries.len();
        entries.retain(|e| e.local_id != local_id);
        if entries.len() == before {
            debug!(local_id, "Dequeue of unknown local id ignored");
            return Ok(false);
        }
        self.write_entries(&entries)?;
        Ok(true)
    }

    /// Pending orders, oldest first.
    pub fn list(&self) -> Vec<PendingOrder> {
        self.read_entries()
    }

    pub fn count(&self) -> usize {
        self.read_entries().len()
    }

    /// Drop every pending order.
    pub fn clear(&self) -> Result<(), String> {
        let _guard = self.write_lock.lock().map_err(|e| e.to_string())?;
        self.store.remove(OFFLINE_CATEGORY, KEY_PENDING_ORDERS)?;
        info!("Offline queue cleared");
        Ok(())
    }

    fn read_entries(&self) -> Vec<PendingOrder> {
        let raw = match self.store.get_json(OFFLINE_CATEGORY, KEY_PENDING_ORDERS) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Offline queue unreadable, treating as empty");
                return Vec::new();
            }
        };
        let Value::Array(items) = raw else {
            return Vec::new();
        };
        items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<PendingOrder>(item) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed offline queue entry");
                    None
                }
            })
            .collect()
    }

    fn write_entries(&self, entries: &[PendingOrder]) -> Result<(), String> {
        let value = serde_json::to_value(entries).map_err(|e| format!("serialize queue: {e}"))?;
        self.store
            .set_json(OFFLINE_CATEGORY, KEY_PENDING_ORDERS, &value)
    }
}
