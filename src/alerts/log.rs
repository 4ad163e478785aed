//! Persistent alert log: the last `ALERT_LOG_CAPACITY` records, oldest first,
//! stored as one JSON array under `ALERT_LOG_KEY`.
//!
//! Storage problems never reach callers. A failed write is logged and dropped;
//! a missing or unreadable document reads as an empty log.

use super::store::KeyValueStore;
use super::{AlertKind, AlertRecord};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub const ALERT_LOG_KEY: &str = "atm_alerts";
pub const ALERT_LOG_CAPACITY: usize = 100;

pub struct AlertLog {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
    // Serializes read-modify-write in `append` across tasks.
    write_lock: Mutex<()>,
}

impl AlertLog {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_capacity(store, ALERT_LOG_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert at the tail, drop from the head past capacity, persist the whole sequence.
    pub fn append(&self, record: AlertRecord) {
        let _guard = match self.write_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut records = self.all();
        records.push(record);
        if records.len() > self.capacity {
            let excess = records.len() - self.capacity;
            records.drain(..excess);
        }

        let json = match serde_json::to_string(&records) {
            Ok(j) => j,
            Err(e) => {
                warn!("Alerts: failed to serialize alert log: {}", e);
                return;
            }
        };
        // Inline blocking write: one document of at most `capacity` small records.
        if let Err(e) = self.store.set(ALERT_LOG_KEY, &json) {
            warn!("Alerts: failed to persist alert log: {}", e);
            return;
        }
        debug!("Alerts: alert log now holds {} records", records.len());
    }

    /// Full history, oldest first.
    pub fn all(&self) -> Vec<AlertRecord> {
        let raw = match self.store.get(ALERT_LOG_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Alerts: failed to read alert log: {}", e);
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<AlertRecord>>(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!("Alerts: stored alert log is unreadable, treating as empty: {}", e);
                Vec::new()
            }
        }
    }

    pub fn by_kind(&self, kind: AlertKind) -> Vec<AlertRecord> {
        self.all().into_iter().filter(|r| r.kind() == kind).collect()
    }

    pub fn len(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let _guard = match self.write_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = self.store.remove(ALERT_LOG_KEY) {
            warn!("Alerts: failed to clear alert log: {}", e);
        }
    }
}
