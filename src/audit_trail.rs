//! Append-only audit trail
//!
//! Every append goes to the ordered primary log through a single mutex, which
//! is the source of truth. The same record is then handed to a background
//! index writer that stores it under an expiring key for point lookups. Index
//! writes are retried with backoff and may be lost; log writes may not. The
//! index queue is bounded: when the writer falls behind, new index entries
//! are dropped and counted instead of piling up in memory.

use chrono::{DateTime, Duration, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::audit::AuditEvent;
use crate::audit_store::{AuditStore, AuditStoreError};
use crate::audit_store_sled::SledAuditStore;
use crate::errors::{CapabilityError, CapabilityResult, GatewayError, GatewayResult};

/// Retention window of the secondary index
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Index jobs allowed to wait for the writer thread
pub const INDEX_QUEUE_CAPACITY: usize = 1024;

const INDEX_MAX_ATTEMPTS: u32 = 4;
const INDEX_INITIAL_BACKOFF: std::time::Duration = std::time::Duration::from_millis(25);

struct IndexJob {
    key: String,
    record: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// Best-effort side channel that owns the index write path.
struct IndexWriter {
    sender: mpsc::SyncSender<IndexJob>,
    handle: JoinHandle<()>,
}

impl IndexWriter {
    fn spawn(
        store: Arc<dyn AuditStore>,
        dropped: Arc<AtomicU64>,
        capacity: usize,
    ) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<IndexJob>(capacity);
        let handle = thread::Builder::new()
            .name("audit-index".to_string())
            .spawn(move || {
                for job in receiver {
                    if !write_with_retry(store.as_ref(), &job) {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                debug!("audit index writer drained");
            })?;
        Ok(Self { sender, handle })
    }

    /// Never blocks the appending thread.
    fn submit(&self, job: IndexJob) -> Result<(), TrySendError<IndexJob>> {
        self.sender.try_send(job)
    }

    /// Closes the queue and waits for pending jobs to finish.
    fn shutdown(self) {
        drop(self.sender);
        if self.handle.join().is_err() {
            error!("audit index writer panicked during shutdown");
        }
    }
}

fn write_with_retry(store: &dyn AuditStore, job: &IndexJob) -> bool {
    let mut delay = INDEX_INITIAL_BACKOFF;
    for attempt in 1..=INDEX_MAX_ATTEMPTS {
        match store.put_expiring(&job.key, &job.record, job.expires_at) {
            Ok(()) => return true,
            Err(e) if attempt < INDEX_MAX_ATTEMPTS => {
                debug!(key = %job.key, attempt, error = %e, "index write failed, retrying");
                thread::sleep(delay);
                delay *= 2;
            }
            Err(e) => {
                warn!(key = %job.key, error = %e, "index write dropped after {INDEX_MAX_ATTEMPTS} attempts");
            }
        }
    }
    false
}

fn store_failure(err: AuditStoreError) -> CapabilityError {
    CapabilityError::audit_unavailable(err.to_string())
}

/// Durable, append-only event sink.
pub struct AuditTrail {
    store: Option<Arc<dyn AuditStore>>,
    unavailable_reason: String,
    append_lock: Mutex<()>,
    index: Mutex<Option<IndexWriter>>,
    retention: Duration,
    failed_appends: AtomicU64,
    index_dropped: Arc<AtomicU64>,
}

impl AuditTrail {
    /// Builds a trail over a live store and starts its index writer.
    pub fn open(store: Arc<dyn AuditStore>, retention_days: u32) -> Self {
        Self::open_with_queue(store, retention_days, INDEX_QUEUE_CAPACITY)
    }

    /// Like [`AuditTrail::open`] with an explicit index queue bound.
    pub fn open_with_queue(store: Arc<dyn AuditStore>, retention_days: u32, queue_capacity: usize) -> Self {
        let index_dropped = Arc::new(AtomicU64::new(0));
        let index = match IndexWriter::spawn(store.clone(), index_dropped.clone(), queue_capacity) {
            Ok(writer) => Some(writer),
            Err(e) => {
                warn!(error = %e, "audit index writer could not start; index disabled");
                None
            }
        };

        Self {
            store: Some(store),
            unavailable_reason: String::new(),
            append_lock: Mutex::new(()),
            index: Mutex::new(index),
            retention: Duration::days(i64::from(retention_days)),
            failed_appends: AtomicU64::new(0),
            index_dropped,
        }
    }

    /// Opens the sled store at `path`, failing if it cannot be opened.
    pub fn open_at<P: AsRef<Path>>(path: P, retention_days: u32) -> GatewayResult<Self> {
        let store = SledAuditStore::open(path.as_ref())
            .map_err(|e| GatewayError::database("open audit store", e))?;
        info!(path = %path.as_ref().display(), "audit store connection established");
        Ok(Self::open(Arc::new(store), retention_days))
    }

    /// Opens the sled store at `path`. If that fails the trail is returned
    /// uninitialized and every append reports `AuditUnavailable`.
    pub fn connect<P: AsRef<Path>>(path: P, retention_days: u32) -> Self {
        Self::open_at(path, retention_days).unwrap_or_else(|e| {
            error!(error = %e, "audit store connection failed");
            Self::unavailable(e.to_string())
        })
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            store: None,
            unavailable_reason: reason.into(),
            append_lock: Mutex::new(()),
            index: Mutex::new(None),
            retention: Duration::days(i64::from(DEFAULT_RETENTION_DAYS)),
            failed_appends: AtomicU64::new(0),
            index_dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn live_store(&self) -> CapabilityResult<&Arc<dyn AuditStore>> {
        self.store.as_ref().ok_or_else(|| {
            CapabilityError::audit_unavailable(format!(
                "audit trail not initialized: {}",
                self.unavailable_reason
            ))
        })
    }

    /// Appends an event and returns its sequence number in the primary log.
    pub fn append(&self, event: &AuditEvent) -> CapabilityResult<u64> {
        let result = self.append_inner(event);
        if result.is_err() {
            self.failed_appends.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn append_inner(&self, event: &AuditEvent) -> CapabilityResult<u64> {
        let store = self.live_store()?;
        let record = serde_json::to_vec(event)
            .map_err(|e| CapabilityError::audit_unavailable(format!("encode failed: {e}")))?;

        let seq = {
            // Guards no data; a lock poisoned by a panicking append is reusable.
            let _guard = self.append_lock.lock().unwrap_or_else(PoisonError::into_inner);
            store.push_log(&record).map_err(store_failure)?
        };

        self.enqueue_index(IndexJob {
            key: event.index_key(),
            record,
            expires_at: event.timestamp() + self.retention,
        });

        info!(target: "audit", seq, "AUDIT: {}", event.summary());
        Ok(seq)
    }

    fn enqueue_index(&self, job: IndexJob) {
        let guard = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = guard.as_ref() else {
            self.index_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("audit index writer not running; index entry skipped");
            return;
        };
        match writer.submit(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                self.index_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(key = %job.key, "audit index queue full; index entry dropped");
            }
            Err(TrySendError::Disconnected(job)) => {
                self.index_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(key = %job.key, "audit index writer stopped; index entry dropped");
            }
        }
    }

    /// The newest `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> CapabilityResult<Vec<AuditEvent>> {
        let records = self.live_store()?.read_recent(limit).map_err(store_failure)?;
        Ok(records
            .iter()
            .filter_map(|record| match serde_json::from_slice::<AuditEvent>(record) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "skipping undecodable audit record");
                    None
                }
            })
            .collect())
    }

    pub fn log_len(&self) -> CapabilityResult<usize> {
        self.live_store()?.log_len().map_err(store_failure)
    }

    /// Point lookup in the secondary index; `None` once the entry expired.
    pub fn lookup_indexed(&self, key: &str) -> CapabilityResult<Option<AuditEvent>> {
        let record = self
            .live_store()?
            .get_unexpired(key, Utc::now())
            .map_err(store_failure)?;
        record
            .map(|bytes| {
                serde_json::from_slice(&bytes)
                    .map_err(|e| CapabilityError::audit_unavailable(format!("decode failed: {e}")))
            })
            .transpose()
    }

    /// Removes expired index entries. The primary log is never touched.
    pub fn purge_expired(&self) -> CapabilityResult<usize> {
        let purged = self
            .live_store()?
            .purge_expired(Utc::now())
            .map_err(store_failure)?;
        if purged > 0 {
            info!(purged, "expired audit index entries removed");
        }
        Ok(purged)
    }

    pub fn is_available(&self) -> bool {
        self.store.as_ref().map(|s| s.ping()).unwrap_or(false)
    }

    pub fn failed_appends(&self) -> u64 {
        self.failed_appends.load(Ordering::Relaxed)
    }

    pub fn index_dropped(&self) -> u64 {
        self.index_dropped.load(Ordering::Relaxed)
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Drains the index writer and flushes the store. Safe to call twice.
    pub fn close(&self) {
        let writer = self.index.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(writer) = writer {
            writer.shutdown();
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.flush() {
                error!(error = %e, "audit store flush failed on close");
            }
        }
    }
}

impl Drop for AuditTrail {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{ACTION_EXECUTE, CAPABILITY_INVOKE, SYSTEM_ACTOR};
    use serde_json::json;

    fn temp_trail() -> AuditTrail {
        let store = SledAuditStore::temporary().unwrap();
        AuditTrail::open(Arc::new(store), DEFAULT_RETENTION_DAYS)
    }

    #[test]
    fn append_writes_log_and_index() {
        let trail = temp_trail();
        let event = AuditEvent::new(CAPABILITY_INVOKE, "nurse-1", "data:encrypt", ACTION_EXECUTE)
            .with_details(json!({ "terms": { "plaintext": "PHI-1" } }));

        trail.append(&event).unwrap();
        assert_eq!(trail.log_len().unwrap(), 1);

        // Closing drains the index queue.
        trail.close();
        let indexed = trail.lookup_indexed(&event.index_key()).unwrap();
        assert_eq!(indexed, Some(event));
    }

    #[test]
    fn recent_returns_in_append_order() {
        let trail = temp_trail();
        for action in ["A", "B", "C"] {
            trail
                .append(&AuditEvent::new("GENERIC", SYSTEM_ACTOR, "UNKNOWN", action))
                .unwrap();
        }
        let actions: Vec<String> = trail
            .recent(10)
            .unwrap()
            .iter()
            .map(|e| e.action().to_string())
            .collect();
        assert_eq!(actions, vec!["A", "B", "C"]);
    }

    #[test]
    fn unavailable_trail_fails_fast() {
        let trail = AuditTrail::unavailable("connection refused");
        let event = AuditEvent::new("GENERIC", SYSTEM_ACTOR, "UNKNOWN", "VIEW");

        let err = trail.append(&event).unwrap_err();
        assert!(matches!(err, CapabilityError::AuditUnavailable { .. }));
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(trail.failed_appends(), 1);
        assert!(!trail.is_available());
    }

    #[test]
    fn connect_to_unusable_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("not-a-dir");
        std::fs::write(&file_path, b"occupied").unwrap();

        let trail = AuditTrail::connect(&file_path, DEFAULT_RETENTION_DAYS);
        assert!(!trail.is_available());

        let err = AuditTrail::open_at(&file_path, DEFAULT_RETENTION_DAYS).err().unwrap();
        assert!(matches!(err, GatewayError::Database { .. }));
        assert!(err.to_string().contains("open audit store"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn close_is_idempotent() {
        let trail = temp_trail();
        trail.close();
        trail.close();
        // Appends after close still reach the log.
        trail
            .append(&AuditEvent::new("GENERIC", SYSTEM_ACTOR, "UNKNOWN", "LATE"))
            .unwrap();
        assert_eq!(trail.log_len().unwrap(), 1);
        assert_eq!(trail.index_dropped(), 1);
    }
}
