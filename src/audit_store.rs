use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditStoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sled::Error> for AuditStoreError {
    fn from(err: sled::Error) -> Self {
        AuditStoreError::Database(err.to_string())
    }
}

pub type AuditStoreResult<T> = Result<T, AuditStoreError>;

/// Durable backing store for the audit trail.
///
/// Two keyspaces: an append-only ordered log and an expiring point-lookup
/// index. There is no operation to rewrite or remove a log record.
pub trait AuditStore: Send + Sync {
    /// Append an encoded record to the ordered log and return its sequence number.
    fn push_log(&self, record: &[u8]) -> AuditStoreResult<u64>;

    /// Store an encoded record under `key` until `expires_at`.
    fn put_expiring(
        &self,
        key: &str,
        record: &[u8],
        expires_at: DateTime<Utc>,
    ) -> AuditStoreResult<()>;

    /// Fetch an index record that has not yet expired at `now`.
    fn get_unexpired(&self, key: &str, now: DateTime<Utc>) -> AuditStoreResult<Option<Vec<u8>>>;

    /// The newest `limit` log records, oldest first.
    fn read_recent(&self, limit: usize) -> AuditStoreResult<Vec<Vec<u8>>>;

    fn log_len(&self) -> AuditStoreResult<usize>;

    /// Drop index entries whose expiry is at or before `now`.
    fn purge_expired(&self, now: DateTime<Utc>) -> AuditStoreResult<usize>;

    fn ping(&self) -> bool;

    fn flush(&self) -> AuditStoreResult<()>;
}
