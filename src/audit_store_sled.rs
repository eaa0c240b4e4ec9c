use chrono::{DateTime, Utc};
use sled::{Db, Tree};
use std::path::Path;
use tracing::debug;

use crate::audit_store::{AuditStore, AuditStoreError, AuditStoreResult};

const LOG_TREE: &str = "audit_log";
const INDEX_TREE: &str = "audit_index";
const EXPIRY_PREFIX_LEN: usize = 8;

/// A sled-backed implementation of AuditStore.
///
/// Log keys are big-endian sequence numbers so that tree order equals append
/// order. Index values carry an 8-byte big-endian expiry (unix seconds)
/// ahead of the encoded record.
pub struct SledAuditStore {
    db: Db,
    log: Tree,
    index: Tree,
}

impl SledAuditStore {
    /// Opens (or creates) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> AuditStoreResult<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            AuditStoreError::Unavailable(format!(
                "failed to open sled DB at {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_db(db)
    }

    /// Opens a throwaway store that is removed when dropped.
    pub fn temporary() -> AuditStoreResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| AuditStoreError::Unavailable(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> AuditStoreResult<Self> {
        let log = db.open_tree(LOG_TREE)?;
        let index = db.open_tree(INDEX_TREE)?;
        debug!(recovered = db.was_recovered(), "audit store opened");
        Ok(Self { db, log, index })
    }

    fn encode_index_value(record: &[u8], expires_at: DateTime<Utc>) -> Vec<u8> {
        let mut value = Vec::with_capacity(EXPIRY_PREFIX_LEN + record.len());
        value.extend_from_slice(&expires_at.timestamp().to_be_bytes());
        value.extend_from_slice(record);
        value
    }

    fn split_index_value(value: &[u8]) -> AuditStoreResult<(i64, &[u8])> {
        if value.len() < EXPIRY_PREFIX_LEN {
            return Err(AuditStoreError::Corrupt("index value shorter than expiry prefix".into()));
        }
        let (prefix, record) = value.split_at(EXPIRY_PREFIX_LEN);
        let mut expiry = [0u8; EXPIRY_PREFIX_LEN];
        expiry.copy_from_slice(prefix);
        Ok((i64::from_be_bytes(expiry), record))
    }
}

impl AuditStore for SledAuditStore {
    fn push_log(&self, record: &[u8]) -> AuditStoreResult<u64> {
        let seq = self.db.generate_id()?;
        self.log.insert(seq.to_be_bytes(), record)?;
        self.log.flush()?;
        Ok(seq)
    }

    fn put_expiring(
        &self,
        key: &str,
        record: &[u8],
        expires_at: DateTime<Utc>,
    ) -> AuditStoreResult<()> {
        self.index
            .insert(key.as_bytes(), Self::encode_index_value(record, expires_at))?;
        Ok(())
    }

    fn get_unexpired(&self, key: &str, now: DateTime<Utc>) -> AuditStoreResult<Option<Vec<u8>>> {
        match self.index.get(key.as_bytes())? {
            Some(value) => {
                let (expiry, record) = Self::split_index_value(&value)?;
                if expiry <= now.timestamp() {
                    Ok(None)
                } else {
                    Ok(Some(record.to_vec()))
                }
            }
            None => Ok(None),
        }
    }

    fn read_recent(&self, limit: usize) -> AuditStoreResult<Vec<Vec<u8>>> {
        let mut records = self
            .log
            .iter()
            .rev()
            .take(limit)
            .map(|item| item.map(|(_, value)| value.to_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        records.reverse();
        Ok(records)
    }

    fn log_len(&self) -> AuditStoreResult<usize> {
        Ok(self.log.len())
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> AuditStoreResult<usize> {
        let cutoff = now.timestamp();
        let mut purged = 0;
        for item in self.index.iter() {
            let (key, value) = item?;
            let expired = match Self::split_index_value(&value) {
                Ok((expiry, _)) => expiry <= cutoff,
                Err(_) => true,
            };
            if expired {
                self.index.remove(key)?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    fn ping(&self) -> bool {
        self.db.size_on_disk().is_ok()
    }

    fn flush(&self) -> AuditStoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn log_preserves_append_order() {
        let store = SledAuditStore::temporary().unwrap();
        for i in 0..5 {
            store.push_log(format!("record-{i}").as_bytes()).unwrap();
        }

        assert_eq!(store.log_len().unwrap(), 5);
        let recent = store.read_recent(3).unwrap();
        let recent: Vec<String> = recent
            .into_iter()
            .map(|r| String::from_utf8(r).unwrap())
            .collect();
        assert_eq!(recent, vec!["record-2", "record-3", "record-4"]);
    }

    #[test]
    fn sequence_numbers_increase() {
        let store = SledAuditStore::temporary().unwrap();
        let first = store.push_log(b"a").unwrap();
        let second = store.push_log(b"b").unwrap();
        assert!(second > first);
    }

    #[test]
    fn index_entries_expire() {
        let store = SledAuditStore::temporary().unwrap();
        let now = Utc::now();
        store
            .put_expiring("audit:GENERIC:1.000000", b"live", now + Duration::days(30))
            .unwrap();
        store
            .put_expiring("audit:GENERIC:2.000000", b"stale", now - Duration::seconds(1))
            .unwrap();

        assert_eq!(
            store.get_unexpired("audit:GENERIC:1.000000", now).unwrap(),
            Some(b"live".to_vec())
        );
        assert_eq!(store.get_unexpired("audit:GENERIC:2.000000", now).unwrap(), None);

        assert_eq!(store.purge_expired(now).unwrap(), 1);
        assert_eq!(store.purge_expired(now).unwrap(), 0);
        // The log is untouched by index expiry.
        assert_eq!(store.log_len().unwrap(), 0);
    }

    #[test]
    fn reopen_keeps_log() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledAuditStore::open(dir.path()).unwrap();
            store.push_log(b"persisted").unwrap();
            store.flush().unwrap();
        }
        let store = SledAuditStore::open(dir.path()).unwrap();
        assert_eq!(store.log_len().unwrap(), 1);
        assert!(store.ping());
    }
}
