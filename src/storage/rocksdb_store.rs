//! RocksDB-backed experiment store
//!
//! Storage schema (single database, ids never contain `:`):
//! - `test:{test_id}` - bincode-encoded [`Test`]
//! - `session:{test_id}:{session_id}` - bincode-encoded [`Session`]

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{FlushOptions, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{ExperimentStore, StoreError, StoreResult, WriteMode};
use crate::experiments::{Session, Test};
use crate::metrics;

const TEST_PREFIX: &str = "test:";
const SESSION_PREFIX: &str = "session:";

fn test_key(test_id: &str) -> String {
    format!("{TEST_PREFIX}{test_id}")
}

fn session_prefix(test_id: &str) -> String {
    format!("{SESSION_PREFIX}{test_id}:")
}

fn session_key(test_id: &str, session_id: &str) -> String {
    format!("{SESSION_PREFIX}{test_id}:{session_id}")
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(v, _)| v)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Experiment store on an embedded RocksDB database
pub struct RocksDbExperimentStore {
    db: Arc<DB>,
    write_mode: WriteMode,
    /// Serializes check-then-write sequences (uniqueness on insert, existence on update)
    write_lock: Mutex<()>,
}

impl RocksDbExperimentStore {
    pub fn new(path: &Path, write_mode: WriteMode) -> StoreResult<Self> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_manual_wal_flush(false);
        opts.set_max_write_buffer_number(4);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_background_jobs(4);
        opts.set_level_compaction_dynamic_level_bytes(true);

        let db = Arc::new(DB::open(&opts, path.join("experiments"))?);

        tracing::info!(
            path = %path.display(),
            write_mode = %write_mode,
            "Experiment store initialized"
        );

        Ok(Self {
            db,
            write_mode,
            write_lock: Mutex::new(()),
        })
    }

    fn write_opts(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.write_mode == WriteMode::Sync);
        write_opts
    }

    fn get_value<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put_value<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let bytes = encode(value)?;
        self.db.put_opt(key.as_bytes(), bytes, &self.write_opts())?;
        Ok(())
    }

    /// Visit every value under `prefix`. Undecodable values are logged and skipped.
    fn scan_prefix<T: DeserializeOwned>(
        &self,
        prefix: &str,
        mut visit: impl FnMut(T),
    ) -> StoreResult<()> {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            match decode::<T>(&value) {
                Ok(decoded) => visit(decoded),
                Err(e) => {
                    tracing::warn!(
                        key = %String::from_utf8_lossy(&key),
                        error = %e,
                        "Skipping undecodable record"
                    );
                }
            }
        }

        Ok(())
    }

    fn session_keys(&self, test_id: &str) -> StoreResult<Vec<Box<[u8]>>> {
        let prefix = session_prefix(test_id);
        let mut keys = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }
}

impl ExperimentStore for RocksDbExperimentStore {
    fn get_test(&self, test_id: &str) -> StoreResult<Option<Test>> {
        metrics::record_store_op("get_test");
        self.get_value(&test_key(test_id))
    }

    fn list_tests(&self, organization_id: Option<&str>) -> StoreResult<Vec<Test>> {
        metrics::record_store_op("list_tests");
        let mut tests = Vec::new();
        self.scan_prefix::<Test>(TEST_PREFIX, |test| {
            if organization_id.map_or(true, |org| test.organization_id == org) {
                tests.push(test);
            }
        })?;
        Ok(tests)
    }

    fn insert_test(&self, test: &Test) -> StoreResult<()> {
        metrics::record_store_op("insert_test");
        let key = test_key(&test.id);
        let _guard = self.write_lock.lock();
        if self.db.get(key.as_bytes())?.is_some() {
            return Err(StoreError::DuplicateTest(test.id.clone()));
        }
        self.put_value(&key, test)
    }

    fn update_test(&self, test: &Test) -> StoreResult<()> {
        metrics::record_store_op("update_test");
        let key = test_key(&test.id);
        let _guard = self.write_lock.lock();
        if self.db.get(key.as_bytes())?.is_none() {
            return Err(StoreError::MissingTest(test.id.clone()));
        }
        self.put_value(&key, test)
    }

    fn delete_test(&self, test_id: &str) -> StoreResult<bool> {
        metrics::record_store_op("delete_test");
        let key = test_key(test_id);
        let _guard = self.write_lock.lock();
        let existed = self.db.get(key.as_bytes())?.is_some();

        let mut batch = WriteBatch::default();
        batch.delete(key.as_bytes());
        let session_keys = self.session_keys(test_id)?;
        for session_key in &session_keys {
            batch.delete(session_key);
        }
        self.db.write_opt(batch, &self.write_opts())?;

        tracing::debug!(
            test_id,
            sessions = session_keys.len(),
            "Deleted test and its sessions"
        );
        Ok(existed)
    }

    fn get_session(&self, test_id: &str, session_id: &str) -> StoreResult<Option<Session>> {
        metrics::record_store_op("get_session");
        self.get_value(&session_key(test_id, session_id))
    }

    fn list_sessions(&self, test_id: &str) -> StoreResult<Vec<Session>> {
        metrics::record_store_op("list_sessions");
        let mut sessions = Vec::new();
        self.scan_prefix::<Session>(&session_prefix(test_id), |session| sessions.push(session))?;
        Ok(sessions)
    }

    fn insert_session(&self, session: &Session) -> StoreResult<()> {
        metrics::record_store_op("insert_session");
        let key = session_key(&session.test_id, &session.session_id);
        let _guard = self.write_lock.lock();
        if self.db.get(key.as_bytes())?.is_some() {
            return Err(StoreError::DuplicateSession {
                test_id: session.test_id.clone(),
                session_id: session.session_id.clone(),
            });
        }
        self.put_value(&key, session)
    }

    fn update_session(&self, session: &Session) -> StoreResult<()> {
        metrics::record_store_op("update_session");
        let key = session_key(&session.test_id, &session.session_id);
        let _guard = self.write_lock.lock();
        if self.db.get(key.as_bytes())?.is_none() {
            return Err(StoreError::MissingSession {
                test_id: session.test_id.clone(),
                session_id: session.session_id.clone(),
            });
        }
        self.put_value(&key, session)
    }

    fn count_sessions(&self, test_id: &str) -> StoreResult<u64> {
        metrics::record_store_op("count_sessions");
        Ok(self.session_keys(test_id)?.len() as u64)
    }

    fn flush(&self) -> StoreResult<()> {
        let mut flush_opts = FlushOptions::default();
        flush_opts.set_wait(true);
        self.db.flush_opt(&flush_opts)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksDbExperimentStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksDbExperimentStore::new(temp_dir.path(), WriteMode::Async).unwrap();
        (store, temp_dir)
    }

    fn sample_test(id: &str) -> Test {
        Test::builder("org_1", "rocks test")
            .with_id(id)
            .with_variant("a", "A", 50.0)
            .with_variant("b", "B", 50.0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_test_roundtrip_and_listing() {
        let (store, _dir) = create_test_store();
        store.insert_test(&sample_test("t1")).unwrap();
        store.insert_test(&sample_test("t2")).unwrap();

        let loaded = store.get_test("t1").unwrap().unwrap();
        assert_eq!(loaded.variants.len(), 2);
        assert!(store.get_test("missing").unwrap().is_none());
        assert_eq!(store.list_tests(Some("org_1")).unwrap().len(), 2);
        assert!(store.list_tests(Some("org_2")).unwrap().is_empty());
        assert!(matches!(
            store.insert_test(&sample_test("t1")),
            Err(StoreError::DuplicateTest(_))
        ));
    }

    #[test]
    fn test_sessions_do_not_leak_between_tests() {
        let (store, _dir) = create_test_store();
        store.insert_session(&Session::new("t1", "s1", None, "a")).unwrap();
        store.insert_session(&Session::new("t1", "s2", None, "b")).unwrap();
        store.insert_session(&Session::new("t10", "s1", None, "a")).unwrap();

        assert_eq!(store.count_sessions("t1").unwrap(), 2);
        assert_eq!(store.list_sessions("t10").unwrap().len(), 1);
        assert!(matches!(
            store.insert_session(&Session::new("t1", "s1", None, "b")),
            Err(StoreError::DuplicateSession { .. })
        ));
    }

    #[test]
    fn test_delete_removes_sessions() {
        let (store, _dir) = create_test_store();
        store.insert_test(&sample_test("t1")).unwrap();
        store.insert_session(&Session::new("t1", "s1", None, "a")).unwrap();
        store.insert_session(&Session::new("t2", "s1", None, "a")).unwrap();

        assert!(store.delete_test("t1").unwrap());
        assert!(store.get_test("t1").unwrap().is_none());
        assert_eq!(store.count_sessions("t1").unwrap(), 0);
        assert_eq!(store.count_sessions("t2").unwrap(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksDbExperimentStore::new(temp_dir.path(), WriteMode::Sync).unwrap();
            store.insert_test(&sample_test("t1")).unwrap();
            let mut session = Session::new("t1", "s1", Some("u1"), "b");
            store.insert_session(&session).unwrap();
            session.mark_converted(Some("signup".to_string()), Some(12.5), chrono::Utc::now());
            store.update_session(&session).unwrap();
            store.flush().unwrap();
        }

        let store = RocksDbExperimentStore::new(temp_dir.path(), WriteMode::Async).unwrap();
        assert!(store.get_test("t1").unwrap().is_some());
        let session = store.get_session("t1", "s1").unwrap().unwrap();
        assert!(session.converted);
        assert_eq!(session.variant_id, "b");
        assert_eq!(session.conversion_value, Some(12.5));
        assert_eq!(session.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_corrupt_record_skipped() {
        let (store, _dir) = create_test_store();
        store.insert_test(&sample_test("t1")).unwrap();
        store.db.put(test_key("broken").as_bytes(), b"\xff\xff").unwrap();

        let tests = store.list_tests(None).unwrap();
        assert_eq!(tests.len(), 1);
        assert!(store.get_test("broken").is_err());
    }
}
