//! Persistence for tests and sessions
//!
//! [`ExperimentStore`] is the seam between the experiment service and its
//! backing storage. Two implementations:
//!
//! - [`RocksDbExperimentStore`]: embedded RocksDB, bincode-encoded values
//! - [`InMemoryExperimentStore`]: maps guarded by `parking_lot` locks, for tests
//!   and embedding

mod rocksdb_store;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;

use crate::experiments::{Session, Test};

pub use rocksdb_store::RocksDbExperimentStore;

/// Write mode for storage operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// fsync on every write; survives power loss
    Sync,
    /// Buffered in the OS page cache; survives process crashes but not power loss
    #[default]
    Async,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Sync => "sync",
            WriteMode::Async => "async",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(WriteMode::Sync),
            "async" => Ok(WriteMode::Async),
            other => Err(StoreError::InvalidConfig(format!(
                "unknown write mode '{other}' (expected sync or async)"
            ))),
        }
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Test {0} already exists")]
    DuplicateTest(String),

    #[error("Test {0} does not exist")]
    MissingTest(String),

    #[error("Session {session_id} already exists for test {test_id}")]
    DuplicateSession { test_id: String, session_id: String },

    #[error("Session {session_id} does not exist for test {test_id}")]
    MissingSession { test_id: String, session_id: String },

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence for tests and their sessions
///
/// Implementations must guarantee at most one session per (test id, session id):
/// `insert_session` fails with [`StoreError::DuplicateSession`] when the pair exists.
pub trait ExperimentStore: Send + Sync {
    fn get_test(&self, test_id: &str) -> StoreResult<Option<Test>>;

    /// All tests, optionally limited to one organization, ordered by id
    fn list_tests(&self, organization_id: Option<&str>) -> StoreResult<Vec<Test>>;

    /// Fails with `DuplicateTest` if the id is taken
    fn insert_test(&self, test: &Test) -> StoreResult<()>;

    /// Fails with `MissingTest` if the test does not exist
    fn update_test(&self, test: &Test) -> StoreResult<()>;

    /// Delete a test and all of its sessions. Returns false if it did not exist.
    fn delete_test(&self, test_id: &str) -> StoreResult<bool>;

    fn get_session(&self, test_id: &str, session_id: &str) -> StoreResult<Option<Session>>;

    fn list_sessions(&self, test_id: &str) -> StoreResult<Vec<Session>>;

    fn insert_session(&self, session: &Session) -> StoreResult<()>;

    /// Fails with `MissingSession` if the session does not exist
    fn update_session(&self, session: &Session) -> StoreResult<()>;

    fn count_sessions(&self, test_id: &str) -> StoreResult<u64>;

    /// Persist buffered writes (no-op for stores without buffering)
    fn flush(&self) -> StoreResult<()>;
}

type SessionKey = (String, String);

/// In-memory store
#[derive(Default)]
pub struct InMemoryExperimentStore {
    tests: RwLock<BTreeMap<String, Test>>,
    sessions: RwLock<BTreeMap<SessionKey, Session>>,
}

impl InMemoryExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn session_key(test_id: &str, session_id: &str) -> SessionKey {
        (test_id.to_string(), session_id.to_string())
    }

    fn sessions_of<'a>(
        sessions: &'a BTreeMap<SessionKey, Session>,
        test_id: &str,
    ) -> impl Iterator<Item = &'a Session> + 'a {
        let start = Self::session_key(test_id, "");
        let test_id = test_id.to_string();
        sessions
            .range(start..)
            .take_while(move |((t, _), _)| *t == test_id)
            .map(|(_, s)| s)
    }
}

impl ExperimentStore for InMemoryExperimentStore {
    fn get_test(&self, test_id: &str) -> StoreResult<Option<Test>> {
        Ok(self.tests.read().get(test_id).cloned())
    }

    fn list_tests(&self, organization_id: Option<&str>) -> StoreResult<Vec<Test>> {
        Ok(self
            .tests
            .read()
            .values()
            .filter(|t| organization_id.map_or(true, |org| t.organization_id == org))
            .cloned()
            .collect())
    }

    fn insert_test(&self, test: &Test) -> StoreResult<()> {
        let mut tests = self.tests.write();
        if tests.contains_key(&test.id) {
            return Err(StoreError::DuplicateTest(test.id.clone()));
        }
        tests.insert(test.id.clone(), test.clone());
        Ok(())
    }

    fn update_test(&self, test: &Test) -> StoreResult<()> {
        let mut tests = self.tests.write();
        match tests.get_mut(&test.id) {
            Some(existing) => {
                *existing = test.clone();
                Ok(())
            }
            None => Err(StoreError::MissingTest(test.id.clone())),
        }
    }

    fn delete_test(&self, test_id: &str) -> StoreResult<bool> {
        let removed = self.tests.write().remove(test_id).is_some();
        self.sessions.write().retain(|(t, _), _| t != test_id);
        Ok(removed)
    }

    fn get_session(&self, test_id: &str, session_id: &str) -> StoreResult<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .get(&Self::session_key(test_id, session_id))
            .cloned())
    }

    fn list_sessions(&self, test_id: &str) -> StoreResult<Vec<Session>> {
        let sessions = self.sessions.read();
        Ok(Self::sessions_of(&sessions, test_id).cloned().collect())
    }

    fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let key = Self::session_key(&session.test_id, &session.session_id);
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&key) {
            return Err(StoreError::DuplicateSession {
                test_id: session.test_id.clone(),
                session_id: session.session_id.clone(),
            });
        }
        sessions.insert(key, session.clone());
        Ok(())
    }

    fn update_session(&self, session: &Session) -> StoreResult<()> {
        let key = Self::session_key(&session.test_id, &session.session_id);
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&key) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(StoreError::MissingSession {
                test_id: session.test_id.clone(),
                session_id: session.session_id.clone(),
            }),
        }
    }

    fn count_sessions(&self, test_id: &str) -> StoreResult<u64> {
        let sessions = self.sessions.read();
        Ok(Self::sessions_of(&sessions, test_id).count() as u64)
    }

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}
