//! The coordination substrate: a small, versioned key/value service with sessions, ephemeral
//! entries, watches and leader election.
//!
//! All globally visible job state (commands, worker acks, liveness, split claims) lives here and
//! is only ever accessed through this interface. A worker writes only its own entries and the
//! master writes only the global ones.

use crate::config::JobConfig;
use crate::error::{deserialize_error, serialize_error, GBError};
use crate::util::retry::retry_with_backoff;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

mod local;

pub use local::LocalCoordinator;

pub const JOBS_PREFIX: &str = "/jobs/";

pub type SessionId = u64;
pub type Revision = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub data: Vec<u8>,
    /// Starts at 1 on creation and grows by one on every update.
    pub version: u64,
}

pub trait CoordinationService: Send + Sync {
    fn open_session(&self) -> Result<SessionId, GBError>;

    /// Closes `session` and deletes all ephemeral entries it owns.
    fn close_session(&self, session: SessionId) -> Result<(), GBError>;

    /// Atomically creates `key` if it does not exist. Returns whether it was created. Entries
    /// created with an `owner` are ephemeral and vanish with the owning session.
    fn create(&self, key: &str, data: Vec<u8>, owner: Option<SessionId>)
        -> Result<bool, GBError>;

    fn get(&self, key: &str) -> Result<Option<Versioned>, GBError>;

    /// Creates or overwrites `key` and returns the new version.
    fn put(&self, key: &str, data: Vec<u8>) -> Result<u64, GBError>;

    /// Overwrites `key` only if its current version is `expected`.
    fn update_if_version(&self, key: &str, data: Vec<u8>, expected: u64)
        -> Result<bool, GBError>;

    fn delete(&self, key: &str) -> Result<bool, GBError>;

    /// All keys starting with `prefix`, in lexicographic order.
    fn children(&self, prefix: &str) -> Result<Vec<String>, GBError>;

    /// The revision of the latest change to any entry.
    fn revision(&self) -> Result<Revision, GBError>;

    /// Blocks until an entry under `prefix` changed after revision `since`, or until `timeout`.
    /// Returns the revision observed when waking up.
    fn watch(&self, prefix: &str, since: Revision, timeout: Duration)
        -> Result<Revision, GBError>;

    /// Tries to become the leader of `election` until `timeout`. Leadership is held by
    /// `session` and passes to a waiting candidate when that session closes.
    fn elect_leader(
        &self,
        election: &str,
        session: SessionId,
        candidate: &str,
        timeout: Duration,
    ) -> Result<bool, GBError>;

    fn leader(&self, election: &str) -> Result<Option<String>, GBError>;
}

/// Closes its session when dropped, also when a worker thread unwinds.
pub struct SessionGuard {
    coordinator: Arc<dyn CoordinationService>,
    session: SessionId,
}

impl SessionGuard {
    pub fn open(coordinator: Arc<dyn CoordinationService>) -> Result<Self, GBError> {
        let session = coordinator.open_session()?;
        Ok(Self { coordinator, session })
    }

    pub fn id(&self) -> SessionId {
        self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let _ = self.coordinator.close_session(self.session);
    }
}

/// Access to a coordination service that retries every call while the service is unavailable.
/// Once the retries are used up the unavailability is returned to the caller.
///
/// Keys are relative to the client's namespace, so jobs sharing a service never see each other's
/// entries.
#[derive(Clone)]
pub struct CoordinationClient {
    service: Arc<dyn CoordinationService>,
    namespace: String,
    retries: u32,
    backoff: Duration,
}

impl CoordinationClient {
    pub fn new(service: Arc<dyn CoordinationService>, config: &JobConfig) -> Self {
        Self {
            service,
            namespace: String::new(),
            retries: config.coordination_retries,
            backoff: config.coordination_backoff,
        }
    }

    /// A client whose keys live under `/jobs/{job_id}`.
    pub fn for_job(mut self, job_id: &str) -> Self {
        self.namespace = format!("{}{}", JOBS_PREFIX, job_id);
        self
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    fn retry<T>(
        &self,
        what: &str,
        mut operation: impl FnMut(&dyn CoordinationService) -> Result<T, GBError>,
    ) -> Result<T, GBError> {
        retry_with_backoff(what, self.retries, self.backoff, || operation(self.service.as_ref()))
    }

    pub fn open_session(&self) -> Result<SessionGuard, GBError> {
        self.retry("opening a session", |_| SessionGuard::open(Arc::clone(&self.service)))
    }

    pub fn create(
        &self,
        key: &str,
        data: &[u8],
        owner: Option<SessionId>,
    ) -> Result<bool, GBError> {
        let key = self.key(key);
        self.retry(&key, |service| service.create(&key, data.to_vec(), owner))
    }

    pub fn delete(&self, key: &str) -> Result<bool, GBError> {
        let key = self.key(key);
        self.retry(&key, |service| service.delete(&key))
    }

    pub fn exists(&self, key: &str) -> Result<bool, GBError> {
        let key = self.key(key);
        Ok(self.retry(&key, |service| service.get(&key))?.is_some())
    }

    pub fn children(&self, prefix: &str) -> Result<Vec<String>, GBError> {
        let prefix = self.key(prefix);
        let children = self.retry(&prefix, |service| service.children(&prefix))?;
        Ok(children
            .into_iter()
            .map(|key| key.get(self.namespace.len()..).unwrap_or_default().to_owned())
            .collect())
    }

    pub fn revision(&self) -> Result<Revision, GBError> {
        self.retry("reading the revision", |service| service.revision())
    }

    pub fn watch(
        &self,
        prefix: &str,
        since: Revision,
        timeout: Duration,
    ) -> Result<Revision, GBError> {
        let prefix = self.key(prefix);
        self.retry(&prefix, |service| service.watch(&prefix, since, timeout))
    }

    pub fn elect_leader(
        &self,
        election: &str,
        session: SessionId,
        candidate: &str,
        timeout: Duration,
    ) -> Result<bool, GBError> {
        let election = format!("{}/{}", self.namespace, election);
        let election = election.trim_start_matches('/');
        self.retry(election, |service| {
            service.elect_leader(election, session, candidate, timeout)
        })
    }

    pub fn get_object<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<(T, u64)>, GBError> {
        let key = self.key(key);
        self.retry(&key, |service| get_object(service, &key))
    }

    pub fn put_object<T: Serialize>(&self, key: &str, object: &T) -> Result<u64, GBError> {
        let key = self.key(key);
        let data = encode(&key, object)?;
        self.retry(&key, |service| service.put(&key, data.clone()))
    }
}

pub fn encode<T: Serialize>(key: &str, object: &T) -> Result<Vec<u8>, GBError> {
    bincode::serialize(object).map_err(|e| serialize_error(key, e))
}

pub fn decode<T: DeserializeOwned>(key: &str, data: &[u8]) -> Result<T, GBError> {
    bincode::deserialize(data).map_err(|e| deserialize_error(key, e))
}

pub fn get_object<T: DeserializeOwned>(
    coordinator: &dyn CoordinationService,
    key: &str,
) -> Result<Option<(T, u64)>, GBError> {
    match coordinator.get(key)? {
        Some(versioned) => Ok(Some((decode(key, &versioned.data)?, versioned.version))),
        None => Ok(None),
    }
}
