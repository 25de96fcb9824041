use crate::coordination::{CoordinationService, Revision, SessionId, Versioned};
use crate::error::GBError;
use hashbrown::{HashMap, HashSet};
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const ELECTION_PREFIX: &str = "/election/";

struct Entry {
    data: Vec<u8>,
    version: u64,
    modified: Revision,
    owner: Option<SessionId>,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    // Deleted keys and the revision of their deletion, so that watches see deletions.
    tombstones: HashMap<String, Revision>,
    sessions: HashSet<SessionId>,
    next_session: SessionId,
    revision: Revision,
    unavailable: bool,
}

impl State {
    fn bump(&mut self) -> Revision {
        self.revision += 1;
        self.revision
    }

    fn changed_since(&self, prefix: &str, since: Revision) -> bool {
        self.entries
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .any(|(_, entry)| entry.modified > since)
            || self
                .tombstones
                .iter()
                .any(|(key, &revision)| revision > since && key.starts_with(prefix))
    }

    fn remove(&mut self, key: &str) -> bool {
        if self.entries.remove(key).is_some() {
            let revision = self.bump();
            self.tombstones.insert(key.to_owned(), revision);
            true
        } else {
            false
        }
    }
}

/// In-process coordination service shared by the master and the workers of a job.
pub struct LocalCoordinator {
    state: Mutex<State>,
    changed: Condvar,
}

impl Default for LocalCoordinator {
    fn default() -> Self {
        Self { state: Mutex::new(State::default()), changed: Condvar::new() }
    }
}

impl LocalCoordinator {
    /// While unavailable, every call fails with `GBError::CoordinationUnavailable`.
    pub fn set_available(&self, available: bool) {
        if let Ok(mut state) = self.state.lock() {
            info!("Coordination service {}", if available { "available" } else { "unavailable" });
            state.unavailable = !available;
        }
        self.changed.notify_all();
    }

    fn lock(&self) -> Result<MutexGuard<State>, GBError> {
        let state = self
            .state
            .lock()
            .map_err(|_| GBError::Coordination("Coordinator state is poisoned".to_owned()))?;
        if state.unavailable {
            return Err(GBError::CoordinationUnavailable("local coordinator is down".to_owned()));
        }
        Ok(state)
    }

    fn write(&self, state: &mut State, key: &str, data: Vec<u8>) -> u64 {
        let revision = state.bump();
        state.tombstones.remove(key);
        let version = match state.entries.get_mut(key) {
            Some(entry) => {
                entry.data = data;
                entry.version += 1;
                entry.modified = revision;
                entry.version
            }
            None => {
                let entry = Entry { data, version: 1, modified: revision, owner: None };
                state.entries.insert(key.to_owned(), entry);
                1
            }
        };
        self.changed.notify_all();
        version
    }
}

impl CoordinationService for LocalCoordinator {
    fn open_session(&self) -> Result<SessionId, GBError> {
        let mut state = self.lock()?;
        state.next_session += 1;
        let session = state.next_session;
        state.sessions.insert(session);
        Ok(session)
    }

    fn close_session(&self, session: SessionId) -> Result<(), GBError> {
        // Sessions also end while the service is unavailable.
        let mut state = self
            .state
            .lock()
            .map_err(|_| GBError::Coordination("Coordinator state is poisoned".to_owned()))?;
        if !state.sessions.remove(&session) {
            return Ok(());
        }
        let owned: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.owner == Some(session))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &owned {
            state.remove(key);
        }
        debug!("Closed session {} ({} ephemeral entries removed)", session, owned.len());
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    fn create(
        &self,
        key: &str,
        data: Vec<u8>,
        owner: Option<SessionId>,
    ) -> Result<bool, GBError> {
        let mut state = self.lock()?;
        if let Some(session) = owner {
            if !state.sessions.contains(&session) {
                return Err(GBError::Coordination(format!(
                    "Session {} is closed, cannot create '{}'",
                    session, key
                )));
            }
        }
        if state.entries.contains_key(key) {
            return Ok(false);
        }
        let revision = state.bump();
        state.tombstones.remove(key);
        state.entries.insert(key.to_owned(), Entry { data, version: 1, modified: revision, owner });
        drop(state);
        self.changed.notify_all();
        Ok(true)
    }

    fn get(&self, key: &str) -> Result<Option<Versioned>, GBError> {
        let state = self.lock()?;
        Ok(state
            .entries
            .get(key)
            .map(|entry| Versioned { data: entry.data.clone(), version: entry.version }))
    }

    fn put(&self, key: &str, data: Vec<u8>) -> Result<u64, GBError> {
        let mut state = self.lock()?;
        Ok(self.write(&mut state, key, data))
    }

    fn update_if_version(
        &self,
        key: &str,
        data: Vec<u8>,
        expected: u64,
    ) -> Result<bool, GBError> {
        let mut state = self.lock()?;
        let current = state.entries.get(key).map_or(false, |entry| entry.version == expected);
        if current {
            self.write(&mut state, key, data);
        }
        Ok(current)
    }

    fn delete(&self, key: &str) -> Result<bool, GBError> {
        let mut state = self.lock()?;
        let removed = state.remove(key);
        drop(state);
        if removed {
            self.changed.notify_all();
        }
        Ok(removed)
    }

    fn children(&self, prefix: &str) -> Result<Vec<String>, GBError> {
        let state = self.lock()?;
        Ok(state
            .entries
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn revision(&self) -> Result<Revision, GBError> {
        Ok(self.lock()?.revision)
    }

    fn watch(&self, prefix: &str, since: Revision, timeout: Duration) -> Result<Revision, GBError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock()?;
        loop {
            if state.changed_since(prefix, since) {
                return Ok(state.revision);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(state.revision);
            }
            let (guard, _) = self
                .changed
                .wait_timeout(state, deadline - now)
                .map_err(|_| GBError::Coordination("Coordinator state is poisoned".to_owned()))?;
            state = guard;
            if state.unavailable {
                return Err(GBError::CoordinationUnavailable(
                    "local coordinator is down".to_owned(),
                ));
            }
        }
    }

    fn elect_leader(
        &self,
        election: &str,
        session: SessionId,
        candidate: &str,
        timeout: Duration,
    ) -> Result<bool, GBError> {
        let key = format!("{}{}", ELECTION_PREFIX, election);
        let deadline = Instant::now() + timeout;
        loop {
            let since = self.revision()?;
            if self.create(&key, candidate.as_bytes().to_vec(), Some(session))? {
                info!("'{}' is now the leader of '{}'", candidate, election);
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            self.watch(&key, since, deadline - now)?;
        }
    }

    fn leader(&self, election: &str) -> Result<Option<String>, GBError> {
        let key = format!("{}{}", ELECTION_PREFIX, election);
        Ok(self.get(&key)?.map(|versioned| String::from_utf8_lossy(&versioned.data).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use crate::coordination::{CoordinationService, LocalCoordinator};
    use crate::error::GBError;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn create_if_absent_is_atomic() {
        let coordinator = Arc::new(LocalCoordinator::default());
        let winners: usize = (0..8)
            .map(|i| {
                let coordinator = Arc::clone(&coordinator);
                std::thread::spawn(move || {
                    coordinator.create("/claim/0", vec![i], None).expect("create failed")
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().expect("thread panicked"))
            .filter(|&created| created)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn versions_guard_updates() {
        let coordinator = LocalCoordinator::default();
        assert_eq!(coordinator.put("/a", vec![1]).unwrap(), 1);
        assert!(!coordinator.update_if_version("/a", vec![2], 7).unwrap());
        assert!(coordinator.update_if_version("/a", vec![2], 1).unwrap());
        let current = coordinator.get("/a").unwrap().expect("entry missing");
        assert_eq!(current.data, vec![2]);
        assert_eq!(current.version, 2);
        assert!(!coordinator.update_if_version("/missing", vec![], 1).unwrap());
    }

    #[test]
    fn ephemeral_entries_die_with_their_session() {
        let coordinator = LocalCoordinator::default();
        let session = coordinator.open_session().unwrap();
        assert!(coordinator.create("/alive/3", vec![], Some(session)).unwrap());
        assert!(coordinator.create("/persistent", vec![], None).unwrap());
        coordinator.close_session(session).unwrap();
        assert_eq!(coordinator.children("/").unwrap(), vec!["/persistent".to_owned()]);
        assert!(coordinator.create("/alive/4", vec![], Some(session)).is_err());
    }

    #[test]
    fn watch_wakes_on_change() {
        let coordinator = Arc::new(LocalCoordinator::default());
        let since = coordinator.revision().unwrap();
        let writer = {
            let coordinator = Arc::clone(&coordinator);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                coordinator.put("/jobs/1/state", vec![1]).unwrap();
            })
        };
        let revision = coordinator.watch("/jobs/1", since, Duration::from_secs(10)).unwrap();
        assert!(revision > since);
        writer.join().unwrap();

        // Changes elsewhere do not count.
        let since = coordinator.revision().unwrap();
        coordinator.put("/other", vec![]).unwrap();
        let revision = coordinator.watch("/jobs", since, Duration::from_millis(10)).unwrap();
        assert_eq!(revision, since + 1);
        assert!(coordinator.children("/jobs").unwrap().len() == 1);
    }

    #[test]
    fn watch_sees_deletions() {
        let coordinator = LocalCoordinator::default();
        coordinator.put("/workers/1", vec![]).unwrap();
        let since = coordinator.revision().unwrap();
        assert!(coordinator.delete("/workers/1").unwrap());
        let revision = coordinator.watch("/workers", since, Duration::from_secs(10)).unwrap();
        assert!(revision > since);
    }

    #[test]
    fn leader_fails_over_to_standby() {
        let coordinator = Arc::new(LocalCoordinator::default());
        let first = coordinator.open_session().unwrap();
        let second = coordinator.open_session().unwrap();
        let timeout = Duration::from_millis(10);
        assert!(coordinator.elect_leader("master", first, "m1", timeout).unwrap());
        assert!(!coordinator
            .elect_leader("master", second, "m2", Duration::from_millis(10))
            .unwrap());
        assert_eq!(coordinator.leader("master").unwrap(), Some("m1".to_owned()));

        let standby = {
            let coordinator = Arc::clone(&coordinator);
            std::thread::spawn(move || {
                coordinator.elect_leader("master", second, "m2", Duration::from_secs(10))
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        coordinator.close_session(first).unwrap();
        assert_eq!(standby.join().unwrap(), Ok(true));
        assert_eq!(coordinator.leader("master").unwrap(), Some("m2".to_owned()));
    }

    #[test]
    fn unavailable_service_fails_calls() {
        let coordinator = LocalCoordinator::default();
        coordinator.set_available(false);
        assert!(matches!(coordinator.get("/a"), Err(GBError::CoordinationUnavailable(_))));
        coordinator.set_available(true);
        assert_eq!(coordinator.get("/a").unwrap(), None);
    }
}
