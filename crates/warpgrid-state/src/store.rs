//! ProfileStore: redb-backed persistence of execution profiles.
//!
//! Profiles are stored per (worker, implementation) so a worker that comes
//! back after a restart, or a cloud VM of a known type, starts with what was
//! already learned about it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;
use warp_core::{CoreId, ImplementationId, Profile};

use crate::error::{StateError, StateResult};
use crate::tables::PROFILES;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn profile_key(worker: &str, implementation: ImplementationId) -> String {
    format!("{worker}/{}:{}", implementation.core.0, implementation.index)
}

fn parse_key(key: &str) -> Option<(&str, ImplementationId)> {
    let (worker, rest) = key.rsplit_once('/')?;
    let (core, index) = rest.split_once(':')?;
    Some((
        worker,
        ImplementationId {
            core: CoreId(core.parse().ok()?),
            index: index.parse().ok()?,
        },
    ))
}

/// Thread-safe profile store backed by redb.
#[derive(Clone)]
pub struct ProfileStore {
    db: Arc<Database>,
}

impl ProfileStore {
    /// Open (or create) a persistent profile store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "profile store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory profile store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory profile store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(PROFILES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or replace the profile of one implementation on one worker.
    pub fn put_profile(
        &self,
        worker: &str,
        implementation: ImplementationId,
        profile: &Profile,
    ) -> StateResult<()> {
        let key = profile_key(worker, implementation);
        let value = serde_json::to_vec(profile).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PROFILES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, executions = profile.executions, "profile stored");
        Ok(())
    }

    pub fn get_profile(
        &self,
        worker: &str,
        implementation: ImplementationId,
    ) -> StateResult<Option<Profile>> {
        let key = profile_key(worker, implementation);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROFILES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let profile: Profile =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    /// Merge `delta` into the stored profile, creating it if absent.
    pub fn accumulate_profile(
        &self,
        worker: &str,
        implementation: ImplementationId,
        delta: &Profile,
    ) -> StateResult<Profile> {
        let key = profile_key(worker, implementation);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let merged;
        {
            let mut table = txn.open_table(PROFILES).map_err(map_err!(Table))?;
            let mut current = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice::<Profile>(guard.value())
                    .map_err(map_err!(Deserialize))?,
                None => Profile::default(),
            };
            current.accumulate(delta);
            let value = serde_json::to_vec(&current).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            merged = current;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(merged)
    }

    /// All stored profiles of a worker.
    pub fn worker_profiles(&self, worker: &str) -> StateResult<HashMap<ImplementationId, Profile>> {
        let prefix = format!("{worker}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROFILES).map_err(map_err!(Table))?;
        let mut results = HashMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let key = key.value();
            if !key.starts_with(&prefix) {
                continue;
            }
            if let Some((owner, implementation)) = parse_key(key)
                && owner == worker
            {
                let profile: Profile =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.insert(implementation, profile);
            }
        }
        Ok(results)
    }

    /// Names of all workers with at least one stored profile.
    pub fn workers(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROFILES).map_err(map_err!(Table))?;
        let mut names = std::collections::BTreeSet::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if let Some((worker, _)) = parse_key(key.value()) {
                names.insert(worker.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Delete every profile of a worker. Returns how many were removed.
    pub fn delete_worker(&self, worker: &str) -> StateResult<u32> {
        let prefix = format!("{worker}/");
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(PROFILES).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    let owned = k.starts_with(&prefix)
                        && parse_key(&k).is_some_and(|(owner, _)| owner == worker);
                    owned.then_some(k)
                })
                .collect()
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut count = 0;
        {
            let mut table = txn.open_table(PROFILES).map_err(map_err!(Table))?;
            for key in &keys {
                if table.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                    count += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%worker, count, "worker profiles deleted");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(avg: i64) -> Profile {
        let mut p = Profile::default();
        p.record_execution(avg);
        p
    }

    #[test]
    fn key_roundtrip() {
        let id = ImplementationId::new(3, 1);
        let key = profile_key("vm/a", id);
        assert_eq!(key, "vm/a/3:1");
        assert_eq!(parse_key(&key), Some(("vm/a", id)));
        assert_eq!(parse_key("nonsense"), None);
    }

    #[test]
    fn put_and_get() {
        let store = ProfileStore::open_in_memory().unwrap();
        let id = ImplementationId::new(0, 0);
        assert!(store.get_profile("w1", id).unwrap().is_none());
        store.put_profile("w1", id, &sample(40)).unwrap();
        let got = store.get_profile("w1", id).unwrap().unwrap();
        assert_eq!(got.avg_time, 40);
        assert_eq!(got.executions, 1);
    }

    #[test]
    fn accumulate_merges() {
        let store = ProfileStore::open_in_memory().unwrap();
        let id = ImplementationId::new(1, 0);
        store.accumulate_profile("w1", id, &sample(10)).unwrap();
        let merged = store.accumulate_profile("w1", id, &sample(30)).unwrap();
        assert_eq!(merged.executions, 2);
        assert_eq!(merged.avg_time, 20);
        assert_eq!(store.get_profile("w1", id).unwrap().unwrap(), merged);
    }

    #[test]
    fn per_worker_listing_and_delete() {
        let store = ProfileStore::open_in_memory().unwrap();
        store.put_profile("w1", ImplementationId::new(0, 0), &sample(1)).unwrap();
        store.put_profile("w1", ImplementationId::new(1, 0), &sample(2)).unwrap();
        store.put_profile("w2", ImplementationId::new(0, 0), &sample(3)).unwrap();

        let w1 = store.worker_profiles("w1").unwrap();
        assert_eq!(w1.len(), 2);
        assert_eq!(w1[&ImplementationId::new(1, 0)].avg_time, 2);
        assert_eq!(store.workers().unwrap(), vec!["w1".to_string(), "w2".to_string()]);

        assert_eq!(store.delete_worker("w1").unwrap(), 2);
        assert!(store.worker_profiles("w1").unwrap().is_empty());
        assert_eq!(store.worker_profiles("w2").unwrap().len(), 1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.redb");
        let id = ImplementationId::new(2, 1);
        {
            let store = ProfileStore::open(&path).unwrap();
            store.put_profile("vm-1", id, &sample(77)).unwrap();
        }
        let store = ProfileStore::open(&path).unwrap();
        assert_eq!(store.get_profile("vm-1", id).unwrap().unwrap().avg_time, 77);
    }
}
