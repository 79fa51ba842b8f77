//! In-process reference `StorageEngine`. Backs unit tests and a
//! single-node "no external engine installed" dev mode; the real engine
//! is an opaque external collaborator (spec §1, §6.3).

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use super::{Property, StorageEngine, Value};
use crate::error::{Error, Result};

type VersionUpdateCallback = Box<dyn Fn(i64, String) + Send + Sync>;

#[derive(Default)]
struct State {
    raw: HashMap<Vec<u8>, Vec<u8>>,
    counters: HashMap<Vec<u8>, i64>,
    hashes: HashMap<Vec<u8>, HashMap<Vec<u8>, Vec<u8>>>,
    lists: HashMap<Vec<u8>, VecDeque<Vec<u8>>>,
    sets: HashMap<Vec<u8>, HashSet<Vec<u8>>>,
    zsets: HashMap<Vec<u8>, HashMap<Vec<u8>, i64>>,
    expirations: HashMap<Vec<u8>, Instant>,
}

impl State {
    fn is_expired(&self, key: &[u8]) -> bool {
        self.expirations
            .get(key)
            .is_some_and(|at| Instant::now() >= *at)
    }
}

pub struct MemoryEngine {
    state: RwLock<State>,
    version_update: Mutex<Option<VersionUpdateCallback>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            version_update: Mutex::new(None),
        }
    }

    /// Test/dev-mode hook: the reference engine has no upstream of its own
    /// to watch, so callers that want to exercise follower catch-up fire
    /// the registered callback directly instead.
    pub fn simulate_version_update(&self, db_hash: i64, version: impl Into<String>) {
        if let Some(callback) = self.version_update.lock().as_ref() {
            callback(db_hash, version.into());
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for MemoryEngine {
    fn close(&self) {}

    fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        let state = self.state.read();
        if state.is_expired(key) {
            return Ok(None);
        }
        if let Some(value) = state.counters.get(key) {
            return Ok(Some(Value::Counter(*value)));
        }
        Ok(state.raw.get(key).cloned().map(Value::Raw))
    }

    fn set(&self, key: &[u8], data: Vec<u8>) -> Result<()> {
        let mut state = self.state.write();
        state.counters.remove(key);
        state.raw.insert(key.to_vec(), data);
        Ok(())
    }

    fn mset(&self, entries: &[(&[u8], Vec<u8>)]) -> Result<()> {
        let mut state = self.state.write();
        for (key, data) in entries {
            state.counters.remove(*key);
            state.raw.insert(key.to_vec(), data.clone());
        }
        Ok(())
    }

    fn delkey(&self, key: &[u8]) -> Result<()> {
        let mut state = self.state.write();
        state.raw.remove(key);
        state.counters.remove(key);
        state.hashes.remove(key);
        state.lists.remove(key);
        state.sets.remove(key);
        state.zsets.remove(key);
        state.expirations.remove(key);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        let state = self.state.read();
        if state.is_expired(key) {
            return Ok(false);
        }
        Ok(state.raw.contains_key(key)
            || state.counters.contains_key(key)
            || state.hashes.contains_key(key)
            || state.lists.contains_key(key)
            || state.sets.contains_key(key)
            || state.zsets.contains_key(key))
    }

    fn expire(&self, key: &[u8], ttl_ms: u64) -> Result<()> {
        let mut state = self.state.write();
        state
            .expirations
            .insert(key.to_vec(), Instant::now() + Duration::from_millis(ttl_ms));
        Ok(())
    }

    fn ttl(&self, key: &[u8]) -> Result<Option<u64>> {
        let state = self.state.read();
        Ok(state.expirations.get(key).map(|at| {
            at.saturating_duration_since(Instant::now()).as_millis() as u64
        }))
    }

    fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .state
            .read()
            .hashes
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    fn hset(&self, key: &[u8], field: &[u8], value: Vec<u8>) -> Result<()> {
        self.state
            .write()
            .hashes
            .entry(key.to_vec())
            .or_default()
            .insert(field.to_vec(), value);
        Ok(())
    }

    fn hdel(&self, key: &[u8], field: &[u8]) -> Result<()> {
        if let Some(h) = self.state.write().hashes.get_mut(key) {
            h.remove(field);
        }
        Ok(())
    }

    fn hmget(&self, key: &[u8], fields: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>> {
        let state = self.state.read();
        let h = state.hashes.get(key);
        Ok(fields
            .iter()
            .map(|f| h.and_then(|h| h.get(*f)).cloned())
            .collect())
    }

    fn hmset(&self, key: &[u8], entries: &[(&[u8], Vec<u8>)]) -> Result<()> {
        let mut state = self.state.write();
        let h = state.hashes.entry(key.to_vec()).or_default();
        for (field, value) in entries {
            h.insert(field.to_vec(), value.clone());
        }
        Ok(())
    }

    fn hgetall(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .state
            .read()
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn hkeys(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .state
            .read()
            .hashes
            .get(key)
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn hlen(&self, key: &[u8]) -> Result<u64> {
        Ok(self
            .state
            .read()
            .hashes
            .get(key)
            .map(|h| h.len() as u64)
            .unwrap_or(0))
    }

    fn hexists(&self, key: &[u8], field: &[u8]) -> Result<bool> {
        Ok(self
            .state
            .read()
            .hashes
            .get(key)
            .is_some_and(|h| h.contains_key(field)))
    }

    fn lpush(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.state
            .write()
            .lists
            .entry(key.to_vec())
            .or_default()
            .push_front(value);
        Ok(())
    }

    fn rpush(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.state
            .write()
            .lists
            .entry(key.to_vec())
            .or_default()
            .push_back(value);
        Ok(())
    }

    fn lpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .state
            .write()
            .lists
            .get_mut(key)
            .and_then(|l| l.pop_front()))
    }

    fn rpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .state
            .write()
            .lists
            .get_mut(key)
            .and_then(|l| l.pop_back()))
    }

    fn lindex(&self, key: &[u8], index: i64) -> Result<Option<Vec<u8>>> {
        let state = self.state.read();
        let Some(list) = state.lists.get(key) else {
            return Ok(None);
        };
        let idx = if index < 0 {
            list.len().checked_sub((-index) as usize)
        } else {
            Some(index as usize)
        };
        Ok(idx.and_then(|i| list.get(i)).cloned())
    }

    fn llen(&self, key: &[u8]) -> Result<u64> {
        Ok(self
            .state
            .read()
            .lists
            .get(key)
            .map(|l| l.len() as u64)
            .unwrap_or(0))
    }

    fn lrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let state = self.state.read();
        let Some(list) = state.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as i64;
        let norm = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len)
            }
        };
        let start = norm(start);
        let stop = norm(stop) + 1;
        if start >= stop {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start) as usize)
            .cloned()
            .collect())
    }

    fn sadd(&self, key: &[u8], member: Vec<u8>) -> Result<()> {
        self.state
            .write()
            .sets
            .entry(key.to_vec())
            .or_default()
            .insert(member);
        Ok(())
    }

    fn sdel(&self, key: &[u8], member: &[u8]) -> Result<()> {
        if let Some(s) = self.state.write().sets.get_mut(key) {
            s.remove(member);
        }
        Ok(())
    }

    fn has_member(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        Ok(self
            .state
            .read()
            .sets
            .get(key)
            .is_some_and(|s| s.contains(member)))
    }

    fn members(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .state
            .read()
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn zadd(&self, key: &[u8], member: Vec<u8>, score: i64) -> Result<()> {
        self.state
            .write()
            .zsets
            .entry(key.to_vec())
            .or_default()
            .insert(member, score);
        Ok(())
    }

    fn zrange_by_score(&self, key: &[u8], min: i64, max: i64) -> Result<Vec<(Vec<u8>, i64)>> {
        if min > max {
            return Ok(Vec::new());
        }
        let state = self.state.read();
        let Some(zset) = state.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<(Vec<u8>, i64)> = zset
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        entries.sort_by_key(|(_, score)| *score);
        Ok(entries)
    }

    fn zrem_range_by_score(&self, key: &[u8], min: i64, max: i64) -> Result<u64> {
        if min > max {
            return Ok(0);
        }
        let mut state = self.state.write();
        let Some(zset) = state.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = zset.len();
        zset.retain(|_, score| !(*score >= min && *score <= max));
        Ok((before - zset.len()) as u64)
    }

    fn incrby(&self, key: &[u8], step: i64) -> Result<i64> {
        let mut state = self.state.write();
        if state.raw.contains_key(key) {
            return Err(Error::ValueTypeInvalid);
        }
        let entry = state.counters.entry(key.to_vec()).or_insert(0);
        *entry = entry.saturating_add(step);
        Ok(*entry)
    }

    fn ingest_base_sst(&self, _file: &Path) -> Result<()> {
        Ok(())
    }

    fn ingest_delta_sst(&self, _file: &Path, _scratch_dir: &Path) -> Result<()> {
        Ok(())
    }

    fn get_property(&self, property: Property) -> u64 {
        let state = self.state.read();
        match property {
            Property::SizeBytes => {
                (state.raw.values().map(|v| v.len()).sum::<usize>()) as u64
            }
            Property::ReadQps | Property::WriteQps | Property::ReadBytes | Property::WriteBytes => 0,
        }
    }

    fn on_version_update(&self, callback: Box<dyn Fn(i64, String) + Send + Sync>) {
        *self.version_update.lock() = Some(callback);
    }
}
