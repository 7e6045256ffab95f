//! Key-value handle used by the versioned store.
//!
//! The surface is the small subset of a remote structure server the store
//! needs: sets, hashes, lists and prefix listing for reads, and an atomic
//! pipeline of mutations for writes.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

use crate::storage::traits::StorageError;

/// One mutation in a [`KvBackend::pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    /// Sets one field of a hash.
    HSet { key: String, field: String, value: String },
    /// Adds a member to a set.
    SAdd { key: String, member: String },
    /// Removes a member from a set.
    SRem { key: String, member: String },
    /// Deletes a key of any kind.
    Delete { key: String },
    /// Pushes onto the head of a list.
    LPush { key: String, value: String },
    /// Removes every occurrence of a value from a list.
    LRem { key: String, value: String },
}

/// A shared key-value handle.
///
/// Implementations must apply a pipeline atomically: a concurrent reader
/// sees either none or all of its operations.
pub trait KvBackend: Send + Sync {
    fn smembers(&self, key: &str) -> Result<BTreeSet<String>, StorageError>;

    fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, StorageError>;

    /// The whole list, head first.
    fn lrange(&self, key: &str) -> Result<Vec<String>, StorageError>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    fn pipeline(&self, ops: Vec<KvOp>) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
struct MemoryKvState {
    sets: HashMap<String, BTreeSet<String>>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
}

impl MemoryKvState {
    fn apply(&mut self, op: KvOp) {
        match op {
            KvOp::HSet { key, field, value } => {
                self.hashes.entry(key).or_default().insert(field, value);
            }
            KvOp::SAdd { key, member } => {
                self.sets.entry(key).or_default().insert(member);
            }
            KvOp::SRem { key, member } => {
                if let Some(set) = self.sets.get_mut(&key) {
                    set.remove(&member);
                    if set.is_empty() {
                        self.sets.remove(&key);
                    }
                }
            }
            KvOp::Delete { key } => {
                self.sets.remove(&key);
                self.hashes.remove(&key);
                self.lists.remove(&key);
            }
            KvOp::LPush { key, value } => {
                self.lists.entry(key).or_default().push_front(value);
            }
            KvOp::LRem { key, value } => {
                if let Some(list) = self.lists.get_mut(&key) {
                    list.retain(|v| *v != value);
                    if list.is_empty() {
                        self.lists.remove(&key);
                    }
                }
            }
        }
    }
}

/// In-process [`KvBackend`].
#[derive(Debug, Default)]
pub struct MemoryKv {
    state: Mutex<MemoryKvState>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, context: &'static str) -> Result<std::sync::MutexGuard<'_, MemoryKvState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::BackendError(format!("poisoned lock: {context}")))
    }
}

impl KvBackend for MemoryKv {
    fn smembers(&self, key: &str) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.lock("kv.smembers")?.sets.get(key).cloned().unwrap_or_default())
    }

    fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, StorageError> {
        Ok(self.lock("kv.hgetall")?.hashes.get(key).cloned().unwrap_or_default())
    }

    fn lrange(&self, key: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .lock("kv.lrange")?
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let state = self.lock("kv.keys")?;
        let mut keys: Vec<String> = state
            .sets
            .keys()
            .chain(state.hashes.keys())
            .chain(state.lists.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn pipeline(&self, ops: Vec<KvOp>) -> Result<(), StorageError> {
        let mut state = self.lock("kv.pipeline")?;
        for op in ops {
            state.apply(op);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_and_reads() {
        let kv = MemoryKv::new();
        kv.pipeline(vec![
            KvOp::SAdd { key: "s".into(), member: "a".into() },
            KvOp::HSet { key: "h".into(), field: "f".into(), value: "v".into() },
            KvOp::LPush { key: "l".into(), value: "1".into() },
            KvOp::LPush { key: "l".into(), value: "2".into() },
        ])
        .unwrap();
        assert!(kv.smembers("s").unwrap().contains("a"));
        assert_eq!(kv.hgetall("h").unwrap().get("f").map(String::as_str), Some("v"));
        assert_eq!(kv.lrange("l").unwrap(), vec!["2", "1"]);
        assert_eq!(kv.keys_with_prefix("").unwrap(), vec!["h", "l", "s"]);
    }

    #[test]
    fn test_removal_drops_empty_keys() {
        let kv = MemoryKv::new();
        kv.pipeline(vec![
            KvOp::SAdd { key: "s".into(), member: "a".into() },
            KvOp::LPush { key: "l".into(), value: "x".into() },
        ])
        .unwrap();
        kv.pipeline(vec![
            KvOp::SRem { key: "s".into(), member: "a".into() },
            KvOp::LRem { key: "l".into(), value: "x".into() },
        ])
        .unwrap();
        assert!(kv.keys_with_prefix("").unwrap().is_empty());
    }
}
