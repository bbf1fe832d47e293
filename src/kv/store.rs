//! The transactional ordered key-value store contract, and the in-memory
//! reference store.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::blob::Bytes;
use crate::error::Result;

/// The view a transaction body sees: reads observe a snapshot plus the
/// transaction's own writes; writes are buffered until commit.
pub trait Txn {
    fn get(&self, key: &str) -> Result<Option<Bytes>>;

    fn set(&mut self, key: &str, value: Bytes) -> Result<()>;

    fn delete(&mut self, key: &str) -> Result<()>;

    /// Key-ordered pairs in `[lo, hi)`.
    fn range(&self, lo: &str, hi: &str) -> Result<Vec<(String, Bytes)>>;
}

/// A transactional ordered key-value store. Keys are byte strings ordered
/// lexicographically. Writers are serialized by the store; a transaction
/// body that returns an error is discarded without effect.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Set a key, or delete it when `value` is `None`.
    fn set(&self, key: &str, value: Option<Bytes>) -> Result<()>;

    fn range(&self, lo: &str, hi: &str) -> Result<Vec<(String, Bytes)>>;

    /// Run `body` against a snapshot and commit its writes atomically.
    fn transact<T>(&self, body: impl FnOnce(&mut dyn Txn) -> Result<T>) -> Result<T>;
}

/// The volatile reference store: a `BTreeMap` behind a lock. Transactions
/// hold the write lock for their duration, which serializes writers and
/// gives readers consistent snapshots for free.
#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<Bytes>) -> Result<()> {
        let mut map = self.map.write();
        match value {
            Some(value) => {
                map.insert(key.to_string(), value);
            }
            None => {
                map.remove(key);
            }
        }
        Ok(())
    }

    fn range(&self, lo: &str, hi: &str) -> Result<Vec<(String, Bytes)>> {
        let map = self.map.read();
        Ok(range_of(&map, lo, hi)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn transact<T>(&self, body: impl FnOnce(&mut dyn Txn) -> Result<T>) -> Result<T> {
        let mut map = self.map.write();
        let mut txn = MemoryTxn {
            base: &map,
            writes: BTreeMap::new(),
        };
        let out = body(&mut txn)?;
        let writes = txn.writes;
        for (key, value) in writes {
            match value {
                Some(value) => {
                    map.insert(key, value);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(out)
    }
}

fn range_of<'m>(
    map: &'m BTreeMap<String, Bytes>,
    lo: &str,
    hi: &str,
) -> impl Iterator<Item = (&'m String, &'m Bytes)> {
    map.range::<str, _>((Bound::Included(lo), Bound::Excluded(hi)))
}

/// Buffered writes over a snapshot of the map.
struct MemoryTxn<'s> {
    base: &'s BTreeMap<String, Bytes>,
    writes: BTreeMap<String, Option<Bytes>>,
}

impl Txn for MemoryTxn<'_> {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        if let Some(write) = self.writes.get(key) {
            return Ok(write.clone());
        }
        Ok(self.base.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Bytes) -> Result<()> {
        self.writes.insert(key.to_string(), Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.writes.insert(key.to_string(), None);
        Ok(())
    }

    fn range(&self, lo: &str, hi: &str) -> Result<Vec<(String, Bytes)>> {
        let mut merged: BTreeMap<&str, Option<&Bytes>> = range_of(self.base, lo, hi)
            .map(|(k, v)| (k.as_str(), Some(v)))
            .collect();
        for (k, v) in self
            .writes
            .range::<str, _>((Bound::Included(lo), Bound::Excluded(hi)))
        {
            merged.insert(k.as_str(), v.as_ref());
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k.to_string(), v.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn bytes(s: &str) -> Bytes {
        Bytes::copy_from(s.as_bytes())
    }

    #[test]
    fn get_set_delete() {
        let store = MemoryStore::new();
        store.set("k", Some(bytes("v"))).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(bytes("v")));
        store.set("k", None).unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn range_is_half_open_and_ordered() {
        let store = MemoryStore::new();
        for k in ["a/1", "a/2", "a/3", "b/1"] {
            store.set(k, Some(bytes(k))).unwrap();
        }
        let got = store.range("a/", "a0").unwrap();
        let keys: Vec<&str> = got.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["a/1", "a/2", "a/3"]);
    }

    #[test]
    fn transact_commits_atomically() {
        let store = MemoryStore::new();
        store
            .transact(|txn| {
                txn.set("a", bytes("1"))?;
                txn.set("b", bytes("2"))?;
                assert_eq!(txn.get("a")?, Some(bytes("1")));
                Ok(())
            })
            .unwrap();
        assert_eq!(store.get("a").unwrap(), Some(bytes("1")));
        assert_eq!(store.get("b").unwrap(), Some(bytes("2")));
    }

    #[test]
    fn failed_transact_discards_writes() {
        let store = MemoryStore::new();
        store.set("keep", Some(bytes("old"))).unwrap();
        let err: Result<(), _> = store.transact(|txn| {
            txn.set("keep", bytes("new"))?;
            txn.set("drop", bytes("x"))?;
            Err(Error::Invalid)
        });
        assert!(err.is_err());
        assert_eq!(store.get("keep").unwrap(), Some(bytes("old")));
        assert_eq!(store.get("drop").unwrap(), None);
    }

    #[test]
    fn txn_range_sees_buffered_writes_and_deletes() {
        let store = MemoryStore::new();
        store.set("p/1", Some(bytes("1"))).unwrap();
        store.set("p/2", Some(bytes("2"))).unwrap();
        store
            .transact(|txn| {
                txn.delete("p/1")?;
                txn.set("p/3", bytes("3"))?;
                let keys: Vec<String> =
                    txn.range("p/", "p0")?.into_iter().map(|(k, _)| k).collect();
                assert_eq!(keys, ["p/2", "p/3"]);
                Ok(())
            })
            .unwrap();
    }
}
