//! The transactional object store: a fixed-size hash table mapping keys to
//! per-key version chains.
//!
//! Each chain is kept sorted by creator transaction ID. A garbage
//! collection pass runs at the start of every operation: all committed
//! versions except the newest are dropped, and an aborted version takes
//! itself and every later version with it, aborting their still-pending
//! creators. After the pass a chain is at most one committed version
//! followed by pending versions in strictly increasing creator-ID order.
//!
//! A put or get is then only permitted if the performing transaction's ID
//! is greater than or equal to every creator ID already in the chain;
//! otherwise the operation has no effect and the transaction is aborted.
//! Appending behind pending versions makes the writer dependent on each of
//! their creators, which is what ties the commit order to the ID order.
//!
//! One map-level mutex guards all buckets and chains, so the collection
//! pass and the version-chain update of an operation form a single
//! critical section. The lock order is map mutex before transaction
//! mutexes; transaction operations never take the map mutex.

use std::cmp::Ordering;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::data::{Blob, Key, Version};
use crate::transaction::{Status, Transaction};

/// Number of buckets in the table. The table never resizes.
pub const NUM_BUCKETS: usize = 8;

/// One table entry: a key and its version chain, ordered by creator ID.
struct Entry {
    key: Key,
    versions: Vec<Version>,
}

/// The store. Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Store {
    map: Mutex<[Vec<Entry>; NUM_BUCKETS]>,
}

impl Store {
    pub fn new() -> Self {
        Store { map: Mutex::new(Default::default()) }
    }

    /// Put a key/value mapping in the store on behalf of `txn`. A null
    /// blob value amounts to deleting any existing mapping.
    ///
    /// Returns the post-operation status of `txn`: `Pending` if the write
    /// was recorded, `Aborted` if it conflicted with the serialization
    /// order (in which case nothing was added).
    pub fn put(&self, txn: &Arc<Transaction>, key: Key, value: Blob) -> Status {
        let mut map = self.map.lock();
        let entry = Self::find_or_insert(&mut map, key);
        Self::collect_garbage(entry);
        Self::add_version(entry, txn, value);
        drop(map);
        txn.status()
    }

    /// Get the value associated with a key on behalf of `txn`. Yields the
    /// null blob if there is no value. The read is recorded in the chain
    /// as a version carrying the observed value, so that later writers
    /// become dependent on `txn`.
    ///
    /// Returns the post-operation status of `txn` together with one owned
    /// handle on the observed blob.
    pub fn get(&self, txn: &Arc<Transaction>, key: Key) -> (Status, Blob) {
        let mut map = self.map.lock();
        let entry = Self::find_or_insert(&mut map, key);
        Self::collect_garbage(entry);
        let value = match entry.versions.last() {
            Some(version) => version.blob().clone(),
            None => Blob::null(),
        };
        Self::add_version(entry, txn, value.clone());
        drop(map);
        (txn.status(), value)
    }

    /// Number of keys currently in the table.
    pub fn key_count(&self) -> usize {
        self.map.lock().iter().map(|bucket| bucket.len()).sum()
    }

    /// Number of versions currently held across all chains.
    pub fn version_count(&self) -> usize {
        self.map.lock().iter().flatten().map(|entry| entry.versions.len()).sum()
    }

    /// Walks the key's bucket: an entry with an equal key is reused (the
    /// input key is dropped), otherwise a new empty entry is appended.
    fn find_or_insert(map: &mut [Vec<Entry>; NUM_BUCKETS], key: Key) -> &mut Entry {
        let bucket = &mut map[key.bucket()];
        let index = match bucket.iter().position(|entry| entry.key == key) {
            Some(index) => index,
            None => {
                bucket.push(Entry { key, versions: Vec::new() });
                bucket.len() - 1
            }
        };
        &mut bucket[index]
    }

    /// The garbage collection pass over one chain. Creator statuses are
    /// read once up front and the rules applied to that snapshot, which
    /// makes the pass deterministic and idempotent even if a creator
    /// reaches a terminal state concurrently.
    fn collect_garbage(entry: &mut Entry) {
        let statuses: Vec<Status> =
            entry.versions.iter().map(|version| version.creator().status()).collect();

        // An aborted version is dropped together with every later version,
        // and the still-pending creators among those are aborted too.
        if let Some(first) = statuses.iter().position(|status| *status == Status::Aborted) {
            let doomed = entry.versions.split_off(first);
            debug!("gc dropping {} version(s) behind aborted transaction {}", doomed.len(), doomed[0].creator().id());
            for (version, status) in doomed.iter().zip(&statuses[first..]).skip(1) {
                if *status == Status::Pending {
                    version.creator().abort();
                }
            }
        }

        // Among the survivors, keep only the newest committed version.
        let live = &statuses[..entry.versions.len()];
        if let Some(newest) = live.iter().rposition(|status| *status == Status::Committed) {
            let mut index = 0;
            entry.versions.retain(|_| {
                let keep = index == newest || live[index] != Status::Committed;
                index += 1;
                keep
            });
        }
    }

    /// Apply the write rule to a freshly collected chain: a later writer
    /// already in the chain aborts `txn`; a version `txn` created itself
    /// is overwritten in place; otherwise `txn` picks up a dependency on
    /// every pending predecessor and a new version is appended.
    fn add_version(entry: &mut Entry, txn: &Arc<Transaction>, value: Blob) {
        let (last_id, last_status) = match entry.versions.last() {
            Some(last) => (last.creator().id(), last.creator().status()),
            None => {
                entry.versions.push(Version::new(Arc::clone(txn), value));
                return;
            }
        };
        // An abort may land between the collection pass and here; treat it
        // like any other conflict and let the next pass clean the chain.
        if last_status == Status::Aborted {
            debug!("transaction {} hit an aborted version, aborting", txn.id());
            txn.abort();
            return;
        }
        match last_id.cmp(&txn.id()) {
            // A transaction with a greater ID already touched this key:
            // the write cannot be serialized in ID order.
            Ordering::Greater => {
                debug!("transaction {} conflicts with later transaction {}, aborting", txn.id(), last_id);
                txn.abort();
            }
            Ordering::Equal => {
                let end = entry.versions.len() - 1;
                entry.versions[end] = Version::new(Arc::clone(txn), value);
            }
            Ordering::Less => {
                for version in entry.versions.iter() {
                    if version.creator().status() == Status::Pending {
                        txn.add_dependency(version.creator());
                    }
                }
                entry.versions.push(Version::new(Arc::clone(txn), value));
            }
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
