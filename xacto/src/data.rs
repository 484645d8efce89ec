//! The data objects that flow through the store: blobs, keys and versions.
//!
//! Blobs are immutable, reference-counted byte buffers. Keys wrap a blob
//! together with its precomputed hash, which also selects the store bucket.
//! A version pairs a value blob with the transaction that created it and is
//! the unit the per-key version chains are built from.

use std::sync::Arc;

use bytes::Bytes;

use crate::store::NUM_BUCKETS;
use crate::transaction::Transaction;

/// An immutable byte buffer with shared ownership. Cloning a blob is cheap
/// and shares the backing storage; the storage is freed when the last
/// holder is dropped.
///
/// A blob of size 0 is the distinguished "null blob", which represents the
/// absence of a value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Blob(Bytes);

impl Blob {
    /// Creates a blob by copying the given content.
    pub fn new(content: &[u8]) -> Self {
        Blob(Bytes::copy_from_slice(content))
    }

    /// The null blob: size 0, no content.
    pub fn null() -> Self {
        Blob(Bytes::new())
    }

    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn content(&self) -> &[u8] {
        &self.0
    }

    /// A shared handle to the backing bytes.
    pub fn bytes(&self) -> Bytes {
        self.0.clone()
    }

    /// Deterministic djb2 hash of the content, folded into the bucket
    /// range `[0, NUM_BUCKETS)`.
    pub fn hash(&self) -> u64 {
        let mut hash: u64 = 5381;
        for &byte in self.0.iter() {
            // hash * 33 + byte
            hash = hash.wrapping_mul(33).wrapping_add(u64::from(byte));
        }
        hash % NUM_BUCKETS as u64
    }
}

impl From<Bytes> for Blob {
    fn from(bytes: Bytes) -> Self {
        Blob(bytes)
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Blob(Bytes::from(bytes))
    }
}

/// A store key: a blob plus its precomputed hash. Two keys are equal iff
/// their hashes match and their blob contents compare equal.
#[derive(Clone, Debug)]
pub struct Key {
    blob: Blob,
    hash: u64,
}

impl Key {
    pub fn new(blob: Blob) -> Self {
        let hash = blob.hash();
        Key { blob, hash }
    }

    pub fn blob(&self) -> &Blob {
        &self.blob
    }

    /// The bucket this key hashes into.
    pub fn bucket(&self) -> usize {
        self.hash as usize
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.blob == other.blob
    }
}

impl Eq for Key {}

/// One entry in a key's version chain: a value blob together with the
/// transaction that created it. A transaction appears at most once as
/// creator in any single chain.
#[derive(Clone, Debug)]
pub struct Version {
    creator: Arc<Transaction>,
    blob: Blob,
}

impl Version {
    pub fn new(creator: Arc<Transaction>, blob: Blob) -> Self {
        Version { creator, blob }
    }

    pub fn creator(&self) -> &Arc<Transaction> {
        &self.creator
    }

    pub fn blob(&self) -> &Blob {
        &self.blob
    }
}
