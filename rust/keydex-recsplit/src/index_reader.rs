//! Per-caller lookup front end over a shared [`Index`].

use std::sync::{Arc, Mutex, PoisonError};

use keydex_common::Result;
use xxhash_rust::xxh3::Xxh3;

use crate::index::Index;

/// Hashing scratchpad bound to one index. The streaming hasher keeps
/// mutable state across calls, so it is guarded by a lock; many readers
/// may share one immutable [`Index`] concurrently.
pub struct IndexReader {
    hasher: Mutex<Xxh3>,
    index: Option<Arc<Index>>,
}

impl IndexReader {
    pub fn new(index: Arc<Index>) -> IndexReader {
        IndexReader {
            hasher: Mutex::new(Xxh3::with_seed(index.salt() as u64)),
            index: Some(index),
        }
    }

    /// Reader without an index. Every lookup yields the sentinel `0`;
    /// callers must check index presence before trusting the value.
    pub fn absent() -> IndexReader {
        IndexReader {
            hasher: Mutex::new(Xxh3::with_seed(0)),
            index: None,
        }
    }

    pub fn index(&self) -> Option<&Arc<Index>> {
        self.index.as_ref()
    }

    fn sum(&self, key: &[u8]) -> (u64, u64) {
        let mut hasher = self.hasher.lock().unwrap_or_else(PoisonError::into_inner);
        hasher.reset();
        hasher.update(key);
        let digest = hasher.digest128();
        ((digest >> 64) as u64, digest as u64)
    }

    /// Perfect-hash value of `key` in `[0, key_count)`, or `0` when no
    /// index is bound.
    pub fn lookup(&self, key: &[u8]) -> Result<u64> {
        let (bucket_hash, fingerprint) = self.sum(key);
        match &self.index {
            Some(index) => index.lookup(bucket_hash, fingerprint),
            None => Ok(0),
        }
    }
}
