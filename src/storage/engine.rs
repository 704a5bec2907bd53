//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the key-value store shared by every client
//! connection. Values are binary-safe and may carry an absolute expiry
//! timestamp in epoch milliseconds.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Keys are spread over independent shards to reduce contention.
//! 2. **Lazy Expiry**: An expired key is removed the next time it is read.
//! 3. **No Active Reaper**: Expired keys that are never read again stay in
//!    memory until the process exits.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The check-expire-delete sequence of a read and the insert of a write each
//! run under their shard's write lock, so they are atomic with respect to
//! every other operation on the same key.

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// Returns the current wall-clock time in epoch milliseconds.
pub fn current_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A stored value with optional absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// Absolute expiry in epoch milliseconds (None or 0 = never expires)
    pub expires_at_ms: Option<i64>,
}

impl Entry {
    pub fn new(value: Bytes, expires_at_ms: Option<i64>) -> Self {
        Self {
            value,
            expires_at_ms,
        }
    }

    /// Checks if this entry is logically absent at `now_ms`.
    #[inline]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        matches!(self.expires_at_ms, Some(exp) if exp != 0 && exp < now_ms)
    }
}

/// A single shard containing a portion of the key-value pairs.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<Bytes, Entry>>,
}

impl Shard {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, Entry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time counters for the storage engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Keys currently held, including expired ones not yet reaped
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    /// Entries removed by lazy expiry
    pub expired: u64,
}

/// The key-value store shared across all client connections.
///
/// Wrap it in an `Arc` and hand a clone to each connection task. The map
/// itself is never exposed; all access goes through `set` and `get`.
///
/// # Example
///
/// ```
/// use snapkv::storage::{current_time_ms, StorageEngine};
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"), None);
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
///
/// // Expires one minute from now
/// engine.set(Bytes::from("session"), Bytes::from("abc123"), Some(current_time_ms() + 60_000));
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,
    key_count: AtomicU64,
    get_count: AtomicU64,
    set_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Inserts or overwrites a key.
    ///
    /// The new entry always replaces the old one wholesale: omitting
    /// `expires_at_ms` makes the key permanent even if it previously had an
    /// expiry.
    ///
    /// # Returns
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was replaced.
    pub fn set(&self, key: Bytes, value: Bytes, expires_at_ms: Option<i64>) -> bool {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.shard(&key).write();
        let is_new = data
            .insert(key, Entry::new(value, expires_at_ms))
            .is_none();

        if is_new {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }

        is_new
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired; an expired key
    /// is removed as part of the same call.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_at(key, current_time_ms())
    }

    /// Like [`get`](Self::get), judging expiry against `now_ms`.
    pub fn get_at(&self, key: &[u8], now_ms: i64) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.shard(key);

        // Fast path under the read lock
        {
            let data = shard.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired_at(now_ms) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: re-check under the write lock, another writer may have replaced it
        let mut data = shard.write();
        let expired = match data.get(key) {
            Some(entry) => entry.is_expired_at(now_ms),
            None => return None,
        };

        if expired {
            data.remove(key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        data.get(key).map(|entry| entry.value.clone())
    }

    /// Returns the number of keys held, including expired keys not yet read.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}
