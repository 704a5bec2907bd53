//! Storage Engine Module
//!
//! The in-memory key-value store: a sharded map from key to value with an
//! optional absolute expiry per key.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Sharded Storage**: 64 independent shards reduce lock contention
//! - **Absolute Expiry**: Keys expire at an epoch-millisecond timestamp
//! - **Lazy Expiry**: Expired keys are removed when next read
//!
//! There is no background sweeper. A key that expires and is never read again
//! keeps its memory until the process exits.

pub mod engine;

pub use engine::{current_time_ms, Entry, StorageEngine, StorageStats};
