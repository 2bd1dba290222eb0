//! Shared ephemeral store abstraction with in-memory and Redis backends.
//!
//! This module provides a trait [`EphemeralStore`] and two implementations:
//! [`InMemoryStore`] for local, in-process state, and [`RedisStore`] for a
//! shared low-latency store across processes.
//!
//! The engine keeps its high-frequency, live-socket-derived state here:
//! presence sets (the sole source of truth for room occupancy), the per-user
//! room index, and expiring rate-limit counters. The primitive the registry
//! leans on is [`EphemeralStore::add_to_set_bounded`], an atomic
//! check-capacity-and-insert, so two concurrent joins cannot both squeeze
//! into the last slot.

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

mod memory;
#[cfg(feature = "redis-backend")]
mod redis;

pub use memory::InMemoryStore;
#[cfg(feature = "redis-backend")]
pub use redis::RedisStore;

/// Trait implemented by all ephemeral store backends.
///
/// Keys are flat strings namespaced by the caller (`presence:<room>`,
/// `rooms:<user>`, `xferrate:<user>`). Values live only as long as the
/// backend does; nothing here is durable.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
  /// Atomically add `member` to the set at `key` if the set currently holds
  /// fewer than `max` members.
  ///
  /// ## Returns
  /// - `Ok(true)` if the member was inserted (or already present).
  /// - `Ok(false)` if the set is at capacity.
  async fn add_to_set_bounded(
    &self,
    key: &str,
    member: &str,
    max: Option<usize>,
  ) -> Result<bool, StoreError>;

  /// Remove `member` from the set at `key`. Returns whether it was present.
  async fn remove_from_set(&self, key: &str, member: &str) -> Result<bool, StoreError>;

  async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

  async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError>;

  async fn set_len(&self, key: &str) -> Result<usize, StoreError>;

  /// Increment the counter at `key`, arming `ttl` when the counter is
  /// created. Returns the post-increment value. Used for windowed rate caps.
  async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

  /// Drop a key entirely (set or counter).
  async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
