//! In-memory ephemeral store used for single-process deployments and tests.

use super::EphemeralStore;
use crate::error::StoreError;
use async_trait::async_trait;
use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex},
  time::{Duration, Instant},
};

enum Entry {
  Set(HashSet<String>),
  Counter { value: u64, expires_at: Instant },
}

/// Single-process implementation over a locked map.
///
/// Counters expire lazily: an expired counter is treated as absent the next
/// time it is touched. Sets never expire on their own; membership is removed
/// explicitly when sockets go away.
#[derive(Clone, Default)]
pub struct InMemoryStore {
  entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
    self.entries.lock().expect("InMemoryStore lock poisoned")
  }
}

#[async_trait]
impl EphemeralStore for InMemoryStore {
  async fn add_to_set_bounded(
    &self,
    key: &str,
    member: &str,
    max: Option<usize>,
  ) -> Result<bool, StoreError> {
    let mut entries = self.lock();
    let entry = entries
      .entry(key.to_string())
      .or_insert_with(|| Entry::Set(HashSet::new()));
    match entry {
      Entry::Set(set) => {
        if set.contains(member) {
          return Ok(true);
        }
        if let Some(max) = max {
          if set.len() >= max {
            return Ok(false);
          }
        }
        set.insert(member.to_string());
        Ok(true)
      }
      Entry::Counter { .. } => Err(StoreError::Unavailable(format!(
        "key '{}' holds a counter, not a set",
        key
      ))),
    }
  }

  async fn remove_from_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
    let mut entries = self.lock();
    let removed = match entries.get_mut(key) {
      Some(Entry::Set(set)) => set.remove(member),
      _ => false,
    };
    // Drop empty sets so the map does not accumulate dead keys.
    if let Some(Entry::Set(set)) = entries.get(key) {
      if set.is_empty() {
        entries.remove(key);
      }
    }
    Ok(removed)
  }

  async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
    Ok(match self.lock().get(key) {
      Some(Entry::Set(set)) => set.iter().cloned().collect(),
      _ => Vec::new(),
    })
  }

  async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
    Ok(match self.lock().get(key) {
      Some(Entry::Set(set)) => set.contains(member),
      _ => false,
    })
  }

  async fn set_len(&self, key: &str) -> Result<usize, StoreError> {
    Ok(match self.lock().get(key) {
      Some(Entry::Set(set)) => set.len(),
      _ => 0,
    })
  }

  async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
    let mut entries = self.lock();
    let now = Instant::now();
    match entries.get_mut(key) {
      Some(Entry::Counter { value, expires_at }) if *expires_at > now => {
        *value += 1;
        Ok(*value)
      }
      _ => {
        entries.insert(
          key.to_string(),
          Entry::Counter {
            value: 1,
            expires_at: now + ttl,
          },
        );
        Ok(1)
      }
    }
  }

  async fn delete(&self, key: &str) -> Result<(), StoreError> {
    self.lock().remove(key);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn bounded_insert_enforces_capacity() {
    let store = InMemoryStore::new();
    assert!(store.add_to_set_bounded("k", "a", Some(2)).await.unwrap());
    assert!(store.add_to_set_bounded("k", "b", Some(2)).await.unwrap());
    assert!(!store.add_to_set_bounded("k", "c", Some(2)).await.unwrap());
    // Re-adding an existing member is not a capacity violation.
    assert!(store.add_to_set_bounded("k", "a", Some(2)).await.unwrap());

    assert!(store.remove_from_set("k", "b").await.unwrap());
    assert!(store.add_to_set_bounded("k", "c", Some(2)).await.unwrap());
    assert_eq!(store.set_len("k").await.unwrap(), 2);
  }

  #[tokio::test]
  async fn counter_resets_after_expiry() {
    let store = InMemoryStore::new();
    assert_eq!(
      store.incr_with_ttl("c", Duration::from_secs(60)).await.unwrap(),
      1
    );
    assert_eq!(
      store.incr_with_ttl("c", Duration::from_secs(60)).await.unwrap(),
      2
    );
    // Zero TTL expires immediately, so the next increment starts over.
    store.delete("c").await.unwrap();
    assert_eq!(
      store.incr_with_ttl("c", Duration::from_millis(0)).await.unwrap(),
      1
    );
    assert_eq!(
      store.incr_with_ttl("c", Duration::from_secs(60)).await.unwrap(),
      1
    );
  }

  #[tokio::test]
  async fn unbounded_set_accepts_everything() {
    let store = InMemoryStore::new();
    for i in 0..100 {
      assert!(
        store
          .add_to_set_bounded("k", &format!("m{}", i), None)
          .await
          .unwrap()
      );
    }
    assert_eq!(store.set_len("k").await.unwrap(), 100);
  }
}
