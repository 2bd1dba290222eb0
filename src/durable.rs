//! Durable store adapter: users, room metadata, bans, favorites, and the
//! immutable credit transaction log.
//!
//! The engine never blocks gameplay on the relational store. Reads happen on
//! first touch (then cache in the owning component); writes from hot paths
//! are spawned and logged on failure. [`MemoryDurable`] is the default
//! implementation and the one the test suite runs against; a real deployment
//! implements [`DurableStore`] over its database.

use crate::error::StoreError;
use crate::events::{RoomId, UserId};
use crate::ledger::CreditTransaction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Global account role. Drives command authorization; re-read per action
/// and cacheable per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  User,
  Mentor,
  Merchant,
  Admin,
  Moderator,
  CustomerService,
  Creator,
}

impl Role {
  /// Global admins outrank room moderators everywhere.
  pub fn is_global_admin(self) -> bool {
    matches!(self, Role::Admin)
  }
}

/// Durable user account row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
  pub id: UserId,
  pub display_name: String,
  pub role: Role,
  pub balance: u64,
  pub suspended: bool,
}

impl UserRecord {
  pub fn new(id: impl Into<UserId>, balance: u64) -> Self {
    let id = id.into();
    Self {
      display_name: id.clone(),
      id,
      role: Role::User,
      balance,
      suspended: false,
    }
  }

  pub fn with_role(mut self, role: Role) -> Self {
    self.role = role;
    self
  }
}

/// Durable room metadata. Membership is ephemeral and never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
  pub id: RoomId,
  pub name: String,
  pub owner: UserId,
  pub max_occupancy: Option<usize>,
  pub moderators: HashSet<UserId>,
  pub banned: HashSet<UserId>,
  pub announcement: Option<String>,
}

impl RoomRecord {
  pub fn new(id: impl Into<RoomId>, owner: impl Into<UserId>) -> Self {
    let id = id.into();
    Self {
      name: id.clone(),
      id,
      owner: owner.into(),
      max_occupancy: None,
      moderators: HashSet::new(),
      banned: HashSet::new(),
      announcement: None,
    }
  }
}

/// Adapter over the relational store.
#[async_trait]
pub trait DurableStore: Send + Sync {
  async fn fetch_user(&self, id: &str) -> Result<Option<UserRecord>, StoreError>;
  async fn upsert_user(&self, user: &UserRecord) -> Result<(), StoreError>;

  async fn fetch_room(&self, id: &str) -> Result<Option<RoomRecord>, StoreError>;
  async fn upsert_room(&self, room: &RoomRecord) -> Result<(), StoreError>;

  /// Bans are durable in addition to the registry's live set so they
  /// survive ephemeral expiry and restarts.
  async fn record_ban(
    &self,
    room: &str,
    user: &str,
    by: &str,
    reason: Option<&str>,
  ) -> Result<(), StoreError>;
  async fn clear_ban(&self, room: &str, user: &str) -> Result<(), StoreError>;
  async fn banned_users(&self, room: &str) -> Result<Vec<UserId>, StoreError>;

  /// Append one immutable row to the transaction log.
  async fn append_transaction(&self, tx: &CreditTransaction) -> Result<(), StoreError>;
  /// Persist a balance snapshot after a mutation.
  async fn save_balance(&self, user: &str, balance: u64) -> Result<(), StoreError>;

  async fn add_favorite(&self, user: &str, favorite: &str) -> Result<(), StoreError>;
  async fn remove_favorite(&self, user: &str, favorite: &str) -> Result<(), StoreError>;
  async fn favorites(&self, user: &str) -> Result<Vec<UserId>, StoreError>;
}

#[derive(Default)]
struct DurableInner {
  users: HashMap<UserId, UserRecord>,
  rooms: HashMap<RoomId, RoomRecord>,
  bans: HashMap<RoomId, HashSet<UserId>>,
  transactions: Vec<CreditTransaction>,
  favorites: HashMap<UserId, HashSet<UserId>>,
}

/// In-process implementation backed by maps.
#[derive(Clone, Default)]
pub struct MemoryDurable {
  inner: Arc<RwLock<DurableInner>>,
}

impl MemoryDurable {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed a user account; test and demo convenience.
  pub async fn seed_user(&self, user: UserRecord) {
    self.inner.write().await.users.insert(user.id.clone(), user);
  }

  /// Seed room metadata; test and demo convenience.
  pub async fn seed_room(&self, room: RoomRecord) {
    self.inner.write().await.rooms.insert(room.id.clone(), room);
  }

  /// Snapshot of the transaction log, oldest first.
  pub async fn transactions(&self) -> Vec<CreditTransaction> {
    self.inner.read().await.transactions.clone()
  }
}

#[async_trait]
impl DurableStore for MemoryDurable {
  async fn fetch_user(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
    Ok(self.inner.read().await.users.get(id).cloned())
  }

  async fn upsert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
    self
      .inner
      .write()
      .await
      .users
      .insert(user.id.clone(), user.clone());
    Ok(())
  }

  async fn fetch_room(&self, id: &str) -> Result<Option<RoomRecord>, StoreError> {
    Ok(self.inner.read().await.rooms.get(id).cloned())
  }

  async fn upsert_room(&self, room: &RoomRecord) -> Result<(), StoreError> {
    self
      .inner
      .write()
      .await
      .rooms
      .insert(room.id.clone(), room.clone());
    Ok(())
  }

  async fn record_ban(
    &self,
    room: &str,
    user: &str,
    _by: &str,
    _reason: Option<&str>,
  ) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    inner
      .bans
      .entry(room.to_string())
      .or_default()
      .insert(user.to_string());
    if let Some(record) = inner.rooms.get_mut(room) {
      record.banned.insert(user.to_string());
    }
    Ok(())
  }

  async fn clear_ban(&self, room: &str, user: &str) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    if let Some(set) = inner.bans.get_mut(room) {
      set.remove(user);
    }
    if let Some(record) = inner.rooms.get_mut(room) {
      record.banned.remove(user);
    }
    Ok(())
  }

  async fn banned_users(&self, room: &str) -> Result<Vec<UserId>, StoreError> {
    Ok(
      self
        .inner
        .read()
        .await
        .bans
        .get(room)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default(),
    )
  }

  async fn append_transaction(&self, tx: &CreditTransaction) -> Result<(), StoreError> {
    self.inner.write().await.transactions.push(tx.clone());
    Ok(())
  }

  async fn save_balance(&self, user: &str, balance: u64) -> Result<(), StoreError> {
    if let Some(record) = self.inner.write().await.users.get_mut(user) {
      record.balance = balance;
    }
    Ok(())
  }

  async fn add_favorite(&self, user: &str, favorite: &str) -> Result<(), StoreError> {
    self
      .inner
      .write()
      .await
      .favorites
      .entry(user.to_string())
      .or_default()
      .insert(favorite.to_string());
    Ok(())
  }

  async fn remove_favorite(&self, user: &str, favorite: &str) -> Result<(), StoreError> {
    if let Some(set) = self.inner.write().await.favorites.get_mut(user) {
      set.remove(favorite);
    }
    Ok(())
  }

  async fn favorites(&self, user: &str) -> Result<Vec<UserId>, StoreError> {
    Ok(
      self
        .inner
        .read()
        .await
        .favorites
        .get(user)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default(),
    )
  }
}

/// Fire-and-forget durable write: spawn, log on failure, never block the
/// caller. Hot paths (gift broadcasts, game settlement) use this so slow
/// storage cannot stall gameplay feedback.
pub fn write_behind<F>(what: &'static str, fut: F)
where
  F: std::future::Future<Output = Result<(), StoreError>> + Send + 'static,
{
  tokio::spawn(async move {
    if let Err(e) = fut.await {
      tracing::error!("Durable write ({}) failed: {}", what, e);
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn ban_rows_survive_room_refetch() {
    let store = MemoryDurable::new();
    store.seed_room(RoomRecord::new("lobby", "alice")).await;
    store.record_ban("lobby", "mallory", "alice", Some("spam")).await.unwrap();

    let room = store.fetch_room("lobby").await.unwrap().unwrap();
    assert!(room.banned.contains("mallory"));
    assert_eq!(store.banned_users("lobby").await.unwrap(), vec!["mallory"]);

    store.clear_ban("lobby", "mallory").await.unwrap();
    assert!(store.banned_users("lobby").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn favorites_roundtrip() {
    let store = MemoryDurable::new();
    store.add_favorite("alice", "bob").await.unwrap();
    store.add_favorite("alice", "carol").await.unwrap();
    store.remove_favorite("alice", "bob").await.unwrap();
    assert_eq!(store.favorites("alice").await.unwrap(), vec!["carol"]);
  }
}
