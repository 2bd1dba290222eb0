//! Presence and room registry: membership, occupancy, bans, silences, and
//! the moderation hierarchy.
//!
//! Room metadata (owner, moderators, bans, announcement) is durable and
//! cached per room; presence is ephemeral and lives only in the
//! [`EphemeralStore`], keyed by room, as the sole source of truth for who is
//! in a room right now. Occupancy enforcement rides on the store's atomic
//! bounded-set insert, so a full room cannot be over-joined by two racing
//! sockets.
//!
//! Authorization hierarchy: owner > global admin > room moderator. A
//! moderator cannot act on another moderator or the owner, and only the
//! owner or a global admin can promote or demote moderators.

use crate::config::RoomDefaults;
use crate::durable::{write_behind, DurableStore, RoomRecord, UserRecord};
use crate::error::EngineError;
use crate::events::{RoomId, UserId};
use crate::store::EphemeralStore;
use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
  time::{Duration, Instant},
};
use tokio::sync::RwLock;

/// Cached per-room moderation state.
pub struct RoomState {
  pub id: RoomId,
  pub name: String,
  pub owner: Option<UserId>,
  pub max_occupancy: Option<usize>,
  pub moderators: HashSet<UserId>,
  pub banned: HashSet<UserId>,
  pub announcement: Option<String>,
  room_silenced_until: Option<Instant>,
  silenced_until: HashMap<UserId, Instant>,
}

impl RoomState {
  fn from_record(record: RoomRecord) -> Self {
    Self {
      id: record.id,
      name: record.name,
      owner: Some(record.owner),
      max_occupancy: record.max_occupancy,
      moderators: record.moderators,
      banned: record.banned,
      announcement: record.announcement,
      room_silenced_until: None,
      silenced_until: HashMap::new(),
    }
  }

  fn ad_hoc(id: &str, defaults: &RoomDefaults) -> Self {
    Self {
      id: id.to_string(),
      name: id.to_string(),
      owner: None,
      max_occupancy: defaults.max_occupancy,
      moderators: HashSet::new(),
      banned: HashSet::new(),
      announcement: None,
      room_silenced_until: None,
      silenced_until: HashMap::new(),
    }
  }

  fn snapshot(&self) -> RoomRecord {
    RoomRecord {
      id: self.id.clone(),
      name: self.name.clone(),
      owner: self.owner.clone().unwrap_or_default(),
      max_occupancy: self.max_occupancy,
      moderators: self.moderators.clone(),
      banned: self.banned.clone(),
      announcement: self.announcement.clone(),
    }
  }

  /// Moderation rank: owner 3, global admin 2, room moderator 1, else 0.
  fn rank(&self, user: &UserRecord) -> u8 {
    if self.owner.as_deref() == Some(user.id.as_str()) {
      3
    } else if user.role.is_global_admin() {
      2
    } else if self.moderators.contains(&user.id) {
      1
    } else {
      0
    }
  }
}

/// Registry for all rooms the coordinator serves.
pub struct RoomRegistry {
  rooms: Arc<RwLock<HashMap<RoomId, Arc<RwLock<RoomState>>>>>,
  ephemeral: Arc<dyn EphemeralStore>,
  durable: Arc<dyn DurableStore>,
  defaults: RoomDefaults,
}

fn presence_key(room: &str) -> String {
  format!("presence:{}", room)
}

fn user_rooms_key(user: &str) -> String {
  format!("rooms:{}", user)
}

impl RoomRegistry {
  pub fn new(
    defaults: RoomDefaults,
    ephemeral: Arc<dyn EphemeralStore>,
    durable: Arc<dyn DurableStore>,
  ) -> Self {
    Self {
      rooms: Arc::new(RwLock::new(HashMap::new())),
      ephemeral,
      durable,
      defaults,
    }
  }

  /// Fetch the cached room state, loading durable metadata on first touch.
  pub async fn get_or_create(&self, room_id: &str) -> Arc<RwLock<RoomState>> {
    let rooms = self.rooms.read().await;
    if let Some(room) = rooms.get(room_id) {
      return room.clone();
    }
    drop(rooms);

    let state = match self.durable.fetch_room(room_id).await {
      Ok(Some(record)) => RoomState::from_record(record),
      Ok(None) => RoomState::ad_hoc(room_id, &self.defaults),
      Err(e) => {
        tracing::error!("Failed to load room {} metadata: {}", room_id, e);
        RoomState::ad_hoc(room_id, &self.defaults)
      }
    };

    let mut rooms = self.rooms.write().await;
    // Double-check after acquiring write lock
    if let Some(room) = rooms.get(room_id) {
      return room.clone();
    }
    let room = Arc::new(RwLock::new(state));
    rooms.insert(room_id.to_string(), room.clone());
    room
  }

  /// Add a user to a room.
  ///
  /// Fails `Banned` before the occupancy check ever runs, and `RoomFull`
  /// when the atomic bounded insert finds no free slot.
  pub async fn join(&self, room_id: &str, user: &UserRecord) -> Result<(), EngineError> {
    let room = self.get_or_create(room_id).await;
    let max = {
      let state = room.read().await;
      if state.banned.contains(&user.id) {
        return Err(EngineError::Banned);
      }
      state.max_occupancy
    };

    let admitted = self
      .ephemeral
      .add_to_set_bounded(&presence_key(room_id), &user.id, max)
      .await?;
    if !admitted {
      return Err(EngineError::RoomFull);
    }
    self
      .ephemeral
      .add_to_set_bounded(&user_rooms_key(&user.id), room_id, None)
      .await?;
    tracing::info!("User {} joined room {}", user.id, room_id);
    Ok(())
  }

  /// Remove a user's presence entry from a room.
  pub async fn leave(&self, room_id: &str, user_id: &str) -> Result<(), EngineError> {
    self
      .ephemeral
      .remove_from_set(&presence_key(room_id), user_id)
      .await?;
    self
      .ephemeral
      .remove_from_set(&user_rooms_key(user_id), room_id)
      .await?;
    tracing::info!("User {} left room {}", user_id, room_id);
    Ok(())
  }

  pub async fn members(&self, room_id: &str) -> Result<Vec<UserId>, EngineError> {
    Ok(self.ephemeral.set_members(&presence_key(room_id)).await?)
  }

  pub async fn occupancy(&self, room_id: &str) -> Result<usize, EngineError> {
    Ok(self.ephemeral.set_len(&presence_key(room_id)).await?)
  }

  pub async fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool, EngineError> {
    Ok(
      self
        .ephemeral
        .set_contains(&presence_key(room_id), user_id)
        .await?,
    )
  }

  /// Rooms a user is currently present in (for disconnect cleanup).
  pub async fn rooms_of(&self, user_id: &str) -> Result<Vec<RoomId>, EngineError> {
    Ok(self.ephemeral.set_members(&user_rooms_key(user_id)).await?)
  }

  /// True for the room owner, a global admin, or a room moderator.
  pub async fn is_moderator(&self, room_id: &str, user: &UserRecord) -> bool {
    self.moderation_rank(room_id, user).await > 0
  }

  /// Moderation rank in a room: owner 3, global admin 2, moderator 1,
  /// everyone else 0. The command table checks this before dispatch.
  pub async fn moderation_rank(&self, room_id: &str, user: &UserRecord) -> u8 {
    let room = self.get_or_create(room_id).await;
    let state = room.read().await;
    state.rank(user)
  }

  /// Enforce the hierarchy for an action by `actor` against `target`.
  async fn require_can_act(
    &self,
    room_id: &str,
    actor: &UserRecord,
    target: &UserRecord,
    action: &str,
  ) -> Result<(), EngineError> {
    let room = self.get_or_create(room_id).await;
    let state = room.read().await;
    let actor_rank = state.rank(actor);
    if actor_rank == 0 {
      return Err(EngineError::Unauthorized(format!("{} in this room", action)));
    }
    if state.rank(target) >= actor_rank {
      return Err(EngineError::Unauthorized(format!(
        "{} a moderator or the owner",
        action
      )));
    }
    Ok(())
  }

  /// Ban a user: updates the live set synchronously, persists asynchronously,
  /// and clears any presence entry.
  pub async fn ban(
    &self,
    room_id: &str,
    actor: &UserRecord,
    target: &UserRecord,
    reason: Option<String>,
  ) -> Result<(), EngineError> {
    self.require_can_act(room_id, actor, target, "ban").await?;

    let room = self.get_or_create(room_id).await;
    {
      let mut state = room.write().await;
      if !state.banned.insert(target.id.clone()) {
        return Err(EngineError::AlreadyBanned);
      }
    }
    self.leave(room_id, &target.id).await?;

    let durable = self.durable.clone();
    let (room_id, target_id, actor_id) =
      (room_id.to_string(), target.id.clone(), actor.id.clone());
    write_behind("ban", async move {
      durable
        .record_ban(&room_id, &target_id, &actor_id, reason.as_deref())
        .await
    });
    Ok(())
  }

  pub async fn unban(
    &self,
    room_id: &str,
    actor: &UserRecord,
    target_id: &str,
  ) -> Result<(), EngineError> {
    if !self.is_moderator(room_id, actor).await {
      return Err(EngineError::Unauthorized("unban in this room".into()));
    }
    let room = self.get_or_create(room_id).await;
    {
      let mut state = room.write().await;
      if !state.banned.remove(target_id) {
        return Err(EngineError::Validation(format!(
          "{} is not banned here",
          target_id
        )));
      }
    }
    let durable = self.durable.clone();
    let (room_id, target_id) = (room_id.to_string(), target_id.to_string());
    write_behind("unban", async move {
      durable.clear_ban(&room_id, &target_id).await
    });
    Ok(())
  }

  /// Kick: authorization as ban, but no durable row and re-join is allowed.
  pub async fn kick(
    &self,
    room_id: &str,
    actor: &UserRecord,
    target: &UserRecord,
  ) -> Result<(), EngineError> {
    self.require_can_act(room_id, actor, target, "kick").await?;
    if !self.is_member(room_id, &target.id).await? {
      return Err(EngineError::NotInRoom);
    }
    self.leave(room_id, &target.id).await
  }

  /// Promote a user to room moderator. Owner or global admin only.
  pub async fn promote(
    &self,
    room_id: &str,
    actor: &UserRecord,
    target_id: &str,
  ) -> Result<(), EngineError> {
    self.require_owner_or_admin(room_id, actor, "promote moderators").await?;
    let room = self.get_or_create(room_id).await;
    let snapshot = {
      let mut state = room.write().await;
      if !state.moderators.insert(target_id.to_string()) {
        return Err(EngineError::Validation(format!(
          "{} is already a moderator",
          target_id
        )));
      }
      state.snapshot()
    };
    self.persist_room(snapshot);
    Ok(())
  }

  /// Demote a room moderator. Owner or global admin only.
  pub async fn demote(
    &self,
    room_id: &str,
    actor: &UserRecord,
    target_id: &str,
  ) -> Result<(), EngineError> {
    self.require_owner_or_admin(room_id, actor, "demote moderators").await?;
    let room = self.get_or_create(room_id).await;
    let snapshot = {
      let mut state = room.write().await;
      if !state.moderators.remove(target_id) {
        return Err(EngineError::Validation(format!(
          "{} is not a moderator",
          target_id
        )));
      }
      state.snapshot()
    };
    self.persist_room(snapshot);
    Ok(())
  }

  async fn require_owner_or_admin(
    &self,
    room_id: &str,
    actor: &UserRecord,
    action: &str,
  ) -> Result<(), EngineError> {
    let room = self.get_or_create(room_id).await;
    let state = room.read().await;
    if state.rank(actor) < 2 {
      return Err(EngineError::Unauthorized(action.to_string()));
    }
    Ok(())
  }

  /// Silence one user in a room. A zero duration lifts the silence.
  pub async fn silence_user(
    &self,
    room_id: &str,
    actor: &UserRecord,
    target: &UserRecord,
    duration: Duration,
  ) -> Result<(), EngineError> {
    self.require_can_act(room_id, actor, target, "silence").await?;
    let room = self.get_or_create(room_id).await;
    let mut state = room.write().await;
    if duration.is_zero() {
      state.silenced_until.remove(&target.id);
    } else {
      state
        .silenced_until
        .insert(target.id.clone(), Instant::now() + duration);
    }
    Ok(())
  }

  /// Silence the whole room for non-moderators. A zero duration lifts it.
  pub async fn silence_room(
    &self,
    room_id: &str,
    actor: &UserRecord,
    duration: Duration,
  ) -> Result<(), EngineError> {
    if !self.is_moderator(room_id, actor).await {
      return Err(EngineError::Unauthorized("silence this room".into()));
    }
    let room = self.get_or_create(room_id).await;
    let mut state = room.write().await;
    state.room_silenced_until = if duration.is_zero() {
      None
    } else {
      Some(Instant::now() + duration)
    };
    Ok(())
  }

  /// Whether the user's chat is currently suppressed. Moderators-or-better
  /// are never silenced; expired flags are cleaned up lazily.
  pub async fn is_silenced(&self, room_id: &str, user: &UserRecord) -> bool {
    let room = self.get_or_create(room_id).await;
    let mut state = room.write().await;
    if state.rank(user) > 0 {
      return false;
    }
    let now = Instant::now();
    if let Some(until) = state.room_silenced_until {
      if until > now {
        return true;
      }
      state.room_silenced_until = None;
    }
    match state.silenced_until.get(&user.id) {
      Some(&until) if until > now => true,
      Some(_) => {
        state.silenced_until.remove(&user.id);
        false
      }
      None => false,
    }
  }

  /// Set or clear the room announcement shown to joiners.
  pub async fn set_announcement(
    &self,
    room_id: &str,
    actor: &UserRecord,
    text: Option<String>,
  ) -> Result<(), EngineError> {
    if !self.is_moderator(room_id, actor).await {
      return Err(EngineError::Unauthorized("set announcements".into()));
    }
    let room = self.get_or_create(room_id).await;
    let snapshot = {
      let mut state = room.write().await;
      state.announcement = text;
      state.snapshot()
    };
    self.persist_room(snapshot);
    Ok(())
  }

  pub async fn announcement(&self, room_id: &str) -> Option<String> {
    let room = self.get_or_create(room_id).await;
    let state = room.read().await;
    state.announcement.clone()
  }

  fn persist_room(&self, snapshot: RoomRecord) {
    let durable = self.durable.clone();
    write_behind("room metadata", async move {
      durable.upsert_room(&snapshot).await
    });
  }
}

impl Clone for RoomRegistry {
  fn clone(&self) -> Self {
    Self {
      rooms: self.rooms.clone(),
      ephemeral: self.ephemeral.clone(),
      durable: self.durable.clone(),
      defaults: self.defaults.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::durable::{MemoryDurable, Role};
  use crate::store::InMemoryStore;

  async fn registry_with(max: Option<usize>) -> (RoomRegistry, MemoryDurable) {
    let durable = MemoryDurable::new();
    let mut record = RoomRecord::new("lobby", "owner");
    record.max_occupancy = max;
    record.moderators.insert("mod".to_string());
    durable.seed_room(record).await;
    let registry = RoomRegistry::new(
      RoomDefaults::default(),
      Arc::new(InMemoryStore::new()),
      Arc::new(durable.clone()),
    );
    (registry, durable)
  }

  fn user(id: &str) -> UserRecord {
    UserRecord::new(id, 0)
  }

  #[tokio::test]
  async fn occupancy_cap_is_enforced_and_freed_by_leave() {
    let (registry, _) = registry_with(Some(2)).await;

    registry.join("lobby", &user("a")).await.unwrap();
    registry.join("lobby", &user("b")).await.unwrap();
    assert!(matches!(
      registry.join("lobby", &user("c")).await,
      Err(EngineError::RoomFull)
    ));

    registry.leave("lobby", "b").await.unwrap();
    registry.join("lobby", &user("c")).await.unwrap();
    assert_eq!(registry.occupancy("lobby").await.unwrap(), 2);
  }

  #[tokio::test]
  async fn rejoin_is_not_a_second_presence_entry() {
    let (registry, _) = registry_with(Some(2)).await;
    registry.join("lobby", &user("a")).await.unwrap();
    registry.join("lobby", &user("a")).await.unwrap();
    assert_eq!(registry.occupancy("lobby").await.unwrap(), 1);
  }

  #[tokio::test]
  async fn banned_user_cannot_join_regardless_of_space() {
    let (registry, durable) = registry_with(Some(10)).await;
    let owner = user("owner");
    let mallory = user("mallory");

    registry.join("lobby", &mallory).await.unwrap();
    registry
      .ban("lobby", &owner, &mallory, Some("spam".into()))
      .await
      .unwrap();

    // Presence was revoked and re-joining fails banned, not full.
    assert!(!registry.is_member("lobby", "mallory").await.unwrap());
    assert!(matches!(
      registry.join("lobby", &mallory).await,
      Err(EngineError::Banned)
    ));

    // The ban reached the durable store.
    tokio::task::yield_now().await;
    assert_eq!(durable.banned_users("lobby").await.unwrap(), vec!["mallory"]);

    registry.unban("lobby", &owner, "mallory").await.unwrap();
    registry.join("lobby", &mallory).await.unwrap();
  }

  #[tokio::test]
  async fn moderator_cannot_act_on_moderator_or_owner() {
    let (registry, _) = registry_with(None).await;
    let moderator = user("mod");
    let owner = user("owner");
    let second_mod = {
      let u = user("mod2");
      registry.promote("lobby", &owner, "mod2").await.unwrap();
      u
    };

    assert!(matches!(
      registry.ban("lobby", &moderator, &second_mod, None).await,
      Err(EngineError::Unauthorized(_))
    ));
    assert!(matches!(
      registry.ban("lobby", &moderator, &owner, None).await,
      Err(EngineError::Unauthorized(_))
    ));
    // The owner outranks both.
    registry.ban("lobby", &owner, &second_mod, None).await.unwrap();
  }

  #[tokio::test]
  async fn only_owner_or_admin_promotes() {
    let (registry, _) = registry_with(None).await;
    let moderator = user("mod");
    let admin = user("admin").with_role(Role::Admin);

    assert!(matches!(
      registry.promote("lobby", &moderator, "newmod").await,
      Err(EngineError::Unauthorized(_))
    ));
    registry.promote("lobby", &admin, "newmod").await.unwrap();
    assert!(registry.is_moderator("lobby", &user("newmod")).await);

    registry.demote("lobby", &admin, "newmod").await.unwrap();
    assert!(!registry.is_moderator("lobby", &user("newmod")).await);
  }

  #[tokio::test]
  async fn silence_expires_lazily() {
    let (registry, _) = registry_with(None).await;
    let owner = user("owner");
    let target = user("chatty");

    registry
      .silence_user("lobby", &owner, &target, Duration::from_millis(30))
      .await
      .unwrap();
    assert!(registry.is_silenced("lobby", &target).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!registry.is_silenced("lobby", &target).await);

    // Room-wide silence never touches moderators.
    registry
      .silence_room("lobby", &owner, Duration::from_secs(60))
      .await
      .unwrap();
    assert!(registry.is_silenced("lobby", &target).await);
    assert!(!registry.is_silenced("lobby", &owner).await);
  }
}
