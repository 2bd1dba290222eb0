//! Flood guard: message spam prevention per user and room.

use crate::config::FloodLimits;
use crate::error::EngineError;
use std::{
  collections::HashMap,
  sync::Arc,
  time::{Duration, Instant},
};
use tokio::sync::RwLock;

#[derive(Debug)]
struct WindowState {
  message_times: Vec<Instant>,
  muted_until: Option<Instant>,
}

impl WindowState {
  fn new() -> Self {
    Self {
      message_times: Vec::new(),
      muted_until: None,
    }
  }

  fn is_muted(&self) -> bool {
    if let Some(until) = self.muted_until {
      Instant::now() < until
    } else {
      false
    }
  }

  fn mute(&mut self, duration: Duration) {
    self.muted_until = Some(Instant::now() + duration);
  }

  fn clean_old_messages(&mut self, window: Duration) {
    let cutoff = Instant::now() - window;
    self.message_times.retain(|&time| time > cutoff);
  }

  fn record_message(&mut self) {
    self.message_times.push(Instant::now());
  }
}

/// Per-(user, room) flood guard.
///
/// Exceeding the message window mutes the offender for a fixed period;
/// the mute is local to the guard and distinct from a moderator's
/// `/silence`, which lives on the room registry.
pub struct FloodGuard {
  limits: FloodLimits,
  states: Arc<RwLock<HashMap<(String, String), WindowState>>>,
}

impl FloodGuard {
  pub fn new(limits: FloodLimits) -> Self {
    Self {
      limits,
      states: Arc::new(RwLock::new(HashMap::new())),
    }
  }

  /// Check whether a user may send a message into a room right now.
  pub async fn check_message(
    &self,
    user_id: &str,
    room_id: &str,
    message_size: usize,
  ) -> Result<(), EngineError> {
    if message_size > self.limits.max_size_bytes {
      return Err(EngineError::Validation(format!(
        "message too large: {} bytes (max {})",
        message_size, self.limits.max_size_bytes
      )));
    }

    let mut states = self.states.write().await;
    let state = states
      .entry((user_id.to_string(), room_id.to_string()))
      .or_insert_with(WindowState::new);

    if state.is_muted() {
      return Err(EngineError::Flooded);
    }

    state.clean_old_messages(self.limits.window_duration);

    if state.message_times.len() >= self.limits.max_messages_per_window as usize {
      state.mute(self.limits.mute_duration);
      tracing::warn!(
        "User {} exceeded the flood limit in room {} and was muted",
        user_id,
        room_id
      );
      return Err(EngineError::Flooded);
    }

    state.record_message();

    Ok(())
  }

  /// Reset flood state for a user in a room (admin action or tests).
  pub async fn reset(&self, user_id: &str, room_id: &str) {
    self
      .states
      .write()
      .await
      .remove(&(user_id.to_string(), room_id.to_string()));
  }

  /// Whether the guard currently has the user muted in the room.
  pub async fn is_muted(&self, user_id: &str, room_id: &str) -> bool {
    let states = self.states.read().await;
    states
      .get(&(user_id.to_string(), room_id.to_string()))
      .is_some_and(|s| s.is_muted())
  }
}

impl Clone for FloodGuard {
  fn clone(&self) -> Self {
    Self {
      limits: self.limits.clone(),
      states: self.states.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tight_limits() -> FloodLimits {
    FloodLimits {
      max_size_bytes: 64,
      max_messages_per_window: 3,
      window_duration: Duration::from_secs(60),
      mute_duration: Duration::from_secs(60),
    }
  }

  #[tokio::test]
  async fn messages_within_window_pass() {
    let guard = FloodGuard::new(tight_limits());
    for _ in 0..3 {
      guard.check_message("alice", "lobby", 10).await.unwrap();
    }
  }

  #[tokio::test]
  async fn exceeding_window_mutes() {
    let guard = FloodGuard::new(tight_limits());
    for _ in 0..3 {
      guard.check_message("alice", "lobby", 10).await.unwrap();
    }
    assert!(matches!(
      guard.check_message("alice", "lobby", 10).await,
      Err(EngineError::Flooded)
    ));
    assert!(guard.is_muted("alice", "lobby").await);
    // Other rooms are unaffected.
    guard.check_message("alice", "den", 10).await.unwrap();
  }

  #[tokio::test]
  async fn oversize_message_rejected() {
    let guard = FloodGuard::new(tight_limits());
    let err = guard.check_message("alice", "lobby", 1000).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
  }

  #[tokio::test]
  async fn reset_clears_mute() {
    let guard = FloodGuard::new(tight_limits());
    for _ in 0..4 {
      let _ = guard.check_message("alice", "lobby", 10).await;
    }
    assert!(guard.is_muted("alice", "lobby").await);
    guard.reset("alice", "lobby").await;
    guard.check_message("alice", "lobby", 10).await.unwrap();
  }
}
