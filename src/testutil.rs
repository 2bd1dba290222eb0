//! Shared fixtures for the crate's test suites.

use crate::events::{Outbox, RoomId, ServerEvent, UserId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// An [`Outbox`] that records every delivery for assertions.
#[derive(Default)]
pub(crate) struct RecordingOutbox {
  room_events: Mutex<Vec<(RoomId, ServerEvent)>>,
  user_events: Mutex<Vec<(UserId, ServerEvent)>>,
}

impl RecordingOutbox {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub async fn room_events(&self) -> Vec<(RoomId, ServerEvent)> {
    self.room_events.lock().await.clone()
  }

  pub async fn user_events(&self) -> Vec<(UserId, ServerEvent)> {
    self.user_events.lock().await.clone()
  }

  /// Private warnings delivered to one user, in order.
  pub async fn warnings_for(&self, user: &str) -> Vec<String> {
    self
      .user_events
      .lock()
      .await
      .iter()
      .filter(|(to, _)| to == user)
      .filter_map(|(_, event)| match event {
        ServerEvent::Warning { text } => Some(text.clone()),
        _ => None,
      })
      .collect()
  }

  /// Room broadcasts carrying chat text, as (room, from, text).
  pub async fn chats(&self) -> Vec<(RoomId, UserId, String)> {
    self
      .room_events
      .lock()
      .await
      .iter()
      .filter_map(|(room, event)| match event {
        ServerEvent::Chat { from, text, .. } => {
          Some((room.clone(), from.clone(), text.clone()))
        }
        _ => None,
      })
      .collect()
  }
}

#[async_trait]
impl Outbox for RecordingOutbox {
  async fn to_room(&self, room: &str, event: ServerEvent) {
    self
      .room_events
      .lock()
      .await
      .push((room.to_string(), event));
  }

  async fn to_user(&self, user: &str, event: ServerEvent) {
    self
      .user_events
      .lock()
      .await
      .push((user.to_string(), event));
  }
}
