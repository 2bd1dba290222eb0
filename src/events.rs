//! Wire model: inbound client frames, outbound server events, and the
//! fan-out seam the gateway implements.
//!
//! Everything on the wire is a kind-tagged JSON object. Identifiers are
//! opaque strings; presentation of events is the client's concern.

use crate::durable::Role;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type RoomId = String;

/// Presentation hint attached to every chat-style broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
  /// Ordinary user chat
  Chat,
  /// Server-originated room text (roster notes, game results)
  System,
  /// Informational notice
  Notice,
  /// Echo of a command (`/me`, `/roll`, gift announcements)
  CmdEcho,
  /// Room announcement set by a moderator
  Announce,
  /// Ban/kick/silence notices
  Moderation,
  /// Game engine announcements
  GameBot,
}

/// Structured moderation actions a client may send without going through
/// chat text. They resolve through the same command table as `/commands`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
  Kick,
  Ban,
  Unban,
  Silence,
  Mod,
  Unmod,
}

/// Frames a connected client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
  Join {
    room: RoomId,
  },
  Leave {
    room: RoomId,
  },
  Chat {
    room: RoomId,
    text: String,
  },
  Admin {
    room: RoomId,
    action: AdminAction,
    target: UserId,
    reason: Option<String>,
  },
  Shortcut {
    room: RoomId,
    text: String,
  },
}

/// Which in-room game an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
  Lowcard,
  Legend,
}

/// Events the engine emits toward clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
  /// Room membership changed
  Roster {
    room: RoomId,
    members: Vec<UserId>,
  },
  /// A chat-style broadcast with its presentation kind
  Chat {
    room: RoomId,
    from: UserId,
    from_role: Role,
    kind: MessageKind,
    text: String,
  },
  /// The receiving user's balance changed
  Credits {
    balance: u64,
  },
  /// A game moved to a new phase
  Game {
    room: RoomId,
    game: GameKind,
    phase: String,
    payload: serde_json::Value,
  },
  /// Private notice to the acting user only
  Warning {
    text: String,
  },
}

/// Delivery seam between the engine and connected sockets.
///
/// Both methods are fire-and-forget, at-most-once: a closed or saturated
/// socket silently drops the frame, and there is no redelivery.
#[async_trait]
pub trait Outbox: Send + Sync {
  /// Deliver to every live member of the room.
  async fn to_room(&self, room: &str, event: ServerEvent);

  /// Deliver to every live socket of the user.
  async fn to_user(&self, user: &str, event: ServerEvent);
}

impl ServerEvent {
  /// Private warning helper; every rejected command funnels through this.
  pub fn warning(text: impl Into<String>) -> Self {
    Self::Warning { text: text.into() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frames_roundtrip_with_kind_tag() {
    let frame = ClientFrame::Chat {
      room: "lobby".into(),
      text: "/roll 6".into(),
    };
    let json = serde_json::to_value(&frame).unwrap();
    assert_eq!(json["type"], "chat");
    let back: ClientFrame = serde_json::from_value(json).unwrap();
    match back {
      ClientFrame::Chat { room, text } => {
        assert_eq!(room, "lobby");
        assert_eq!(text, "/roll 6");
      }
      other => panic!("unexpected frame: {:?}", other),
    }
  }

  #[test]
  fn events_serialize_with_kind_tag() {
    let event = ServerEvent::Game {
      room: "lobby".into(),
      game: GameKind::Lowcard,
      phase: "joining".into(),
      payload: serde_json::json!({ "bet": 50 }),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "game");
    assert_eq!(json["game"], "lowcard");
  }
}
