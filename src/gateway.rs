//! Session gateway: WebSocket server, socket registry, and event fan-out.
//!
//! A connection authenticates with a JWT at the upgrade and is keyed by its
//! session ID; one user may hold several live sockets. The hub implements
//! [`Outbox`]: room broadcasts resolve the live roster through the registry
//! and deliver to every member's sockets, fire-and-forget, at-most-once.
//!
//! Disconnects do not revoke presence immediately. When a user's last
//! socket drops, a grace timer runs; presence (and with it any game the
//! user is in) survives a reconnect inside the window.

use crate::{
  auth::JwtAuth,
  commands::Router as CommandRouter,
  config::EngineSettings,
  durable::DurableStore,
  events::{ClientFrame, Outbox, ServerEvent, UserId},
  presence::RoomRegistry,
  store::EphemeralStore,
};
use async_trait::async_trait;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    Query, WebSocketUpgrade,
  },
  response::IntoResponse,
  routing::get,
  Router,
};
use futures::{SinkExt, StreamExt};
use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, OnceLock},
  time::Duration,
};
use tokio::sync::{mpsc, RwLock};
use tower_http::{
  cors::{Any, CorsLayer},
  trace::TraceLayer,
};

/// Socket registry and [`Outbox`] implementation.
///
/// The registry reference is attached after construction because the hub is
/// handed to the command router as its outbox while the router owns the
/// registry.
pub struct SessionHub {
  clients: RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>,
  users: RwLock<HashMap<UserId, HashSet<String>>>,
  registry: OnceLock<RoomRegistry>,
}

impl SessionHub {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      clients: RwLock::new(HashMap::new()),
      users: RwLock::new(HashMap::new()),
      registry: OnceLock::new(),
    })
  }

  pub fn attach_registry(&self, registry: RoomRegistry) {
    let _ = self.registry.set(registry);
  }

  pub async fn register(
    &self,
    session_id: &str,
    user_id: &str,
    tx: mpsc::UnboundedSender<Message>,
  ) {
    self
      .clients
      .write()
      .await
      .insert(session_id.to_string(), tx);
    self
      .users
      .write()
      .await
      .entry(user_id.to_string())
      .or_default()
      .insert(session_id.to_string());
  }

  pub async fn unregister(&self, session_id: &str, user_id: &str) {
    self.clients.write().await.remove(session_id);
    let mut users = self.users.write().await;
    if let Some(sessions) = users.get_mut(user_id) {
      sessions.remove(session_id);
      if sessions.is_empty() {
        users.remove(user_id);
      }
    }
  }

  pub async fn has_live_sessions(&self, user_id: &str) -> bool {
    self.users.read().await.contains_key(user_id)
  }

  async fn deliver(&self, session_ids: &HashSet<String>, json: &str) {
    let clients = self.clients.read().await;
    for session_id in session_ids {
      if let Some(tx) = clients.get(session_id) {
        let _ = tx.send(Message::Text(json.to_string().into()));
      }
    }
  }
}

#[async_trait]
impl Outbox for SessionHub {
  async fn to_room(&self, room: &str, event: ServerEvent) {
    let Some(registry) = self.registry.get() else {
      return;
    };
    let members = match registry.members(room).await {
      Ok(members) => members,
      Err(e) => {
        tracing::error!("Fan-out roster read for room {} failed: {}", room, e);
        return;
      }
    };
    let json = match serde_json::to_string(&event) {
      Ok(json) => json,
      Err(e) => {
        tracing::error!("Failed to serialize event: {}", e);
        return;
      }
    };

    let users = self.users.read().await;
    for member in members {
      if let Some(sessions) = users.get(&member) {
        self.deliver(sessions, &json).await;
      }
    }
  }

  async fn to_user(&self, user: &str, event: ServerEvent) {
    let json = match serde_json::to_string(&event) {
      Ok(json) => json,
      Err(e) => {
        tracing::error!("Failed to serialize event: {}", e);
        return;
      }
    };
    let sessions = {
      let users = self.users.read().await;
      users.get(user).cloned()
    };
    if let Some(sessions) = sessions {
      self.deliver(&sessions, &json).await;
    }
  }
}

/// The WebSocket-facing server. Builder-style configuration, then
/// [`Gateway::listen`].
pub struct Gateway {
  auth: JwtAuth,
  router: Arc<CommandRouter>,
  hub: Arc<SessionHub>,
  reconnect_grace: Duration,
}

impl Gateway {
  /// Wire up a full engine over the given stores.
  pub fn new(
    settings: EngineSettings,
    ephemeral: Arc<dyn EphemeralStore>,
    durable: Arc<dyn DurableStore>,
  ) -> Self {
    let hub = SessionHub::new();
    let router = Arc::new(CommandRouter::new(
      settings,
      ephemeral,
      durable,
      hub.clone(),
    ));
    hub.attach_registry(router.registry().clone());
    Self {
      auth: JwtAuth::new("secret"),
      router,
      hub,
      reconnect_grace: Duration::from_secs(30),
    }
  }

  /// Configure the JWT authentication handler.
  pub fn with_auth(mut self, auth: JwtAuth) -> Self {
    self.auth = auth;
    self
  }

  /// How long presence survives after a user's last socket drops.
  pub fn with_reconnect_grace(mut self, grace: Duration) -> Self {
    self.reconnect_grace = grace;
    self
  }

  pub fn router(&self) -> &Arc<CommandRouter> {
    &self.router
  }

  pub fn hub(&self) -> &Arc<SessionHub> {
    &self.hub
  }

  /// Start serving `/ws?token=…`.
  pub async fn listen(self, addr: &str) -> anyhow::Result<()> {
    let auth = self.auth.clone();
    let router = self.router.clone();
    let hub = self.hub.clone();
    let grace = self.reconnect_grace;

    let cors = CorsLayer::new().allow_origin(Any);
    let app = Router::new()
      .route(
        "/ws",
        get({
          move |ws: WebSocketUpgrade, Query(params): Query<HashMap<String, String>>| {
            let auth = auth.clone();
            let router = router.clone();
            let hub = hub.clone();
            async move {
              if let Some(token) = params.get("token") {
                if let Ok(claims) = auth.verify_access(token) {
                  return ws.on_upgrade(move |socket| {
                    handle_ws(socket, claims.sub, claims.sid, router, hub, grace)
                  });
                }
              }
              "Unauthorized".into_response()
            }
          }
        }),
      )
      .layer(TraceLayer::new_for_http())
      .layer(cors);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Gateway listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
  }
}

/// Drive one socket: register it, pump frames through the command router,
/// and on disconnect run the reconnect-grace cleanup.
async fn handle_ws(
  ws: WebSocket,
  user_id: String,
  session_id: String,
  router: Arc<CommandRouter>,
  hub: Arc<SessionHub>,
  grace: Duration,
) {
  let (mut sender_ws, mut receiver_ws) = ws.split();
  let (tx, mut rx) = mpsc::unbounded_channel();

  hub.register(&session_id, &user_id, tx).await;
  tracing::info!("User {} (session {}) connected", user_id, session_id);

  // Pump inbound frames into the router.
  let router_recv = router.clone();
  let user_recv = user_id.clone();
  let receiver_task = tokio::spawn(async move {
    while let Some(Ok(msg)) = receiver_ws.next().await {
      match msg {
        Message::Text(text) => {
          match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => {
              // Errors were already reported privately by the router.
              let _ = router_recv.handle_frame(&user_recv, frame).await;
            }
            Err(e) => {
              tracing::warn!("Unparseable frame from {}: {}", user_recv, e);
            }
          }
        }
        Message::Close(_) => {
          tracing::info!("User {} closed connection", user_recv);
          break;
        }
        _ => {}
      }
    }
  });

  // Pump outbound events to the socket.
  let user_send = user_id.clone();
  let sender_task = tokio::spawn(async move {
    while let Some(msg) = rx.recv().await {
      if sender_ws.send(msg).await.is_err() {
        tracing::warn!("Failed to send message to {}", user_send);
        break;
      }
    }
  });

  // Wait for either task to complete (client disconnect or error)
  tokio::select! {
    _ = receiver_task => {},
    _ = sender_task => {},
  }

  hub.unregister(&session_id, &user_id).await;
  tracing::info!("User {} (session {}) disconnected", user_id, session_id);

  // Presence outlives the socket by the grace window; a reconnect on any
  // session keeps the user's rooms (and running games) untouched.
  tokio::spawn(async move {
    tokio::time::sleep(grace).await;
    if hub.has_live_sessions(&user_id).await {
      return;
    }
    let rooms = match router.registry().rooms_of(&user_id).await {
      Ok(rooms) => rooms,
      Err(e) => {
        tracing::error!("Presence cleanup for {} failed: {}", user_id, e);
        return;
      }
    };
    for room in rooms {
      if let Err(e) = router.leave_room(&user_id, &room).await {
        tracing::warn!("Could not clear {} from room {}: {}", user_id, room, e);
      }
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::durable::{MemoryDurable, UserRecord};
  use crate::store::InMemoryStore;

  async fn gateway() -> Gateway {
    let durable = MemoryDurable::new();
    durable.seed_user(UserRecord::new("alice", 100)).await;
    durable.seed_user(UserRecord::new("bob", 100)).await;
    Gateway::new(
      EngineSettings::default(),
      Arc::new(InMemoryStore::new()),
      Arc::new(durable),
    )
  }

  fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
      if let Message::Text(text) = msg {
        out.push(text.to_string());
      }
    }
    out
  }

  #[tokio::test]
  async fn user_fanout_reaches_every_session() {
    let gateway = gateway().await;
    let hub = gateway.hub().clone();

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    hub.register("s1", "alice", tx1).await;
    hub.register("s2", "alice", tx2).await;

    hub
      .to_user("alice", ServerEvent::Credits { balance: 7 })
      .await;

    assert_eq!(drain(&mut rx1).len(), 1);
    assert_eq!(drain(&mut rx2).len(), 1);
  }

  #[tokio::test]
  async fn room_fanout_reaches_members_only() {
    let gateway = gateway().await;
    let hub = gateway.hub().clone();
    let router = gateway.router().clone();

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    hub.register("sa", "alice", tx_a).await;
    hub.register("sb", "bob", tx_b).await;

    router.join_room("alice", "lobby").await.unwrap();
    drain(&mut rx_a);
    drain(&mut rx_b);

    router.handle_chat("alice", "lobby", "hello").await.unwrap();

    let to_alice = drain(&mut rx_a);
    assert_eq!(to_alice.len(), 1);
    assert!(to_alice[0].contains("hello"));
    // Bob never joined; a room broadcast does not reach him.
    assert!(drain(&mut rx_b).is_empty());
  }

  #[tokio::test]
  async fn dead_sessions_drop_frames_silently() {
    let gateway = gateway().await;
    let hub = gateway.hub().clone();

    let (tx, rx) = mpsc::unbounded_channel();
    hub.register("s1", "alice", tx).await;
    drop(rx);

    // At-most-once: nothing panics, nothing queues.
    hub
      .to_user("alice", ServerEvent::Credits { balance: 1 })
      .await;

    hub.unregister("s1", "alice").await;
    assert!(!hub.has_live_sessions("alice").await);
  }
}
