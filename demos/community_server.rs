//! Community server demo: a full engine over in-memory stores with a few
//! seeded accounts and one furnished room.

use parlor::{
  EngineSettings, Gateway, JwtAuth, MemoryDurable, InMemoryStore, Role, RoomRecord, UserRecord,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter("community_server=debug,parlor=debug")
    .init();

  let durable = MemoryDurable::new();
  durable.seed_user(UserRecord::new("alice", 1_000)).await;
  durable.seed_user(UserRecord::new("bob", 1_000)).await;
  durable
    .seed_user(UserRecord::new("root", 10_000).with_role(Role::Admin))
    .await;

  let mut lobby = RoomRecord::new("lobby", "alice");
  lobby.name = "The Lobby".to_string();
  lobby.max_occupancy = Some(40);
  durable.seed_room(lobby).await;

  let auth = JwtAuth::new("community-secret-key");

  // Print ready-made tokens so a ws client can connect straight away:
  //   websocat "ws://localhost:8080/ws?token=<token>"
  // then: {"type":"join","room":"lobby"}
  //       {"type":"chat","room":"lobby","text":"!start 50"}
  for user in ["alice", "bob", "root"] {
    let token = auth.sign_access(user.to_string(), format!("{}-dev", user), 86_400)?;
    println!("{}: {}", user, token);
  }

  Gateway::new(
    EngineSettings::from_env(),
    Arc::new(InMemoryStore::new()),
    Arc::new(durable),
  )
  .with_auth(auth)
  .listen("0.0.0.0:8080")
  .await
}
