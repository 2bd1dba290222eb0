//! parlor: the real-time engine behind a multi-room chat community.
//!
//! The engine tracks room membership and presence across reconnects, parses
//! a command grammar embedded in ordinary chat messages, keeps a race-free
//! credit ledger that gifting and game betting draw on, and runs two
//! timer-driven multiplayer games (LowCard and Legend) per room.
//!
//! Everything enters through the [`gateway::Gateway`]: sockets authenticate
//! with a JWT, frames flow through the flood guard into the
//! [`commands::Router`], and results fan back out to rooms and users as
//! kind-tagged events. Presence lives in a pluggable ephemeral store;
//! users, rooms, bans, and the credit audit log live behind the durable
//! store adapter.

use dotenv::dotenv;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod auth;
pub mod commands;
pub mod config;
pub mod durable;
pub mod error;
pub mod events;
pub mod games;
pub mod gateway;
pub mod ledger;
pub mod presence;
pub mod rate_limit;
pub mod store;
#[cfg(test)]
pub(crate) mod testutil;

pub use auth::JwtAuth;
pub use commands::{gift_catalog, Command, Router};
pub use config::EngineSettings;
pub use durable::{DurableStore, MemoryDurable, Role, RoomRecord, UserRecord};
pub use error::{EngineError, StoreError};
pub use events::{ClientFrame, GameKind, MessageKind, Outbox, ServerEvent};
pub use games::{LegendEngine, LegendSymbol, LowCardEngine};
pub use gateway::{Gateway, SessionHub};
pub use ledger::{CreditLedger, CreditTransaction, TransferReceipt, TxKind};
pub use presence::RoomRegistry;
pub use rate_limit::FloodGuard;
pub use store::{EphemeralStore, InMemoryStore};
#[cfg(feature = "redis-backend")]
pub use store::RedisStore;

/// Boot a single-process engine from the environment: in-memory stores,
/// settings and port from env vars, tracing initialized with an env filter.
pub async fn run() {
  dotenv().ok();

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("{}=debug,tower_http=debug", env!("CARGO_CRATE_NAME")).into()
      }),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let settings = EngineSettings::from_env();
  let secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
    tracing::warn!("JWT_SECRET not set, using the development default");
    String::from("secret")
  });

  let gateway = Gateway::new(
    settings,
    Arc::new(InMemoryStore::new()),
    Arc::new(MemoryDurable::new()),
  )
  .with_auth(JwtAuth::new(&secret));

  let port = std::env::var("PORT").unwrap_or(String::from("3000"));
  let addr = format!("0.0.0.0:{}", port);
  info!("starting on {}", addr);

  if let Err(e) = gateway.listen(&addr).await {
    tracing::error!("Gateway exited: {}", e);
  }
}
