//! Redis-backed ephemeral store for deployments with a shared keyed store.

use super::EphemeralStore;
use crate::error::StoreError;
use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;

// Atomic capacity check + insert. Capacity -1 means unbounded.
const BOUNDED_SADD: &str = r#"
if redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 1 then
  return 1
end
local max = tonumber(ARGV[2])
if max >= 0 and redis.call('SCARD', KEYS[1]) >= max then
  return 0
end
redis.call('SADD', KEYS[1], ARGV[1])
return 1
"#;

/// Redis implementation over a multiplexed tokio connection.
///
/// The bounded insert runs as a Lua script so the occupancy check and the
/// `SADD` are one atomic unit on the server.
#[derive(Clone)]
pub struct RedisStore {
  client: Client,
}

impl RedisStore {
  /// Create a new Redis store from a connection string.
  ///
  /// Example: `RedisStore::new("redis://127.0.0.1/")?`
  pub fn new(addr: &str) -> Result<Self, StoreError> {
    Ok(Self {
      client: Client::open(addr)?,
    })
  }

  async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
    Ok(self.client.get_multiplexed_tokio_connection().await?)
  }
}

#[async_trait]
impl EphemeralStore for RedisStore {
  async fn add_to_set_bounded(
    &self,
    key: &str,
    member: &str,
    max: Option<usize>,
  ) -> Result<bool, StoreError> {
    let mut conn = self.conn().await?;
    let max_arg: i64 = max.map_or(-1, |m| m as i64);
    let inserted: i64 = Script::new(BOUNDED_SADD)
      .key(key)
      .arg(member)
      .arg(max_arg)
      .invoke_async(&mut conn)
      .await?;
    Ok(inserted == 1)
  }

  async fn remove_from_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
    let mut conn = self.conn().await?;
    let removed: i64 = conn.srem(key, member).await?;
    Ok(removed > 0)
  }

  async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
    let mut conn = self.conn().await?;
    Ok(conn.smembers(key).await?)
  }

  async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
    let mut conn = self.conn().await?;
    Ok(conn.sismember(key, member).await?)
  }

  async fn set_len(&self, key: &str) -> Result<usize, StoreError> {
    let mut conn = self.conn().await?;
    Ok(conn.scard(key).await?)
  }

  async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
    let mut conn = self.conn().await?;
    let value: u64 = conn.incr(key, 1u64).await?;
    if value == 1 {
      let _: () = conn.expire(key, ttl.as_secs().max(1) as i64).await?;
    }
    Ok(value)
  }

  async fn delete(&self, key: &str) -> Result<(), StoreError> {
    let mut conn = self.conn().await?;
    let _: () = conn.del(key).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // This test requires a running Redis instance at localhost:6379
  // Run: `docker run -p 6379:6379 redis`
  #[tokio::test]
  #[ignore]
  async fn bounded_insert_against_live_redis() {
    let store = RedisStore::new("redis://127.0.0.1/").unwrap();
    store.delete("parlor:test:set").await.unwrap();

    assert!(
      store
        .add_to_set_bounded("parlor:test:set", "a", Some(1))
        .await
        .unwrap()
    );
    assert!(
      !store
        .add_to_set_bounded("parlor:test:set", "b", Some(1))
        .await
        .unwrap()
    );
    assert_eq!(store.set_len("parlor:test:set").await.unwrap(), 1);

    store.delete("parlor:test:set").await.unwrap();
  }
}
