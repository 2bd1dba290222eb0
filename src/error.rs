#[cfg(feature = "redis-backend")]
use redis::RedisError;
use thiserror::Error;

/// Errors from the ephemeral/durable store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[cfg(feature = "redis-backend")]
  #[error("Backend error: {0}")]
  Backend(#[from] RedisError),

  #[error("Store unavailable: {0}")]
  Unavailable(String),
}

/// Engine-level errors. `Display` text is safe to show the acting user as a
/// private notice; infrastructure details stay in the logs.
#[derive(Debug, Error)]
pub enum EngineError {
  // Validation: malformed arguments, out-of-range amounts.
  #[error("{0}")]
  Validation(String),

  // Authorization: insufficient role for the attempted action.
  #[error("you are not allowed to {0}")]
  Unauthorized(String),

  // Resource state: retry-safe, nothing was mutated.
  #[error("room is full")]
  RoomFull,

  #[error("you are banned from this room")]
  Banned,

  #[error("user is already banned")]
  AlreadyBanned,

  #[error("unknown room")]
  UnknownRoom,

  #[error("unknown user: {0}")]
  UnknownUser(String),

  #[error("not in this room")]
  NotInRoom,

  #[error("{0}")]
  GameState(String),

  #[error("you are sending messages too fast")]
  Flooded,

  #[error("you are silenced in this room")]
  Silenced,

  #[error("your account is suspended")]
  Suspended,

  // Ledger: the whole operation aborted with zero partial mutation.
  #[error("insufficient credits")]
  InsufficientFunds,

  #[error("cannot transfer credits to yourself")]
  SelfTransfer,

  #[error("amount is outside the allowed range")]
  LimitExceeded,

  #[error("too many transfers, slow down")]
  RateCapped,

  #[error("duplicate request")]
  DuplicateRequest,

  // Infrastructure: logged with detail, surfaced generically.
  #[error("temporary failure, try again later")]
  Store(#[from] StoreError),
}

impl EngineError {
  /// Resource-state errors leave nothing mutated and may be retried as-is.
  pub fn is_retry_safe(&self) -> bool {
    matches!(
      self,
      Self::RoomFull
        | Self::Banned
        | Self::AlreadyBanned
        | Self::UnknownRoom
        | Self::NotInRoom
        | Self::GameState(_)
        | Self::Flooded
    )
  }
}
