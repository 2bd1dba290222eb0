//! Engine configuration: room defaults, ledger limits, and game windows.
//!
//! Settings are plain structs with sensible defaults; `EngineSettings::from_env`
//! overlays values from the environment (a `.env` file is honored via `dotenv`)
//! so deployments can tune windows and limits without a rebuild.

use std::time::Duration;

/// Defaults applied to rooms that carry no explicit metadata.
#[derive(Debug, Clone)]
pub struct RoomDefaults {
  /// Maximum number of occupants (None = unlimited)
  pub max_occupancy: Option<usize>,
  /// Default silence duration when `/silence` is given no minutes argument
  pub default_silence: Duration,
}

impl Default for RoomDefaults {
  fn default() -> Self {
    Self {
      max_occupancy: Some(40),
      default_silence: Duration::from_secs(5 * 60),
    }
  }
}

/// Bounds and rate caps on credit movement.
#[derive(Debug, Clone)]
pub struct TransferLimits {
  pub min_amount: u64,
  pub max_amount: u64,
  /// Maximum transfers a single sender may start per window
  pub rate_cap: u32,
  pub rate_window: Duration,
}

impl Default for TransferLimits {
  fn default() -> Self {
    Self {
      min_amount: 1,
      max_amount: 1_000_000,
      rate_cap: 10,
      rate_window: Duration::from_secs(60),
    }
  }
}

/// Timing and stakes for the LowCard elimination game.
#[derive(Debug, Clone)]
pub struct LowCardSettings {
  pub min_bet: u64,
  /// How long `!j` entries are accepted after `!start`
  pub join_window: Duration,
  /// How long each round waits for `!d` before auto-drawing
  pub draw_window: Duration,
  /// Full-tie rounds replayed before the pot is split among survivors
  pub max_tie_replays: u32,
}

impl Default for LowCardSettings {
  fn default() -> Self {
    Self {
      min_bet: 10,
      join_window: Duration::from_secs(30),
      draw_window: Duration::from_secs(20),
      max_tie_replays: 10,
    }
  }
}

/// Timing, stakes and payout table for the Legend betting game.
#[derive(Debug, Clone)]
pub struct LegendSettings {
  pub min_bet: u64,
  /// How long `!b` wagers are accepted after the first one opens the pool
  pub betting_window: Duration,
  /// Number of symbols drawn at settlement
  pub outcome_length: usize,
  /// Payout multiplier indexed by occurrence count (1-based occurrences;
  /// index 0 is unused). A symbol drawn twice pays stake x multiplier[2].
  pub multipliers: [u64; 4],
}

impl Default for LegendSettings {
  fn default() -> Self {
    Self {
      min_bet: 10,
      betting_window: Duration::from_secs(45),
      outcome_length: 3,
      multipliers: [0, 2, 3, 4],
    }
  }
}

/// Flood-guard thresholds for chat traffic.
#[derive(Debug, Clone)]
pub struct FloodLimits {
  /// Maximum message size in bytes
  pub max_size_bytes: usize,
  /// Maximum messages per time window per (user, room)
  pub max_messages_per_window: u32,
  pub window_duration: Duration,
  /// How long to mute users who exceed limits
  pub mute_duration: Duration,
}

impl Default for FloodLimits {
  fn default() -> Self {
    Self {
      max_size_bytes: 8 * 1024,
      max_messages_per_window: 8,
      window_duration: Duration::from_secs(1),
      mute_duration: Duration::from_secs(60),
    }
  }
}

/// Top-level settings bundle handed to the engine at boot.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
  pub rooms: RoomDefaults,
  pub transfers: TransferLimits,
  pub lowcard: LowCardSettings,
  pub legend: LegendSettings,
  pub flood: FloodLimits,
}

impl EngineSettings {
  /// Build settings from the environment, falling back to defaults.
  ///
  /// Recognized variables: `ROOM_MAX_OCCUPANCY`, `TRANSFER_MIN`, `TRANSFER_MAX`,
  /// `TRANSFER_RATE_CAP`, `LOWCARD_MIN_BET`, `LOWCARD_JOIN_SECS`,
  /// `LOWCARD_DRAW_SECS`, `LEGEND_MIN_BET`, `LEGEND_BETTING_SECS`.
  pub fn from_env() -> Self {
    dotenv::dotenv().ok();
    let mut settings = Self::default();

    if let Some(n) = env_parse::<usize>("ROOM_MAX_OCCUPANCY") {
      settings.rooms.max_occupancy = if n == 0 { None } else { Some(n) };
    }
    if let Some(n) = env_parse("TRANSFER_MIN") {
      settings.transfers.min_amount = n;
    }
    if let Some(n) = env_parse("TRANSFER_MAX") {
      settings.transfers.max_amount = n;
    }
    if let Some(n) = env_parse("TRANSFER_RATE_CAP") {
      settings.transfers.rate_cap = n;
    }
    if let Some(n) = env_parse("LOWCARD_MIN_BET") {
      settings.lowcard.min_bet = n;
    }
    if let Some(n) = env_parse::<u64>("LOWCARD_JOIN_SECS") {
      settings.lowcard.join_window = Duration::from_secs(n);
    }
    if let Some(n) = env_parse::<u64>("LOWCARD_DRAW_SECS") {
      settings.lowcard.draw_window = Duration::from_secs(n);
    }
    if let Some(n) = env_parse("LEGEND_MIN_BET") {
      settings.legend.min_bet = n;
    }
    if let Some(n) = env_parse::<u64>("LEGEND_BETTING_SECS") {
      settings.legend.betting_window = Duration::from_secs(n);
    }

    settings
  }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
  std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_sane() {
    let s = EngineSettings::default();
    assert!(s.transfers.min_amount <= s.transfers.max_amount);
    assert!(s.lowcard.min_bet > 0);
    assert_eq!(s.legend.multipliers[0], 0);
    assert!(s.legend.outcome_length < s.legend.multipliers.len());
  }

  #[test]
  fn env_overrides_apply() {
    std::env::set_var("LOWCARD_MIN_BET", "25");
    std::env::set_var("ROOM_MAX_OCCUPANCY", "0");
    let s = EngineSettings::from_env();
    assert_eq!(s.lowcard.min_bet, 25);
    assert_eq!(s.rooms.max_occupancy, None);
    std::env::remove_var("LOWCARD_MIN_BET");
    std::env::remove_var("ROOM_MAX_OCCUPANCY");
  }
}
