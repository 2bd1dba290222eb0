//! Legend: the per-room pooled betting game.
//!
//! The first `!b <group> <amount>` opens a betting window; wagers
//! accumulate in a pool keyed by (user, group). When the window closes (or
//! a `!lock`), a short outcome sequence is drawn from the symbol set; every
//! bet on a symbol that appeared pays stake times the multiplier for its
//! occurrence count, and everything else feeds the house.

use super::{RoomCells, TimerHandle};
use crate::config::LegendSettings;
use crate::durable::{Role, UserRecord};
use crate::error::EngineError;
use crate::events::{GameKind, MessageKind, Outbox, ServerEvent, UserId};
use crate::ledger::{CreditLedger, TxKind};
use rand::Rng;
use serde_json::json;
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

const BOT_NAME: &str = "Legend";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegendSymbol {
  Dragon,
  Phoenix,
  Tiger,
  Turtle,
  Qilin,
  Serpent,
}

impl LegendSymbol {
  pub const ALL: [LegendSymbol; 6] = [
    LegendSymbol::Dragon,
    LegendSymbol::Phoenix,
    LegendSymbol::Tiger,
    LegendSymbol::Turtle,
    LegendSymbol::Qilin,
    LegendSymbol::Serpent,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      LegendSymbol::Dragon => "dragon",
      LegendSymbol::Phoenix => "phoenix",
      LegendSymbol::Tiger => "tiger",
      LegendSymbol::Turtle => "turtle",
      LegendSymbol::Qilin => "qilin",
      LegendSymbol::Serpent => "serpent",
    }
  }
}

impl fmt::Display for LegendSymbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for LegendSymbol {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .iter()
      .find(|sym| sym.as_str().eq_ignore_ascii_case(s))
      .copied()
      .ok_or(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LegendPhase {
  #[default]
  Idle,
  Betting,
  Calculating,
  Finished,
}

/// Per-room game state.
#[derive(Default)]
pub struct LegendGame {
  phase: LegendPhase,
  starter: UserId,
  bets: HashMap<(UserId, LegendSymbol), u64>,
  total_pool: u64,
  timer: Option<TimerHandle>,
  generation: u64,
}

impl LegendGame {
  fn supersede(&mut self) -> u64 {
    if let Some(timer) = self.timer.take() {
      timer.cancel();
    }
    self.generation += 1;
    self.generation
  }

  fn reset(&mut self) {
    self.supersede();
    self.phase = LegendPhase::Idle;
    self.starter.clear();
    self.bets.clear();
    self.total_pool = 0;
  }
}

/// Pure settlement: stake times multiplier for every symbol that occurred,
/// summed per user. Bets on absent symbols pay nothing.
pub(crate) fn compute_payouts(
  bets: &HashMap<(UserId, LegendSymbol), u64>,
  outcome: &[LegendSymbol],
  multipliers: &[u64; 4],
) -> Vec<(UserId, u64)> {
  let mut counts: HashMap<LegendSymbol, usize> = HashMap::new();
  for sym in outcome {
    *counts.entry(*sym).or_default() += 1;
  }

  let mut per_user: HashMap<UserId, u64> = HashMap::new();
  for ((user, symbol), stake) in bets {
    if let Some(&count) = counts.get(symbol) {
      let index = count.min(multipliers.len() - 1);
      let win = stake.saturating_mul(multipliers[index]);
      *per_user.entry(user.clone()).or_default() += win;
    }
  }

  let mut payouts: Vec<(UserId, u64)> = per_user.into_iter().collect();
  payouts.sort();
  payouts
}

fn draw_outcome(length: usize) -> Vec<LegendSymbol> {
  let mut rng = rand::thread_rng();
  (0..length)
    .map(|_| LegendSymbol::ALL[rng.gen_range(0..LegendSymbol::ALL.len())])
    .collect()
}

/// The Legend engine. Cheap to clone; clones share every room's state.
#[derive(Clone)]
pub struct LegendEngine {
  rooms: RoomCells<LegendGame>,
  ledger: CreditLedger,
  outbox: Arc<dyn Outbox>,
  settings: LegendSettings,
}

impl LegendEngine {
  pub fn new(settings: LegendSettings, ledger: CreditLedger, outbox: Arc<dyn Outbox>) -> Self {
    Self {
      rooms: RoomCells::new(),
      ledger,
      outbox,
      settings,
    }
  }

  pub async fn phase(&self, room_id: &str) -> LegendPhase {
    let cell = self.rooms.cell(room_id).await;
    let game = cell.lock().await;
    game.phase
  }

  /// `!b <group> <amount>`: wager on a group. The first bet in an idle room
  /// opens the betting window.
  pub async fn bet(
    &self,
    room_id: &str,
    user: &UserRecord,
    group: &str,
    amount: u64,
  ) -> Result<(), EngineError> {
    let symbol = LegendSymbol::from_str(group).map_err(|_| {
      EngineError::Validation(format!(
        "unknown group '{}'; pick one of {}",
        group,
        LegendSymbol::ALL.map(|s| s.as_str()).join(", ")
      ))
    })?;
    if amount < self.settings.min_bet {
      return Err(EngineError::Validation(format!(
        "minimum Legend bet is {}",
        self.settings.min_bet
      )));
    }

    let cell = self.rooms.cell(room_id).await;
    let mut game = cell.lock().await;
    let opened = match game.phase {
      LegendPhase::Idle => {
        game.phase = LegendPhase::Betting;
        game.starter = user.id.clone();
        let generation = game.supersede();
        let engine = self.clone();
        let room = room_id.to_string();
        game.timer = Some(TimerHandle::schedule(
          self.settings.betting_window,
          move || async move {
            engine.close_betting(&room, generation).await;
          },
        ));
        true
      }
      LegendPhase::Betting => false,
      _ => return Err(EngineError::GameState("betting is closed".into())),
    };

    let balance = self
      .ledger
      .adjust(&user.id, -(amount as i64), TxKind::GameStake, Some("legend stake".into()))
      .await
      .map_err(|e| {
        // An opening bet that cannot be funded closes the window again.
        if opened {
          game.reset();
        }
        e
      })?;

    *game.bets.entry((user.id.clone(), symbol)).or_default() += amount;
    game.total_pool += amount;
    let pool = game.total_pool;
    drop(game);

    self.credits(&user.id, balance).await;
    if opened {
      self
        .phase_event(
          room_id,
          "betting",
          json!({
            "starter": user.id,
            "window_secs": self.settings.betting_window.as_secs(),
          }),
        )
        .await;
      self
        .announce(
          room_id,
          format!(
            "{} opened Legend! Bet with !b <group> <amount>. Groups: {}.",
            user.display_name,
            LegendSymbol::ALL.map(|s| s.as_str()).join(", ")
          ),
        )
        .await;
    }
    self
      .announce(
        room_id,
        format!(
          "{} bets {} on {} (pool {}).",
          user.display_name, amount, symbol, pool
        ),
      )
      .await;
    Ok(())
  }

  /// `!lock`: the starter or a moderator closes betting early.
  pub async fn lock(
    &self,
    room_id: &str,
    actor: &UserRecord,
    is_moderator: bool,
  ) -> Result<(), EngineError> {
    let cell = self.rooms.cell(room_id).await;
    let mut game = cell.lock().await;
    if game.phase != LegendPhase::Betting {
      return Err(EngineError::GameState("no Legend betting is open".into()));
    }
    if game.starter != actor.id && !is_moderator {
      return Err(EngineError::Unauthorized("lock the betting".into()));
    }
    game.supersede();
    self.settle(room_id, &mut game).await;
    Ok(())
  }

  /// `!cancel`: abort before settlement; every stake comes back exactly.
  pub async fn cancel(
    &self,
    room_id: &str,
    actor: &UserRecord,
    is_moderator: bool,
  ) -> Result<(), EngineError> {
    let cell = self.rooms.cell(room_id).await;
    let mut game = cell.lock().await;
    if game.phase != LegendPhase::Betting {
      return Err(EngineError::GameState("no Legend betting is open".into()));
    }
    if game.starter != actor.id && !is_moderator {
      return Err(EngineError::Unauthorized("cancel this game".into()));
    }

    let bets = std::mem::take(&mut game.bets);
    game.reset();
    drop(game);

    let mut refunds: HashMap<UserId, u64> = HashMap::new();
    for ((user, _), stake) in bets {
      *refunds.entry(user).or_default() += stake;
    }
    let mut entries: Vec<(UserId, u64)> = refunds.into_iter().collect();
    entries.sort();
    match self
      .ledger
      .credit_many(&entries, TxKind::GameRefund, Some("legend refund".into()))
      .await
    {
      Ok(results) => {
        for (user, balance) in results {
          self.credits(&user, balance).await;
        }
      }
      Err(e) => tracing::error!("Legend refund in room {} failed: {}", room_id, e),
    }

    self
      .phase_event(room_id, "idle", json!({ "reason": "cancelled" }))
      .await;
    self
      .announce(room_id, "Legend cancelled. All stakes refunded.".into())
      .await;
    Ok(())
  }

  /// Betting-window timer target.
  async fn close_betting(&self, room_id: &str, generation: u64) {
    let cell = self.rooms.cell(room_id).await;
    let mut game = cell.lock().await;
    if game.generation != generation || game.phase != LegendPhase::Betting {
      tracing::debug!("Stale Legend betting timer for room {} ignored", room_id);
      return;
    }
    self.settle(room_id, &mut game).await;
  }

  async fn settle(&self, room_id: &str, game: &mut LegendGame) {
    game.phase = LegendPhase::Calculating;
    self
      .phase_event(room_id, "calculating", json!({ "pool": game.total_pool }))
      .await;

    let outcome = draw_outcome(self.settings.outcome_length);
    let payouts = compute_payouts(&game.bets, &outcome, &self.settings.multipliers);

    if !payouts.is_empty() {
      match self
        .ledger
        .credit_many(&payouts, TxKind::GamePayout, Some("legend payout".into()))
        .await
      {
        Ok(results) => {
          for (user, balance) in results {
            self.credits(&user, balance).await;
          }
        }
        Err(e) => tracing::error!("Legend payout in room {} failed: {}", room_id, e),
      }
    }

    let outcome_names: Vec<&str> = outcome.iter().map(|s| s.as_str()).collect();
    let winners: Vec<serde_json::Value> = payouts
      .iter()
      .map(|(user, amount)| json!({ "user": user, "amount": amount }))
      .collect();

    game.phase = LegendPhase::Finished;
    self
      .phase_event(
        room_id,
        "finished",
        json!({ "outcome": outcome_names, "winners": winners, "pool": game.total_pool }),
      )
      .await;
    let summary = if payouts.is_empty() {
      format!("The legends were {}. The house takes it all!", outcome_names.join(", "))
    } else {
      let lines: Vec<String> = payouts
        .iter()
        .map(|(user, amount)| format!("{} wins {}", user, amount))
        .collect();
      format!(
        "The legends were {}. {}!",
        outcome_names.join(", "),
        lines.join(", ")
      )
    };
    self.announce(room_id, summary).await;
    game.reset();
  }

  async fn phase_event(&self, room_id: &str, phase: &str, payload: serde_json::Value) {
    self
      .outbox
      .to_room(
        room_id,
        ServerEvent::Game {
          room: room_id.to_string(),
          game: GameKind::Legend,
          phase: phase.to_string(),
          payload,
        },
      )
      .await;
  }

  async fn announce(&self, room_id: &str, text: String) {
    self
      .outbox
      .to_room(
        room_id,
        ServerEvent::Chat {
          room: room_id.to_string(),
          from: BOT_NAME.to_string(),
          from_role: Role::User,
          kind: MessageKind::GameBot,
          text,
        },
      )
      .await;
  }

  async fn credits(&self, user: &str, balance: u64) {
    self
      .outbox
      .to_user(user, ServerEvent::Credits { balance })
      .await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::TransferLimits;
  use crate::durable::MemoryDurable;
  use crate::store::InMemoryStore;
  use crate::testutil::RecordingOutbox;
  use std::time::Duration;

  fn bets(entries: &[(&str, LegendSymbol, u64)]) -> HashMap<(UserId, LegendSymbol), u64> {
    entries
      .iter()
      .map(|(user, sym, stake)| ((user.to_string(), *sym), *stake))
      .collect()
  }

  #[test]
  fn payouts_follow_the_multiplier_table() {
    let bets = bets(&[
      ("a", LegendSymbol::Dragon, 100),
      ("b", LegendSymbol::Tiger, 50),
      ("c", LegendSymbol::Turtle, 30),
    ]);
    let outcome = [LegendSymbol::Dragon, LegendSymbol::Dragon, LegendSymbol::Tiger];
    let payouts = compute_payouts(&bets, &outcome, &[0, 2, 3, 4]);
    // dragon occurred twice: 100 x3; tiger once: 50 x2; turtle absent: forfeited.
    assert_eq!(
      payouts,
      vec![("a".to_string(), 300), ("b".to_string(), 100)]
    );
  }

  #[test]
  fn total_payout_is_bounded_by_pool_times_max_multiplier() {
    let bets = bets(&[
      ("a", LegendSymbol::Dragon, 10),
      ("a", LegendSymbol::Tiger, 20),
      ("b", LegendSymbol::Qilin, 30),
    ]);
    let pool: u64 = bets.values().sum();
    let multipliers = [0u64, 2, 3, 4];

    // Worst case over every possible 3-symbol outcome.
    for x in LegendSymbol::ALL {
      for y in LegendSymbol::ALL {
        for z in LegendSymbol::ALL {
          let total: u64 = compute_payouts(&bets, &[x, y, z], &multipliers)
            .iter()
            .map(|(_, amount)| amount)
            .sum();
          assert!(total <= pool * multipliers[3]);
        }
      }
    }
  }

  #[test]
  fn symbols_parse_case_insensitively() {
    assert_eq!("Dragon".parse::<LegendSymbol>(), Ok(LegendSymbol::Dragon));
    assert_eq!("QILIN".parse::<LegendSymbol>(), Ok(LegendSymbol::Qilin));
    assert!("unicorn".parse::<LegendSymbol>().is_err());
  }

  async fn engine_with(users: &[(&str, u64)]) -> (LegendEngine, CreditLedger, Arc<RecordingOutbox>) {
    let durable = MemoryDurable::new();
    for (id, balance) in users {
      durable.seed_user(UserRecord::new(*id, *balance)).await;
    }
    let ledger = CreditLedger::new(
      TransferLimits::default(),
      Arc::new(InMemoryStore::new()),
      Arc::new(durable),
    );
    let outbox = RecordingOutbox::new();
    let engine = LegendEngine::new(
      LegendSettings {
        min_bet: 10,
        betting_window: Duration::from_secs(45),
        outcome_length: 3,
        multipliers: [0, 2, 3, 4],
      },
      ledger.clone(),
      outbox.clone(),
    );
    (engine, ledger, outbox)
  }

  async fn let_timers_land() {
    for _ in 0..10 {
      tokio::task::yield_now().await;
    }
  }

  #[tokio::test(start_paused = true)]
  async fn first_bet_opens_the_window_and_wagers_accumulate() {
    let (engine, ledger, _) = engine_with(&[("a", 200), ("b", 200)]).await;
    let a = UserRecord::new("a", 0);
    let b = UserRecord::new("b", 0);

    assert!(matches!(
      engine.bet("lobby", &a, "dragon", 5).await,
      Err(EngineError::Validation(_))
    ));
    assert!(matches!(
      engine.bet("lobby", &a, "unicorn", 50).await,
      Err(EngineError::Validation(_))
    ));

    engine.bet("lobby", &a, "dragon", 50).await.unwrap();
    assert_eq!(engine.phase("lobby").await, LegendPhase::Betting);

    // Multiple groups per user, repeat bets accumulate.
    engine.bet("lobby", &a, "tiger", 20).await.unwrap();
    engine.bet("lobby", &b, "dragon", 30).await.unwrap();
    engine.bet("lobby", &b, "dragon", 30).await.unwrap();
    assert_eq!(ledger.balance("a").await.unwrap(), 130);
    assert_eq!(ledger.balance("b").await.unwrap(), 140);
  }

  #[tokio::test(start_paused = true)]
  async fn cancel_returns_every_exact_stake() {
    let (engine, ledger, _) = engine_with(&[("a", 200), ("b", 200)]).await;
    let a = UserRecord::new("a", 0);
    let b = UserRecord::new("b", 0);

    engine.bet("lobby", &a, "dragon", 50).await.unwrap();
    engine.bet("lobby", &a, "phoenix", 25).await.unwrap();
    engine.bet("lobby", &b, "serpent", 40).await.unwrap();

    assert!(matches!(
      engine.cancel("lobby", &b, false).await,
      Err(EngineError::Unauthorized(_))
    ));
    engine.cancel("lobby", &a, false).await.unwrap();

    assert_eq!(engine.phase("lobby").await, LegendPhase::Idle);
    assert_eq!(ledger.balance("a").await.unwrap(), 200);
    assert_eq!(ledger.balance("b").await.unwrap(), 200);
  }

  #[tokio::test(start_paused = true)]
  async fn window_timeout_settles_and_returns_to_idle() {
    let (engine, ledger, _) = engine_with(&[("a", 200)]).await;
    let a = UserRecord::new("a", 0);

    engine.bet("lobby", &a, "dragon", 50).await.unwrap();
    tokio::time::advance(Duration::from_secs(46)).await;
    let_timers_land().await;

    assert_eq!(engine.phase("lobby").await, LegendPhase::Idle);
    // Either the bet lost (150) or paid by the table (x2/x3/x4).
    let balance = ledger.balance("a").await.unwrap();
    assert!([150u64, 250, 300, 350].contains(&balance), "balance {}", balance);

    // Betting after settlement is a fresh game, not a late wager.
    engine.bet("lobby", &a, "tiger", 10).await.unwrap();
    assert_eq!(engine.phase("lobby").await, LegendPhase::Betting);
  }

  #[tokio::test(start_paused = true)]
  async fn lock_settles_early_and_stale_timer_is_ignored() {
    let (engine, ledger, _) = engine_with(&[("a", 200), ("b", 200)]).await;
    let a = UserRecord::new("a", 0);
    let b = UserRecord::new("b", 0);

    engine.bet("lobby", &a, "dragon", 50).await.unwrap();
    assert!(matches!(
      engine.lock("lobby", &b, false).await,
      Err(EngineError::Unauthorized(_))
    ));
    engine.lock("lobby", &a, false).await.unwrap();
    assert_eq!(engine.phase("lobby").await, LegendPhase::Idle);
    let settled_balance = ledger.balance("a").await.unwrap();

    // The original betting-window timer must not settle a second time.
    tokio::time::advance(Duration::from_secs(60)).await;
    let_timers_land().await;
    assert_eq!(ledger.balance("a").await.unwrap(), settled_balance);
  }
}
