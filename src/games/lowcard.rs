//! LowCard: the per-room elimination card game.
//!
//! `!start <bet>` opens a join window; `!j` enters at the starting bet.
//! Each round every surviving player draws with `!d` (or is auto-drawn when
//! the round window closes); the lowest card is out. The last player
//! standing takes the pot.

use super::{RoomCells, TimerHandle};
use crate::config::LowCardSettings;
use crate::durable::{Role, UserRecord};
use crate::error::EngineError;
use crate::events::{GameKind, MessageKind, Outbox, ServerEvent, UserId};
use crate::ledger::{CreditLedger, TxKind};
use rand::Rng;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

const BOT_NAME: &str = "LowCard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LowCardPhase {
  #[default]
  Idle,
  Joining,
  Playing,
  Tally,
  Finished,
}

#[derive(Debug, Clone)]
pub(crate) struct PlayerSlot {
  pub user: UserId,
  pub drawn: Option<u8>,
  pub active: bool,
}

impl PlayerSlot {
  fn new(user: &str) -> Self {
    Self {
      user: user.to_string(),
      drawn: None,
      active: true,
    }
  }
}

/// Per-room game state. Lives in its cell even while idle.
#[derive(Default)]
pub struct LowCardGame {
  phase: LowCardPhase,
  starter: UserId,
  bet: u64,
  pot: u64,
  round: u32,
  tie_replays: u32,
  players: Vec<PlayerSlot>,
  timer: Option<TimerHandle>,
  generation: u64,
}

impl LowCardGame {
  /// Cancel whatever timer is armed and invalidate its generation. Every
  /// transition calls this before arming a replacement, so a stale firing
  /// can never be mistaken for a live one.
  fn supersede(&mut self) -> u64 {
    if let Some(timer) = self.timer.take() {
      timer.cancel();
    }
    self.generation += 1;
    self.generation
  }

  fn reset(&mut self) {
    self.supersede();
    self.phase = LowCardPhase::Idle;
    self.starter.clear();
    self.bet = 0;
    self.pot = 0;
    self.round = 0;
    self.tie_replays = 0;
    self.players.clear();
  }

  fn active_players(&self) -> impl Iterator<Item = &PlayerSlot> + '_ {
    self.players.iter().filter(|p| p.active)
  }
}

/// What a round's drawn values resolve to.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RoundOutcome {
  /// Every survivor drew the same lowest value; replay with the same
  /// players and no new stake.
  FullTie,
  /// Every holder of the lowest value is out.
  Eliminated { out: Vec<UserId>, low: u8 },
}

/// Pure resolution: assumes every active player has drawn.
pub(crate) fn resolve_values(players: &[PlayerSlot]) -> RoundOutcome {
  let low = players
    .iter()
    .filter(|p| p.active)
    .filter_map(|p| p.drawn)
    .min()
    .unwrap_or(0);
  let holders: Vec<UserId> = players
    .iter()
    .filter(|p| p.active && p.drawn == Some(low))
    .map(|p| p.user.clone())
    .collect();
  let active_count = players.iter().filter(|p| p.active).count();
  if holders.len() == active_count {
    RoundOutcome::FullTie
  } else {
    RoundOutcome::Eliminated { out: holders, low }
  }
}

fn draw_card() -> u8 {
  rand::thread_rng().gen_range(1..=13)
}

fn card_name(value: u8) -> String {
  match value {
    1 => "Ace".to_string(),
    11 => "Jack".to_string(),
    12 => "Queen".to_string(),
    13 => "King".to_string(),
    n => n.to_string(),
  }
}

/// The LowCard engine. Cheap to clone; clones share every room's state.
#[derive(Clone)]
pub struct LowCardEngine {
  rooms: RoomCells<LowCardGame>,
  ledger: CreditLedger,
  outbox: Arc<dyn Outbox>,
  settings: LowCardSettings,
}

impl LowCardEngine {
  pub fn new(settings: LowCardSettings, ledger: CreditLedger, outbox: Arc<dyn Outbox>) -> Self {
    Self {
      rooms: RoomCells::new(),
      ledger,
      outbox,
      settings,
    }
  }

  pub async fn phase(&self, room_id: &str) -> LowCardPhase {
    let cell = self.rooms.cell(room_id).await;
    let game = cell.lock().await;
    game.phase
  }

  /// `!start <bet>`: open a game. The starter's stake is debited up front.
  pub async fn start(
    &self,
    room_id: &str,
    starter: &UserRecord,
    bet: u64,
  ) -> Result<(), EngineError> {
    let cell = self.rooms.cell(room_id).await;
    let mut game = cell.lock().await;
    if game.phase != LowCardPhase::Idle {
      return Err(EngineError::GameState(
        "a LowCard game is already running in this room".into(),
      ));
    }
    if bet < self.settings.min_bet {
      return Err(EngineError::Validation(format!(
        "minimum LowCard bet is {}",
        self.settings.min_bet
      )));
    }

    let balance = self
      .ledger
      .adjust(&starter.id, -(bet as i64), TxKind::GameStake, Some("lowcard stake".into()))
      .await?;

    game.phase = LowCardPhase::Joining;
    game.starter = starter.id.clone();
    game.bet = bet;
    game.pot = bet;
    game.round = 0;
    game.tie_replays = 0;
    game.players = vec![PlayerSlot::new(&starter.id)];
    let generation = game.supersede();
    let engine = self.clone();
    let room = room_id.to_string();
    game.timer = Some(TimerHandle::schedule(self.settings.join_window, move || async move {
      engine.close_joining(&room, generation).await;
    }));
    drop(game);

    self.credits(&starter.id, balance).await;
    self
      .phase_event(
        room_id,
        "joining",
        json!({
          "starter": starter.id,
          "bet": bet,
          "window_secs": self.settings.join_window.as_secs(),
        }),
      )
      .await;
    self
      .announce(
        room_id,
        format!(
          "{} started LowCard for {} credits. Type !j to join!",
          starter.display_name, bet
        ),
      )
      .await;
    Ok(())
  }

  /// `!j`: enter the open game at the starting bet.
  pub async fn join(&self, room_id: &str, user: &UserRecord) -> Result<(), EngineError> {
    let cell = self.rooms.cell(room_id).await;
    let mut game = cell.lock().await;
    if game.phase != LowCardPhase::Joining {
      return Err(EngineError::GameState("no LowCard game is accepting players".into()));
    }
    if game.players.iter().any(|p| p.user == user.id) {
      return Err(EngineError::GameState("you already joined this game".into()));
    }

    let bet = game.bet;
    let balance = self
      .ledger
      .adjust(&user.id, -(bet as i64), TxKind::GameStake, Some("lowcard stake".into()))
      .await?;
    game.players.push(PlayerSlot::new(&user.id));
    game.pot += bet;
    let player_count = game.players.len();
    drop(game);

    self.credits(&user.id, balance).await;
    self
      .announce(
        room_id,
        format!("{} is in! {} players so far.", user.display_name, player_count),
      )
      .await;
    Ok(())
  }

  /// `!d`: draw this round's card. Drawing the last outstanding card
  /// resolves the round immediately.
  pub async fn draw(&self, room_id: &str, user: &UserRecord) -> Result<(), EngineError> {
    let cell = self.rooms.cell(room_id).await;
    let mut game = cell.lock().await;
    if game.phase != LowCardPhase::Playing {
      return Err(EngineError::GameState("no LowCard round is in progress".into()));
    }
    let slot = game
      .players
      .iter_mut()
      .find(|p| p.user == user.id)
      .ok_or_else(|| EngineError::GameState("you are not in this game".into()))?;
    if !slot.active {
      return Err(EngineError::GameState("you were already eliminated".into()));
    }
    if slot.drawn.is_some() {
      return Err(EngineError::GameState("you already drew this round".into()));
    }

    let value = draw_card();
    slot.drawn = Some(value);
    self
      .announce(
        room_id,
        format!("{} draws {}.", user.display_name, card_name(value)),
      )
      .await;

    if game.active_players().all(|p| p.drawn.is_some()) {
      self.finish_round(room_id, &mut game).await;
    }
    Ok(())
  }

  /// `!cancel`: the starter or a moderator aborts the game; every
  /// participant's stake comes back.
  pub async fn cancel(
    &self,
    room_id: &str,
    actor: &UserRecord,
    is_moderator: bool,
  ) -> Result<(), EngineError> {
    let cell = self.rooms.cell(room_id).await;
    let mut game = cell.lock().await;
    if game.phase == LowCardPhase::Idle {
      return Err(EngineError::GameState("no LowCard game is running".into()));
    }
    if game.starter != actor.id && !is_moderator {
      return Err(EngineError::Unauthorized("cancel this game".into()));
    }

    let players = std::mem::take(&mut game.players);
    let bet = game.bet;
    game.reset();
    drop(game);

    self.refund_all(room_id, &players, bet).await;
    self
      .phase_event(room_id, "idle", json!({ "reason": "cancelled" }))
      .await;
    self
      .announce(room_id, "LowCard cancelled. All stakes refunded.".into())
      .await;
    Ok(())
  }

  /// Join-window timer target.
  async fn close_joining(&self, room_id: &str, generation: u64) {
    let cell = self.rooms.cell(room_id).await;
    let mut game = cell.lock().await;
    if game.generation != generation || game.phase != LowCardPhase::Joining {
      tracing::debug!("Stale LowCard join timer for room {} ignored", room_id);
      return;
    }

    if game.players.len() < 2 {
      let players = std::mem::take(&mut game.players);
      let bet = game.bet;
      game.reset();
      drop(game);

      self.refund_all(room_id, &players, bet).await;
      self
        .phase_event(room_id, "idle", json!({ "reason": "not_enough_players" }))
        .await;
      self
        .announce(room_id, "Nobody joined. LowCard cancelled, stake refunded.".into())
        .await;
      return;
    }

    self.begin_round(room_id, &mut game).await;
  }

  /// Draw-window timer target: auto-draw stragglers, then resolve.
  async fn close_draws(&self, room_id: &str, generation: u64) {
    let cell = self.rooms.cell(room_id).await;
    let mut game = cell.lock().await;
    if game.generation != generation || game.phase != LowCardPhase::Playing {
      tracing::debug!("Stale LowCard draw timer for room {} ignored", room_id);
      return;
    }

    let mut auto_drawn = Vec::new();
    for slot in game.players.iter_mut().filter(|p| p.active && p.drawn.is_none()) {
      let value = draw_card();
      slot.drawn = Some(value);
      auto_drawn.push((slot.user.clone(), value));
    }
    for (user, value) in auto_drawn {
      self
        .announce(
          room_id,
          format!("{} ran out of time and auto-draws {}.", user, card_name(value)),
        )
        .await;
    }

    self.finish_round(room_id, &mut game).await;
  }

  // Returns a boxed future to break the recursive-async cycle
  // (`begin_round` schedules a timer that runs `close_draws` ->
  // `finish_round` -> `begin_round`); type-erasing one edge lets the
  // compiler resolve `Send` on the scheduled future.
  fn begin_round<'a>(
    &'a self,
    room_id: &'a str,
    game: &'a mut LowCardGame,
  ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
      game.phase = LowCardPhase::Playing;
      game.round += 1;
      for slot in game.players.iter_mut().filter(|p| p.active) {
        slot.drawn = None;
      }
      let generation = game.supersede();
      let engine = self.clone();
      let room = room_id.to_string();
      game.timer = Some(TimerHandle::schedule(self.settings.draw_window, move || async move {
        engine.close_draws(&room, generation).await;
      }));

      let survivors: Vec<&UserId> = game.active_players().map(|p| &p.user).collect();
      self
        .phase_event(
          room_id,
          "playing",
          json!({
            "round": game.round,
            "players": survivors,
            "window_secs": self.settings.draw_window.as_secs(),
          }),
        )
        .await;
      self
        .announce(
          room_id,
          format!("Round {}! Type !d to draw your card.", game.round),
        )
        .await;
    })
  }

  async fn finish_round(&self, room_id: &str, game: &mut LowCardGame) {
    game.supersede();
    game.phase = LowCardPhase::Tally;
    self
      .phase_event(room_id, "tally", json!({ "round": game.round }))
      .await;

    match resolve_values(&game.players) {
      RoundOutcome::FullTie => {
        game.tie_replays += 1;
        if game.tie_replays > self.settings.max_tie_replays {
          self.split_pot(room_id, game).await;
          return;
        }
        self
          .announce(
            room_id,
            "Everyone tied on the low card! Dead round, draw again.".into(),
          )
          .await;
        self.begin_round(room_id, game).await;
      }
      RoundOutcome::Eliminated { out, low } => {
        for slot in game.players.iter_mut().filter(|p| out.contains(&p.user)) {
          slot.active = false;
        }
        self
          .announce(
            room_id,
            format!("{} out with {}.", out.join(", "), card_name(low)),
          )
          .await;

        let survivors: Vec<UserId> = game.active_players().map(|p| p.user.clone()).collect();
        if survivors.len() == 1 {
          self.crown_winner(room_id, game, &survivors[0]).await;
        } else {
          game.tie_replays = 0;
          self.begin_round(room_id, game).await;
        }
      }
    }
  }

  async fn crown_winner(&self, room_id: &str, game: &mut LowCardGame, winner: &str) {
    let pot = game.pot;
    game.phase = LowCardPhase::Finished;
    match self
      .ledger
      .adjust(winner, pot as i64, TxKind::GamePayout, Some("lowcard pot".into()))
      .await
    {
      Ok(balance) => self.credits(winner, balance).await,
      Err(e) => tracing::error!("LowCard payout to {} failed: {}", winner, e),
    }
    self
      .phase_event(room_id, "finished", json!({ "winner": winner, "pot": pot }))
      .await;
    self
      .announce(room_id, format!("{} wins the pot of {} credits!", winner, pot))
      .await;
    game.reset();
  }

  /// Tie-cap bailout: split the pot among survivors, remainder to the
  /// earliest joiner.
  async fn split_pot(&self, room_id: &str, game: &mut LowCardGame) {
    let survivors: Vec<UserId> = game.active_players().map(|p| p.user.clone()).collect();
    let pot = game.pot;
    let share = pot / survivors.len() as u64;
    let remainder = pot % survivors.len() as u64;
    let entries: Vec<(UserId, u64)> = survivors
      .iter()
      .enumerate()
      .map(|(i, user)| (user.clone(), if i == 0 { share + remainder } else { share }))
      .collect();

    match self
      .ledger
      .credit_many(&entries, TxKind::GamePayout, Some("lowcard tie split".into()))
      .await
    {
      Ok(results) => {
        for (user, balance) in results {
          self.credits(&user, balance).await;
        }
      }
      Err(e) => tracing::error!("LowCard tie split in room {} failed: {}", room_id, e),
    }

    self
      .phase_event(
        room_id,
        "finished",
        json!({ "split_between": survivors, "pot": pot }),
      )
      .await;
    self
      .announce(
        room_id,
        format!("Too many dead rounds! Pot of {} split between {}.", pot, survivors.join(", ")),
      )
      .await;
    game.reset();
  }

  async fn refund_all(&self, room_id: &str, players: &[PlayerSlot], bet: u64) {
    if players.is_empty() {
      return;
    }
    let entries: Vec<(UserId, u64)> =
      players.iter().map(|p| (p.user.clone(), bet)).collect();
    match self
      .ledger
      .credit_many(&entries, TxKind::GameRefund, Some("lowcard refund".into()))
      .await
    {
      Ok(results) => {
        for (user, balance) in results {
          self.credits(&user, balance).await;
        }
      }
      Err(e) => tracing::error!("LowCard refund in room {} failed: {}", room_id, e),
    }
  }

  async fn phase_event(&self, room_id: &str, phase: &str, payload: serde_json::Value) {
    self
      .outbox
      .to_room(
        room_id,
        ServerEvent::Game {
          room: room_id.to_string(),
          game: GameKind::Lowcard,
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
