//! Command grammar and routing.
//!
//! Inbound chat text is classified as a slash command, a bang shortcut for
//! the game engines, or plain chat. Slash commands are a closed set: the
//! [`COMMANDS`] table declares each command's name, argument shape, and the
//! access it requires, and dispatch resolves through the table, so a new
//! command cannot reach its handler without an access declaration.
//!
//! Every rejection (bad arguments, missing authorization, resource state)
//! is a private warning to the sender; nothing about a failed command is
//! ever broadcast to the room.

use crate::config::EngineSettings;
use crate::durable::{DurableStore, UserRecord};
use crate::error::EngineError;
use crate::events::{AdminAction, ClientFrame, MessageKind, Outbox, ServerEvent, UserId};
use crate::games::{LegendEngine, LegendPhase, LowCardEngine, LowCardPhase};
use crate::ledger::CreditLedger;
use crate::presence::RoomRegistry;
use crate::rate_limit::FloodGuard;
use crate::store::EphemeralStore;
use std::sync::Arc;

mod economy;
mod moderation;
mod utility;

pub use economy::gift_catalog;

/// Who may invoke a command. Checked before the handler ever runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
  Everyone,
  /// Room owner, global admin, or room moderator
  RoomModerator,
  /// Room owner or global admin
  OwnerOrAdmin,
}

/// Target of a `/silence`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SilenceTarget {
  User(UserId),
  Room,
}

/// The closed set of slash commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  Kick { target: UserId },
  Ban { target: UserId, reason: Option<String> },
  Unban { target: UserId },
  Silence { target: SilenceTarget, minutes: Option<u64> },
  Promote { target: UserId },
  Demote { target: UserId },
  Bump { target: UserId },
  Gift { item: String, target: UserId, note: Option<String> },
  Shower { item: String },
  Me { action: String },
  Roll { max: Option<u64> },
  Announce { text: Option<String> },
  Whois { target: UserId },
  Friend { target: UserId },
  Unfriend { target: UserId },
}

/// One row of the command table.
pub struct CommandSpec {
  pub name: &'static str,
  pub usage: &'static str,
  pub access: Access,
  parse: fn(&str) -> Option<Command>,
}

fn one_word(args: &str) -> Option<&str> {
  let mut words = args.split_whitespace();
  let word = words.next()?;
  words.next().is_none().then_some(word)
}

/// Declarations for every built-in. Handlers are reached only through this
/// table, so the access column is the authorization source of truth.
pub static COMMANDS: &[CommandSpec] = &[
  CommandSpec {
    name: "kick",
    usage: "/kick <user>",
    access: Access::RoomModerator,
    parse: |args| {
      one_word(args).map(|target| Command::Kick { target: target.to_string() })
    },
  },
  CommandSpec {
    name: "ban",
    usage: "/ban <user> [reason]",
    access: Access::RoomModerator,
    parse: |args| {
      let mut words = args.split_whitespace();
      let target = words.next()?.to_string();
      let reason = {
        let rest = words.collect::<Vec<_>>().join(" ");
        (!rest.is_empty()).then_some(rest)
      };
      Some(Command::Ban { target, reason })
    },
  },
  CommandSpec {
    name: "unban",
    usage: "/unban <user>",
    access: Access::RoomModerator,
    parse: |args| {
      one_word(args).map(|target| Command::Unban { target: target.to_string() })
    },
  },
  CommandSpec {
    name: "silence",
    usage: "/silence <user|*> [minutes]",
    access: Access::RoomModerator,
    parse: |args| {
      let mut words = args.split_whitespace();
      let who = words.next()?;
      let minutes = match words.next() {
        Some(m) => Some(m.parse().ok()?),
        None => None,
      };
      if words.next().is_some() {
        return None;
      }
      let target = if who == "*" {
        SilenceTarget::Room
      } else {
        SilenceTarget::User(who.to_string())
      };
      Some(Command::Silence { target, minutes })
    },
  },
  CommandSpec {
    name: "mod",
    usage: "/mod <user>",
    access: Access::OwnerOrAdmin,
    parse: |args| {
      one_word(args).map(|target| Command::Promote { target: target.to_string() })
    },
  },
  CommandSpec {
    name: "unmod",
    usage: "/unmod <user>",
    access: Access::OwnerOrAdmin,
    parse: |args| {
      one_word(args).map(|target| Command::Demote { target: target.to_string() })
    },
  },
  CommandSpec {
    name: "bump",
    usage: "/bump <user>",
    access: Access::RoomModerator,
    parse: |args| {
      one_word(args).map(|target| Command::Bump { target: target.to_string() })
    },
  },
  CommandSpec {
    name: "gift",
    usage: "/gift <item> <user> [- note]",
    access: Access::Everyone,
    parse: |args| {
      // The optional note follows a " - " separator to allow spaces.
      let (head, note) = match args.split_once(" - ") {
        Some((head, note)) => (head, Some(note.trim().to_string())),
        None => (args, None),
      };
      let mut words = head.split_whitespace();
      let item = words.next()?.to_string();
      let target = words.next()?.to_string();
      if words.next().is_some() {
        return None;
      }
      let note = note.filter(|n| !n.is_empty());
      Some(Command::Gift { item, target, note })
    },
  },
  CommandSpec {
    name: "shower",
    usage: "/shower <item>",
    access: Access::Everyone,
    parse: |args| {
      one_word(args).map(|item| Command::Shower { item: item.to_string() })
    },
  },
  CommandSpec {
    name: "me",
    usage: "/me <action>",
    access: Access::Everyone,
    parse: |args| {
      let action = args.trim();
      (!action.is_empty()).then(|| Command::Me { action: action.to_string() })
    },
  },
  CommandSpec {
    name: "roll",
    usage: "/roll [max]",
    access: Access::Everyone,
    parse: |args| match one_word(args) {
      Some(max) => max.parse().ok().map(|max| Command::Roll { max: Some(max) }),
      None if args.trim().is_empty() => Some(Command::Roll { max: None }),
      None => None,
    },
  },
  CommandSpec {
    name: "announce",
    usage: "/announce <text|off>",
    access: Access::RoomModerator,
    parse: |args| {
      let text = args.trim();
      if text.is_empty() {
        return None;
      }
      Some(Command::Announce {
        text: (text != "off").then(|| text.to_string()),
      })
    },
  },
  CommandSpec {
    name: "whois",
    usage: "/whois <user>",
    access: Access::Everyone,
    parse: |args| {
      one_word(args).map(|target| Command::Whois { target: target.to_string() })
    },
  },
  CommandSpec {
    name: "f",
    usage: "/f <user>",
    access: Access::Everyone,
    parse: |args| {
      one_word(args).map(|target| Command::Friend { target: target.to_string() })
    },
  },
  CommandSpec {
    name: "uf",
    usage: "/uf <user>",
    access: Access::Everyone,
    parse: |args| {
      one_word(args).map(|target| Command::Unfriend { target: target.to_string() })
    },
  },
];

fn find_spec(name: &str) -> Option<&'static CommandSpec> {
  COMMANDS.iter().find(|spec| spec.name == name)
}

/// Bang shortcuts forwarded to the game engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shortcut {
  Start { bet: u64 },
  Join,
  Draw,
  Bet { group: String, amount: u64 },
  Lock,
  Cancel,
}

/// How one line of chat text was classified.
#[derive(Debug)]
enum Classified {
  Slash { name: String, args: String },
  Shortcut(Shortcut),
  Chat,
}

fn classify(text: &str) -> Result<Classified, EngineError> {
  let trimmed = text.trim();
  if let Some(rest) = trimmed.strip_prefix('/') {
    let (name, args) = match rest.split_once(char::is_whitespace) {
      Some((name, args)) => (name, args.trim()),
      None => (rest, ""),
    };
    return Ok(Classified::Slash {
      name: name.to_ascii_lowercase(),
      args: args.to_string(),
    });
  }
  if let Some(rest) = trimmed.strip_prefix('!') {
    let mut words = rest.split_whitespace();
    let shortcut = match words.next() {
      Some("start") => {
        let bet = words
          .next()
          .and_then(|w| w.parse().ok())
          .ok_or_else(|| EngineError::Validation("usage: !start <bet>".into()))?;
        Some(Shortcut::Start { bet })
      }
      Some("j") => Some(Shortcut::Join),
      Some("d") => Some(Shortcut::Draw),
      Some("b") => {
        let group = words.next();
        let amount = words.next().and_then(|w| w.parse().ok());
        match (group, amount) {
          (Some(group), Some(amount)) => Some(Shortcut::Bet {
            group: group.to_string(),
            amount,
          }),
          _ => return Err(EngineError::Validation("usage: !b <group> <amount>".into())),
        }
      }
      Some("lock") => Some(Shortcut::Lock),
      Some("cancel") => Some(Shortcut::Cancel),
      // Unrecognized bang text is just chat ("!!" and friends).
      _ => None,
    };
    if let Some(shortcut) = shortcut {
      return Ok(Classified::Shortcut(shortcut));
    }
  }
  Ok(Classified::Chat)
}

/// The engine facade: owns the registry, ledger, guard, and game engines,
/// and turns inbound frames into state changes and broadcasts.
pub struct Router {
  settings: EngineSettings,
  registry: RoomRegistry,
  ledger: CreditLedger,
  guard: FloodGuard,
  lowcard: LowCardEngine,
  legend: LegendEngine,
  durable: Arc<dyn DurableStore>,
  outbox: Arc<dyn Outbox>,
}

impl Router {
  pub fn new(
    settings: EngineSettings,
    ephemeral: Arc<dyn EphemeralStore>,
    durable: Arc<dyn DurableStore>,
    outbox: Arc<dyn Outbox>,
  ) -> Self {
    let registry = RoomRegistry::new(settings.rooms.clone(), ephemeral.clone(), durable.clone());
    let ledger = CreditLedger::new(settings.transfers.clone(), ephemeral, durable.clone());
    let guard = FloodGuard::new(settings.flood.clone());
    let lowcard = LowCardEngine::new(settings.lowcard.clone(), ledger.clone(), outbox.clone());
    let legend = LegendEngine::new(settings.legend.clone(), ledger.clone(), outbox.clone());
    Self {
      settings,
      registry,
      ledger,
      guard,
      lowcard,
      legend,
      durable,
      outbox,
    }
  }

  pub fn registry(&self) -> &RoomRegistry {
    &self.registry
  }

  pub fn ledger(&self) -> &CreditLedger {
    &self.ledger
  }

  /// Handle one inbound frame. Errors have already been reported privately
  /// to the sender when this returns; the result only tells the gateway
  /// whether the frame took effect (it tracks joins that way).
  pub async fn handle_frame(&self, user_id: &str, frame: ClientFrame) -> Result<(), EngineError> {
    let result = match frame {
      ClientFrame::Join { room } => self.join_room(user_id, &room).await,
      ClientFrame::Leave { room } => self.leave_room(user_id, &room).await,
      ClientFrame::Chat { room, text } => self.handle_chat(user_id, &room, &text).await,
      ClientFrame::Admin {
        room,
        action,
        target,
        reason,
      } => {
        let command = match action {
          AdminAction::Kick => Command::Kick { target },
          AdminAction::Ban => Command::Ban { target, reason },
          AdminAction::Unban => Command::Unban { target },
          AdminAction::Silence => Command::Silence {
            target: SilenceTarget::User(target),
            minutes: None,
          },
          AdminAction::Mod => Command::Promote { target },
          AdminAction::Unmod => Command::Demote { target },
        };
        self.run_admin_command(user_id, &room, command).await
      }
      ClientFrame::Shortcut { room, text } => self.handle_chat(user_id, &room, &text).await,
    };

    if let Err(ref error) = result {
      self.report(user_id, error).await;
    }
    result
  }

  /// Join a room and tell everyone about the new roster.
  pub async fn join_room(&self, user_id: &str, room_id: &str) -> Result<(), EngineError> {
    let actor = self.fetch_actor(user_id).await?;
    self.registry.join(room_id, &actor).await?;
    self.broadcast_roster(room_id).await;
    self
      .outbox
      .to_room(
        room_id,
        ServerEvent::Chat {
          room: room_id.to_string(),
          from: actor.id.clone(),
          from_role: actor.role,
          kind: MessageKind::System,
          text: format!("{} joined the room", actor.display_name),
        },
      )
      .await;
    if let Some(text) = self.registry.announcement(room_id).await {
      self
        .outbox
        .to_user(
          user_id,
          ServerEvent::Chat {
            room: room_id.to_string(),
            from: actor.id.clone(),
            from_role: actor.role,
            kind: MessageKind::Announce,
            text,
          },
        )
        .await;
    }
    Ok(())
  }

  pub async fn leave_room(&self, user_id: &str, room_id: &str) -> Result<(), EngineError> {
    self.registry.leave(room_id, user_id).await?;
    self.broadcast_roster(room_id).await;
    self
      .outbox
      .to_room(
        room_id,
        ServerEvent::Chat {
          room: room_id.to_string(),
          from: user_id.to_string(),
          from_role: crate::durable::Role::User,
          kind: MessageKind::System,
          text: format!("{} left the room", user_id),
        },
      )
      .await;
    Ok(())
  }

  /// Classify and execute one line of chat text.
  pub async fn handle_chat(
    &self,
    user_id: &str,
    room_id: &str,
    text: &str,
  ) -> Result<(), EngineError> {
    let actor = self.fetch_actor(user_id).await?;
    if !self.registry.is_member(room_id, user_id).await? {
      return Err(EngineError::NotInRoom);
    }
    self.guard.check_message(user_id, room_id, text.len()).await?;

    match classify(text)? {
      Classified::Slash { name, args } => {
        let spec = find_spec(&name).ok_or_else(|| {
          EngineError::Validation(format!("unknown command /{}", name))
        })?;
        self.check_access(room_id, &actor, spec.access).await?;
        let command = (spec.parse)(&args)
          .ok_or_else(|| EngineError::Validation(format!("usage: {}", spec.usage)))?;
        self.dispatch(room_id, &actor, command).await
      }
      Classified::Shortcut(shortcut) => {
        if self.registry.is_silenced(room_id, &actor).await {
          return Err(EngineError::Silenced);
        }
        self.dispatch_shortcut(room_id, &actor, shortcut).await
      }
      Classified::Chat => {
        if self.registry.is_silenced(room_id, &actor).await {
          return Err(EngineError::Silenced);
        }
        self
          .outbox
          .to_room(
            room_id,
            ServerEvent::Chat {
              room: room_id.to_string(),
              from: actor.id.clone(),
              from_role: actor.role,
              kind: MessageKind::Chat,
              text: text.to_string(),
            },
          )
          .await;
        Ok(())
      }
    }
  }

  /// Structured admin frames resolve through the same table as chat text,
  /// including its access column.
  async fn run_admin_command(
    &self,
    user_id: &str,
    room_id: &str,
    command: Command,
  ) -> Result<(), EngineError> {
    let actor = self.fetch_actor(user_id).await?;
    let access = match command {
      Command::Promote { .. } | Command::Demote { .. } => Access::OwnerOrAdmin,
      _ => Access::RoomModerator,
    };
    self.check_access(room_id, &actor, access).await?;
    self.dispatch(room_id, &actor, command).await
  }

  async fn check_access(
    &self,
    room_id: &str,
    actor: &UserRecord,
    access: Access,
  ) -> Result<(), EngineError> {
    let rank = self.registry.moderation_rank(room_id, actor).await;
    let required = match access {
      Access::Everyone => 0,
      Access::RoomModerator => 1,
      Access::OwnerOrAdmin => 2,
    };
    if rank < required {
      return Err(EngineError::Unauthorized("use this command".into()));
    }
    Ok(())
  }

  async fn dispatch(
    &self,
    room_id: &str,
    actor: &UserRecord,
    command: Command,
  ) -> Result<(), EngineError> {
    match command {
      Command::Kick { target } => moderation::kick(self, room_id, actor, &target).await,
      Command::Ban { target, reason } => {
        moderation::ban(self, room_id, actor, &target, reason).await
      }
      Command::Unban { target } => moderation::unban(self, room_id, actor, &target).await,
      Command::Silence { target, minutes } => {
        moderation::silence(self, room_id, actor, target, minutes).await
      }
      Command::Promote { target } => moderation::promote(self, room_id, actor, &target).await,
      Command::Demote { target } => moderation::demote(self, room_id, actor, &target).await,
      Command::Bump { target } => moderation::bump(self, room_id, actor, &target).await,
      Command::Gift { item, target, note } => {
        economy::gift(self, room_id, actor, &item, &target, note).await
      }
      Command::Shower { item } => economy::shower(self, room_id, actor, &item).await,
      Command::Me { action } => utility::me(self, room_id, actor, &action).await,
      Command::Roll { max } => utility::roll(self, room_id, actor, max).await,
      Command::Announce { text } => utility::announce(self, room_id, actor, text).await,
      Command::Whois { target } => utility::whois(self, room_id, actor, &target).await,
      Command::Friend { target } => utility::friend(self, actor, &target, true).await,
      Command::Unfriend { target } => utility::friend(self, actor, &target, false).await,
    }
  }

  async fn dispatch_shortcut(
    &self,
    room_id: &str,
    actor: &UserRecord,
    shortcut: Shortcut,
  ) -> Result<(), EngineError> {
    match shortcut {
      Shortcut::Start { bet } => self.lowcard.start(room_id, actor, bet).await,
      Shortcut::Join => self.lowcard.join(room_id, actor).await,
      Shortcut::Draw => self.lowcard.draw(room_id, actor).await,
      Shortcut::Bet { group, amount } => {
        self.legend.bet(room_id, actor, &group, amount).await
      }
      Shortcut::Lock => {
        let is_mod = self.registry.is_moderator(room_id, actor).await;
        self.legend.lock(room_id, actor, is_mod).await
      }
      Shortcut::Cancel => {
        // `!cancel` aborts whichever game is live; LowCard gets first say.
        let is_mod = self.registry.is_moderator(room_id, actor).await;
        if self.lowcard.phase(room_id).await != LowCardPhase::Idle {
          self.lowcard.cancel(room_id, actor, is_mod).await
        } else if self.legend.phase(room_id).await != LegendPhase::Idle {
          self.legend.cancel(room_id, actor, is_mod).await
        } else {
          Err(EngineError::GameState("no game is running".into()))
        }
      }
    }
  }

  /// Load the acting user. Suspended accounts act on nothing.
  async fn fetch_actor(&self, user_id: &str) -> Result<UserRecord, EngineError> {
    let actor = self
      .durable
      .fetch_user(user_id)
      .await?
      .ok_or_else(|| EngineError::UnknownUser(user_id.to_string()))?;
    if actor.suspended {
      return Err(EngineError::Suspended);
    }
    Ok(actor)
  }

  pub(crate) async fn fetch_target(&self, user_id: &str) -> Result<UserRecord, EngineError> {
    self
      .durable
      .fetch_user(user_id)
      .await?
      .ok_or_else(|| EngineError::UnknownUser(user_id.to_string()))
  }

  pub(crate) async fn broadcast_roster(&self, room_id: &str) {
    match self.registry.members(room_id).await {
      Ok(members) => {
        self
          .outbox
          .to_room(
            room_id,
            ServerEvent::Roster {
              room: room_id.to_string(),
              members,
            },
          )
          .await;
      }
      Err(e) => tracing::error!("Roster read for room {} failed: {}", room_id, e),
    }
  }

  /// All command failures end here: a private warning, never a broadcast.
  async fn report(&self, user_id: &str, error: &EngineError) {
    if let EngineError::Store(inner) = error {
      tracing::error!("Infrastructure error while serving {}: {}", user_id, inner);
    }
    self
      .outbox
      .to_user(user_id, ServerEvent::warning(error.to_string()))
      .await;
  }

  pub(crate) fn settings(&self) -> &EngineSettings {
    &self.settings
  }

  pub(crate) fn outbox(&self) -> &Arc<dyn Outbox> {
    &self.outbox
  }

  pub(crate) fn durable(&self) -> &Arc<dyn DurableStore> {
    &self.durable
  }
}
