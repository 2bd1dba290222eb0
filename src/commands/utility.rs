//! Utility commands: emotes, rolls, announcements, whois, favorites.

use super::Router;
use crate::durable::UserRecord;
use crate::error::EngineError;
use crate::events::{MessageKind, ServerEvent};
use rand::Rng;

const ROLL_DEFAULT: u64 = 100;
const ROLL_MAX: u64 = 10_000;

async fn echo(router: &Router, room_id: &str, actor: &UserRecord, text: String) {
  router
    .outbox()
    .to_room(
      room_id,
      ServerEvent::Chat {
        room: room_id.to_string(),
        from: actor.id.clone(),
        from_role: actor.role,
        kind: MessageKind::CmdEcho,
        text,
      },
    )
    .await;
}

async fn private_notice(router: &Router, room_id: &str, actor: &UserRecord, text: String) {
  router
    .outbox()
    .to_user(
      &actor.id,
      ServerEvent::Chat {
        room: room_id.to_string(),
        from: actor.id.clone(),
        from_role: actor.role,
        kind: MessageKind::Notice,
        text,
      },
    )
    .await;
}

/// `/me <action>`
pub(super) async fn me(
  router: &Router,
  room_id: &str,
  actor: &UserRecord,
  action: &str,
) -> Result<(), EngineError> {
  echo(router, room_id, actor, format!("* {} {}", actor.display_name, action)).await;
  Ok(())
}

/// `/roll [max]`
pub(super) async fn roll(
  router: &Router,
  room_id: &str,
  actor: &UserRecord,
  max: Option<u64>,
) -> Result<(), EngineError> {
  let max = max.unwrap_or(ROLL_DEFAULT);
  if !(2..=ROLL_MAX).contains(&max) {
    return Err(EngineError::Validation(format!(
      "roll target must be between 2 and {}",
      ROLL_MAX
    )));
  }
  let value = rand::thread_rng().gen_range(1..=max);
  echo(
    router,
    room_id,
    actor,
    format!("{} rolls {} (1-{})", actor.display_name, value, max),
  )
  .await;
  Ok(())
}

/// `/announce <text|off>`
pub(super) async fn announce(
  router: &Router,
  room_id: &str,
  actor: &UserRecord,
  text: Option<String>,
) -> Result<(), EngineError> {
  router
    .registry()
    .set_announcement(room_id, actor, text.clone())
    .await?;
  match text {
    Some(text) => {
      router
        .outbox()
        .to_room(
          room_id,
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
    None => {
      private_notice(router, room_id, actor, "announcement cleared".into()).await;
    }
  }
  Ok(())
}

/// `/whois <user>`: a private sketch of the target.
pub(super) async fn whois(
  router: &Router,
  room_id: &str,
  actor: &UserRecord,
  target: &str,
) -> Result<(), EngineError> {
  let target = router.fetch_target(target).await?;
  let here = router.registry().is_member(room_id, &target.id).await?;
  let rank = router.registry().moderation_rank(room_id, &target).await;
  let standing = match rank {
    3 => "room owner",
    2 => "global admin",
    1 => "room moderator",
    _ => "member",
  };
  let text = format!(
    "{}: role {:?}, {} of this room, {}",
    target.display_name,
    target.role,
    standing,
    if here { "currently here" } else { "not here right now" },
  );
  private_notice(router, room_id, actor, text).await;
  Ok(())
}

/// `/f` and `/uf`: favorites live in the durable store; confirmation is
/// private either way.
pub(super) async fn friend(
  router: &Router,
  actor: &UserRecord,
  target: &str,
  add: bool,
) -> Result<(), EngineError> {
  let target = router.fetch_target(target).await?;
  if target.id == actor.id {
    return Err(EngineError::Validation("you cannot favorite yourself".into()));
  }
  if add {
    router.durable().add_favorite(&actor.id, &target.id).await?;
  } else {
    router
      .durable()
      .remove_favorite(&actor.id, &target.id)
      .await?;
  }
  let text = if add {
    format!("{} added to your favorites", target.display_name)
  } else {
    format!("{} removed from your favorites", target.display_name)
  };
  router
    .outbox()
    .to_user(&actor.id, ServerEvent::warning(text))
    .await;
  Ok(())
}
