//! Moderation commands. The registry enforces the owner > admin >
//! moderator hierarchy; these handlers shape arguments and announcements.

use super::{Router, SilenceTarget};
use crate::durable::UserRecord;
use crate::error::EngineError;
use crate::events::{MessageKind, ServerEvent};
use std::time::Duration;

async fn moderation_notice(router: &Router, room_id: &str, actor: &UserRecord, text: String) {
  router
    .outbox()
    .to_room(
      room_id,
      ServerEvent::Chat {
        room: room_id.to_string(),
        from: actor.id.clone(),
        from_role: actor.role,
        kind: MessageKind::Moderation,
        text,
      },
    )
    .await;
}

pub(super) async fn kick(
  router: &Router,
  room_id: &str,
  actor: &UserRecord,
  target: &str,
) -> Result<(), EngineError> {
  let target = router.fetch_target(target).await?;
  router.registry().kick(room_id, actor, &target).await?;
  router.broadcast_roster(room_id).await;
  moderation_notice(
    router,
    room_id,
    actor,
    format!("{} was kicked by {}.", target.display_name, actor.display_name),
  )
  .await;
  Ok(())
}

pub(super) async fn ban(
  router: &Router,
  room_id: &str,
  actor: &UserRecord,
  target: &str,
  reason: Option<String>,
) -> Result<(), EngineError> {
  let target = router.fetch_target(target).await?;
  router
    .registry()
    .ban(room_id, actor, &target, reason.clone())
    .await?;
  router.broadcast_roster(room_id).await;
  let mut text = format!("{} was banned by {}.", target.display_name, actor.display_name);
  if let Some(reason) = reason {
    text.push_str(&format!(" Reason: {}", reason));
  }
  moderation_notice(router, room_id, actor, text).await;
  Ok(())
}

pub(super) async fn unban(
  router: &Router,
  room_id: &str,
  actor: &UserRecord,
  target: &str,
) -> Result<(), EngineError> {
  router.registry().unban(room_id, actor, target).await?;
  moderation_notice(
    router,
    room_id,
    actor,
    format!("{} was unbanned by {}.", target, actor.display_name),
  )
  .await;
  Ok(())
}

pub(super) async fn silence(
  router: &Router,
  room_id: &str,
  actor: &UserRecord,
  target: SilenceTarget,
  minutes: Option<u64>,
) -> Result<(), EngineError> {
  let duration = match minutes {
    Some(m) => Duration::from_secs(m * 60),
    None => router.settings().rooms.default_silence,
  };
  match target {
    SilenceTarget::Room => {
      router
        .registry()
        .silence_room(room_id, actor, duration)
        .await?;
      let text = if duration.is_zero() {
        "Room silence lifted.".to_string()
      } else {
        format!("The room was silenced for {} minutes.", duration.as_secs() / 60)
      };
      moderation_notice(router, room_id, actor, text).await;
    }
    SilenceTarget::User(target_id) => {
      let target = router.fetch_target(&target_id).await?;
      router
        .registry()
        .silence_user(room_id, actor, &target, duration)
        .await?;
      let text = if duration.is_zero() {
        format!("{} may speak again.", target.display_name)
      } else {
        format!(
          "{} was silenced for {} minutes.",
          target.display_name,
          duration.as_secs() / 60
        )
      };
      moderation_notice(router, room_id, actor, text).await;
    }
  }
  Ok(())
}

pub(super) async fn promote(
  router: &Router,
  room_id: &str,
  actor: &UserRecord,
  target: &str,
) -> Result<(), EngineError> {
  let target = router.fetch_target(target).await?;
  router.registry().promote(room_id, actor, &target.id).await?;
  moderation_notice(
    router,
    room_id,
    actor,
    format!("{} is now a moderator.", target.display_name),
  )
  .await;
  Ok(())
}

pub(super) async fn demote(
  router: &Router,
  room_id: &str,
  actor: &UserRecord,
  target: &str,
) -> Result<(), EngineError> {
  let target = router.fetch_target(target).await?;
  router.registry().demote(room_id, actor, &target.id).await?;
  moderation_notice(
    router,
    room_id,
    actor,
    format!("{} is no longer a moderator.", target.display_name),
  )
  .await;
  Ok(())
}

/// `/bump`: clear a user's presence entry without the ceremony of a kick.
/// Used against ghost entries left by wedged clients; the target may
/// simply rejoin.
pub(super) async fn bump(
  router: &Router,
  room_id: &str,
  actor: &UserRecord,
  target: &str,
) -> Result<(), EngineError> {
  let target = router.fetch_target(target).await?;
  router.registry().kick(room_id, actor, &target).await?;
  router.broadcast_roster(room_id).await;
  router
    .outbox()
    .to_user(
      &target.id,
      ServerEvent::warning(format!("you were bumped from {}; rejoin if needed", room_id)),
    )
    .await;
  Ok(())
}
