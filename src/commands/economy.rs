//! Economy commands: gifting and room showers.
//!
//! Both debit through the ledger's atomic balance check before anything is
//! announced; the room broadcast goes out as soon as the credits have
//! moved, and the durable rows land asynchronously behind it.

use super::Router;
use crate::durable::UserRecord;
use crate::error::EngineError;
use crate::events::{MessageKind, ServerEvent, UserId};
use crate::ledger::TxKind;

/// The gift catalog: item name and its price in credits.
static ITEMS: &[(&str, u64)] = &[
  ("rose", 10),
  ("coffee", 25),
  ("teddy", 100),
  ("ring", 500),
  ("sportscar", 5_000),
];

/// Item names and prices, for client pickers.
pub fn gift_catalog() -> &'static [(&'static str, u64)] {
  ITEMS
}

fn item_price(item: &str) -> Result<u64, EngineError> {
  ITEMS
    .iter()
    .find(|(name, _)| name.eq_ignore_ascii_case(item))
    .map(|(_, price)| *price)
    .ok_or_else(|| {
      let names: Vec<&str> = ITEMS.iter().map(|(name, _)| *name).collect();
      EngineError::Validation(format!(
        "no such gift '{}'; try one of {}",
        item,
        names.join(", ")
      ))
    })
}

/// `/gift <item> <user> [- note]`
pub(super) async fn gift(
  router: &Router,
  room_id: &str,
  actor: &UserRecord,
  item: &str,
  target: &str,
  note: Option<String>,
) -> Result<(), EngineError> {
  let price = item_price(item)?;
  let recipient = router.fetch_target(target).await?;

  let receipt = router
    .ledger()
    .transfer(&actor.id, &recipient.id, price, TxKind::Gift, note.clone(), None)
    .await?;

  let mut text = format!(
    "{} sent a {} to {}!",
    actor.display_name, item, recipient.display_name
  );
  if let Some(note) = note {
    text.push_str(&format!(" \u{201c}{}\u{201d}", note));
  }
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

  router
    .outbox()
    .to_user(&actor.id, ServerEvent::Credits { balance: receipt.from_balance })
    .await;
  router
    .outbox()
    .to_user(&recipient.id, ServerEvent::Credits { balance: receipt.to_balance })
    .await;
  Ok(())
}

/// `/shower <item>`: one of the item for every other member present.
/// The sender must cover all of them; the debit is one atomic check.
pub(super) async fn shower(
  router: &Router,
  room_id: &str,
  actor: &UserRecord,
  item: &str,
) -> Result<(), EngineError> {
  let price = item_price(item)?;
  let recipients: Vec<UserId> = router
    .registry()
    .members(room_id)
    .await?
    .into_iter()
    .filter(|member| member != &actor.id)
    .collect();
  if recipients.is_empty() {
    return Err(EngineError::GameState("nobody else is here to shower".into()));
  }

  let total = price
    .checked_mul(recipients.len() as u64)
    .ok_or(EngineError::LimitExceeded)?;
  let sender_balance = router
    .ledger()
    .adjust(&actor.id, -(total as i64), TxKind::Shower, Some(format!("shower of {}", item)))
    .await?;

  let entries: Vec<(UserId, u64)> = recipients
    .iter()
    .map(|member| (member.clone(), price))
    .collect();
  let credited = router
    .ledger()
    .credit_many(&entries, TxKind::Shower, Some(format!("shower of {}", item)))
    .await?;

  router
    .outbox()
    .to_room(
      room_id,
      ServerEvent::Chat {
        room: room_id.to_string(),
        from: actor.id.clone(),
        from_role: actor.role,
        kind: MessageKind::CmdEcho,
        text: format!(
          "{} showers the room with {} {}s!",
          actor.display_name,
          recipients.len(),
          item
        ),
      },
    )
    .await;

  router
    .outbox()
    .to_user(&actor.id, ServerEvent::Credits { balance: sender_balance })
    .await;
  for (member, balance) in credited {
    router
      .outbox()
      .to_user(&member, ServerEvent::Credits { balance })
      .await;
  }
  Ok(())
}
