//! Credit ledger: balances, atomic transfers, and the immutable
//! transaction log.
//!
//! Balances are authoritative in process, one cell per user behind its own
//! lock; the durable store holds the audit log and balance snapshots,
//! written behind the hot path. A transfer locks both cells in sorted key
//! order, so two concurrent spends from one sender serialize and can never
//! both pass a stale balance check, and no lock-order cycle exists between
//! any pair of users.
//!
//! Idempotency: callers may attach a key to a transfer. Replaying a key
//! with the same parameters returns the original receipt without mutating
//! anything; the same key with different parameters is rejected outright.

use crate::config::TransferLimits;
use crate::durable::{write_behind, DurableStore};
use crate::error::EngineError;
use crate::events::UserId;
use crate::store::EphemeralStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  },
};
use tokio::sync::{Mutex, RwLock};

/// Why credits moved. Stored on every ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
  Transfer,
  Gift,
  Shower,
  GameStake,
  GamePayout,
  GameRefund,
  SystemAdjust,
}

/// One immutable row in the audit log. Rows are a trail, not the balance
/// source; balances mutate under the account locks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
  pub id: u64,
  pub from: Option<UserId>,
  pub to: Option<UserId>,
  pub amount: u64,
  pub kind: TxKind,
  pub note: Option<String>,
  pub idempotency_key: Option<String>,
  pub timestamp: DateTime<Utc>,
}

/// Outcome of a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
  pub from_balance: u64,
  pub to_balance: u64,
  /// True when an idempotency key replay returned this receipt without
  /// moving credits again.
  pub replayed: bool,
}

struct IdemEntry {
  fingerprint: String,
  receipt: TransferReceipt,
}

/// The ledger. Cheap to clone; all clones share state.
pub struct CreditLedger {
  accounts: Arc<RwLock<HashMap<UserId, Arc<Mutex<u64>>>>>,
  seen: Arc<Mutex<HashMap<String, IdemEntry>>>,
  tx_seq: Arc<AtomicU64>,
  durable: Arc<dyn DurableStore>,
  ephemeral: Arc<dyn EphemeralStore>,
  limits: TransferLimits,
}

impl CreditLedger {
  pub fn new(
    limits: TransferLimits,
    ephemeral: Arc<dyn EphemeralStore>,
    durable: Arc<dyn DurableStore>,
  ) -> Self {
    Self {
      accounts: Arc::new(RwLock::new(HashMap::new())),
      seen: Arc::new(Mutex::new(HashMap::new())),
      tx_seq: Arc::new(AtomicU64::new(1)),
      durable,
      ephemeral,
      limits,
    }
  }

  /// Fetch the balance cell for a user, loading the durable snapshot on
  /// first touch. Unknown users are an error, never an implicit account.
  async fn account(&self, user: &str) -> Result<Arc<Mutex<u64>>, EngineError> {
    if let Some(cell) = self.accounts.read().await.get(user) {
      return Ok(cell.clone());
    }
    let record = self
      .durable
      .fetch_user(user)
      .await?
      .ok_or_else(|| EngineError::UnknownUser(user.to_string()))?;
    let mut accounts = self.accounts.write().await;
    Ok(
      accounts
        .entry(user.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(record.balance)))
        .clone(),
    )
  }

  pub async fn balance(&self, user: &str) -> Result<u64, EngineError> {
    let cell = self.account(user).await?;
    let balance = cell.lock().await;
    Ok(*balance)
  }

  /// Move credits between two users as one atomic unit.
  pub async fn transfer(
    &self,
    from: &str,
    to: &str,
    amount: u64,
    kind: TxKind,
    note: Option<String>,
    idempotency_key: Option<String>,
  ) -> Result<TransferReceipt, EngineError> {
    if from == to {
      return Err(EngineError::SelfTransfer);
    }
    if amount < self.limits.min_amount || amount > self.limits.max_amount {
      return Err(EngineError::LimitExceeded);
    }

    let fingerprint = format!("{}|{}|{}|{}", from, to, amount, note.as_deref().unwrap_or(""));
    if let Some(key) = idempotency_key.as_deref() {
      let seen = self.seen.lock().await;
      if let Some(entry) = seen.get(key) {
        if entry.fingerprint == fingerprint {
          let mut receipt = entry.receipt.clone();
          receipt.replayed = true;
          return Ok(receipt);
        }
        return Err(EngineError::DuplicateRequest);
      }
    }

    let rate = self
      .ephemeral
      .incr_with_ttl(&format!("xferrate:{}", from), self.limits.rate_window)
      .await?;
    if rate > self.limits.rate_cap as u64 {
      return Err(EngineError::RateCapped);
    }

    let from_cell = self.account(from).await?;
    let to_cell = self.account(to).await?;

    // Sorted-order acquisition; no cycle is possible between any two users.
    let (first, second) = if from < to {
      (&from_cell, &to_cell)
    } else {
      (&to_cell, &from_cell)
    };
    let mut guard_a = first.lock().await;
    let mut guard_b = second.lock().await;
    let (from_balance, to_balance) = if from < to {
      (&mut *guard_a, &mut *guard_b)
    } else {
      (&mut *guard_b, &mut *guard_a)
    };

    if *from_balance < amount {
      return Err(EngineError::InsufficientFunds);
    }
    *from_balance -= amount;
    *to_balance += amount;

    let receipt = TransferReceipt {
      from_balance: *from_balance,
      to_balance: *to_balance,
      replayed: false,
    };
    drop(guard_a);
    drop(guard_b);

    if let Some(key) = idempotency_key.clone() {
      self.seen.lock().await.insert(
        key,
        IdemEntry {
          fingerprint,
          receipt: receipt.clone(),
        },
      );
    }

    self.log_row(
      Some(from.to_string()),
      Some(to.to_string()),
      amount,
      kind,
      note,
      idempotency_key,
    );
    self.persist_balance(from, receipt.from_balance);
    self.persist_balance(to, receipt.to_balance);

    Ok(receipt)
  }

  /// System credit or debit for one user. Debits fail whole on insufficient
  /// balance; nothing is clamped.
  pub async fn adjust(
    &self,
    user: &str,
    delta: i64,
    kind: TxKind,
    note: Option<String>,
  ) -> Result<u64, EngineError> {
    let cell = self.account(user).await?;
    let mut balance = cell.lock().await;
    let new_balance = if delta >= 0 {
      balance.saturating_add(delta as u64)
    } else {
      let debit = delta.unsigned_abs();
      balance
        .checked_sub(debit)
        .ok_or(EngineError::InsufficientFunds)?
    };
    *balance = new_balance;
    drop(balance);

    let (from, to) = if delta >= 0 {
      (None, Some(user.to_string()))
    } else {
      (Some(user.to_string()), None)
    };
    self.log_row(from, to, delta.unsigned_abs(), kind, note, None);
    self.persist_balance(user, new_balance);
    Ok(new_balance)
  }

  /// Credit several users in one batch (game settlement, showers).
  /// Credits cannot fail on balance, so the batch is all-or-nothing by
  /// construction once the recipients are validated.
  pub async fn credit_many(
    &self,
    entries: &[(UserId, u64)],
    kind: TxKind,
    note: Option<String>,
  ) -> Result<Vec<(UserId, u64)>, EngineError> {
    // Validate every recipient before touching any balance.
    let mut cells = Vec::with_capacity(entries.len());
    for (user, amount) in entries {
      cells.push((user.clone(), *amount, self.account(user).await?));
    }

    let mut results = Vec::with_capacity(cells.len());
    for (user, amount, cell) in cells {
      let mut balance = cell.lock().await;
      *balance = balance.saturating_add(amount);
      let new_balance = *balance;
      drop(balance);
      self.log_row(None, Some(user.clone()), amount, kind, note.clone(), None);
      self.persist_balance(&user, new_balance);
      results.push((user, new_balance));
    }
    Ok(results)
  }

  fn log_row(
    &self,
    from: Option<UserId>,
    to: Option<UserId>,
    amount: u64,
    kind: TxKind,
    note: Option<String>,
    idempotency_key: Option<String>,
  ) {
    let row = CreditTransaction {
      id: self.tx_seq.fetch_add(1, Ordering::Relaxed),
      from,
      to,
      amount,
      kind,
      note,
      idempotency_key,
      timestamp: Utc::now(),
    };
    let durable = self.durable.clone();
    write_behind("ledger row", async move {
      durable.append_transaction(&row).await
    });
  }

  fn persist_balance(&self, user: &str, balance: u64) {
    let durable = self.durable.clone();
    let user = user.to_string();
    write_behind("balance snapshot", async move {
      durable.save_balance(&user, balance).await
    });
  }
}

impl Clone for CreditLedger {
  fn clone(&self) -> Self {
    Self {
      accounts: self.accounts.clone(),
      seen: self.seen.clone(),
      tx_seq: self.tx_seq.clone(),
      durable: self.durable.clone(),
      ephemeral: self.ephemeral.clone(),
      limits: self.limits.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::durable::{MemoryDurable, UserRecord};
  use crate::store::InMemoryStore;

  async fn ledger_with(users: &[(&str, u64)]) -> (CreditLedger, MemoryDurable) {
    let durable = MemoryDurable::new();
    for (id, balance) in users {
      durable.seed_user(UserRecord::new(*id, *balance)).await;
    }
    let ledger = CreditLedger::new(
      TransferLimits::default(),
      Arc::new(InMemoryStore::new()),
      Arc::new(durable.clone()),
    );
    (ledger, durable)
  }

  #[tokio::test]
  async fn transfer_conserves_total() {
    let (ledger, _) = ledger_with(&[("a", 500), ("b", 100)]).await;
    ledger
      .transfer("a", "b", 200, TxKind::Transfer, None, None)
      .await
      .unwrap();
    let total =
      ledger.balance("a").await.unwrap() + ledger.balance("b").await.unwrap();
    assert_eq!(total, 600);
    assert_eq!(ledger.balance("a").await.unwrap(), 300);
    assert_eq!(ledger.balance("b").await.unwrap(), 300);
  }

  #[tokio::test]
  async fn insufficient_funds_leaves_both_untouched() {
    let (ledger, _) = ledger_with(&[("a", 500), ("b", 0)]).await;
    let err = ledger
      .transfer("a", "b", 1000, TxKind::Transfer, None, None)
      .await
      .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds));
    assert_eq!(ledger.balance("a").await.unwrap(), 500);
    assert_eq!(ledger.balance("b").await.unwrap(), 0);
  }

  #[tokio::test]
  async fn self_transfer_and_limits_rejected() {
    let (ledger, _) = ledger_with(&[("a", 500), ("b", 0)]).await;
    assert!(matches!(
      ledger.transfer("a", "a", 10, TxKind::Transfer, None, None).await,
      Err(EngineError::SelfTransfer)
    ));
    assert!(matches!(
      ledger.transfer("a", "b", 0, TxKind::Transfer, None, None).await,
      Err(EngineError::LimitExceeded)
    ));
    assert!(matches!(
      ledger
        .transfer("a", "b", 2_000_000, TxKind::Transfer, None, None)
        .await,
      Err(EngineError::LimitExceeded)
    ));
  }

  #[tokio::test]
  async fn unknown_recipient_rejected() {
    let (ledger, _) = ledger_with(&[("a", 500)]).await;
    assert!(matches!(
      ledger.transfer("a", "ghost", 10, TxKind::Transfer, None, None).await,
      Err(EngineError::UnknownUser(_))
    ));
  }

  #[tokio::test]
  async fn idempotency_key_replay_does_not_remutate() {
    let (ledger, _) = ledger_with(&[("a", 500), ("b", 0)]).await;
    let first = ledger
      .transfer("a", "b", 100, TxKind::Transfer, None, Some("k1".into()))
      .await
      .unwrap();
    assert!(!first.replayed);

    let replay = ledger
      .transfer("a", "b", 100, TxKind::Transfer, None, Some("k1".into()))
      .await
      .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.from_balance, first.from_balance);
    assert_eq!(ledger.balance("a").await.unwrap(), 400);
    assert_eq!(ledger.balance("b").await.unwrap(), 100);

    // Same key, different parameters: rejected outright.
    assert!(matches!(
      ledger
        .transfer("a", "b", 250, TxKind::Transfer, None, Some("k1".into()))
        .await,
      Err(EngineError::DuplicateRequest)
    ));
  }

  #[tokio::test]
  async fn concurrent_spends_cannot_overdraw() {
    let (ledger, _) = ledger_with(&[("a", 100), ("b", 0), ("c", 0)]).await;
    let l1 = ledger.clone();
    let l2 = ledger.clone();

    let (r1, r2) = tokio::join!(
      tokio::spawn(async move {
        l1.transfer("a", "b", 80, TxKind::Transfer, None, None).await
      }),
      tokio::spawn(async move {
        l2.transfer("a", "c", 80, TxKind::Transfer, None, None).await
      }),
    );
    let outcomes = [r1.unwrap(), r2.unwrap()];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);

    let total = ledger.balance("a").await.unwrap()
      + ledger.balance("b").await.unwrap()
      + ledger.balance("c").await.unwrap();
    assert_eq!(total, 100);
  }

  #[tokio::test]
  async fn transfer_rate_cap_applies() {
    let durable = MemoryDurable::new();
    durable.seed_user(UserRecord::new("a", 1000)).await;
    durable.seed_user(UserRecord::new("b", 0)).await;
    let ledger = CreditLedger::new(
      TransferLimits {
        rate_cap: 2,
        ..TransferLimits::default()
      },
      Arc::new(InMemoryStore::new()),
      Arc::new(durable),
    );

    ledger.transfer("a", "b", 1, TxKind::Transfer, None, None).await.unwrap();
    ledger.transfer("a", "b", 1, TxKind::Transfer, None, None).await.unwrap();
    assert!(matches!(
      ledger.transfer("a", "b", 1, TxKind::Transfer, None, None).await,
      Err(EngineError::RateCapped)
    ));
  }

  #[tokio::test]
  async fn adjust_debit_cannot_go_negative() {
    let (ledger, _) = ledger_with(&[("a", 50)]).await;
    assert!(matches!(
      ledger.adjust("a", -100, TxKind::GameStake, None).await,
      Err(EngineError::InsufficientFunds)
    ));
    assert_eq!(ledger.balance("a").await.unwrap(), 50);
    assert_eq!(
      ledger.adjust("a", -50, TxKind::GameStake, None).await.unwrap(),
      0
    );
  }

  #[tokio::test]
  async fn successful_mutations_append_audit_rows() {
    let (ledger, durable) = ledger_with(&[("a", 500), ("b", 0)]).await;
    ledger
      .transfer("a", "b", 100, TxKind::Gift, Some("happy birthday".into()), None)
      .await
      .unwrap();
    ledger.adjust("b", 25, TxKind::GamePayout, None).await.unwrap();

    // Writes are spawned; let them land.
    tokio::task::yield_now().await;
    let rows = durable.transactions().await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].kind, TxKind::Gift);
    assert_eq!(rows[0].note.as_deref(), Some("happy birthday"));
    assert_eq!(rows[1].kind, TxKind::GamePayout);
  }
}
