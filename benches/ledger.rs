use criterion::{black_box, criterion_group, criterion_main, Criterion};
use parlor::config::TransferLimits;
use parlor::durable::{MemoryDurable, UserRecord};
use parlor::ledger::{CreditLedger, TxKind};
use parlor::store::InMemoryStore;
use std::sync::Arc;
use tokio::runtime::Runtime;

async fn seeded_ledger(users: usize) -> CreditLedger {
  let durable = MemoryDurable::new();
  for i in 0..users {
    durable
      .seed_user(UserRecord::new(format!("user{}", i), 1_000_000))
      .await;
  }
  CreditLedger::new(
    TransferLimits {
      rate_cap: u32::MAX,
      ..TransferLimits::default()
    },
    Arc::new(InMemoryStore::new()),
    Arc::new(durable),
  )
}

fn transfers(c: &mut Criterion) {
  let mut group = c.benchmark_group("ledger_transfers");
  let rt = Runtime::new().unwrap();

  group.bench_function("single_transfer", |b| {
    b.to_async(&rt).iter(|| async {
      let ledger = seeded_ledger(2).await;
      black_box(
        ledger
          .transfer("user0", "user1", 10, TxKind::Transfer, None, None)
          .await
          .unwrap(),
      );
    });
  });

  group.bench_function("100_transfers_same_sender", |b| {
    b.to_async(&rt).iter(|| async {
      let ledger = seeded_ledger(2).await;
      for _ in 0..100 {
        ledger
          .transfer("user0", "user1", 10, TxKind::Transfer, None, None)
          .await
          .unwrap();
      }
    });
  });

  group.bench_function("contended_sender_20_tasks", |b| {
    b.to_async(&rt).iter(|| async {
      let ledger = seeded_ledger(21).await;
      let mut handles = Vec::new();
      for i in 1..=20 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
          ledger
            .transfer("user0", &format!("user{}", i), 10, TxKind::Transfer, None, None)
            .await
            .unwrap();
        }));
      }
      for handle in handles {
        handle.await.unwrap();
      }
    });
  });

  group.finish();
}

fn settlement(c: &mut Criterion) {
  let mut group = c.benchmark_group("ledger_settlement");
  let rt = Runtime::new().unwrap();

  group.bench_function("credit_many_50", |b| {
    b.to_async(&rt).iter(|| async {
      let ledger = seeded_ledger(50).await;
      let entries: Vec<(String, u64)> =
        (0..50).map(|i| (format!("user{}", i), 25)).collect();
      black_box(
        ledger
          .credit_many(&entries, TxKind::GamePayout, None)
          .await
          .unwrap(),
      );
    });
  });

  group.finish();
}

criterion_group!(benches, transfers, settlement);
criterion_main!(benches);
