use criterion::{black_box, criterion_group, criterion_main, Criterion};
use parlor::config::RoomDefaults;
use parlor::durable::{MemoryDurable, UserRecord};
use parlor::presence::RoomRegistry;
use parlor::store::InMemoryStore;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn registry() -> RoomRegistry {
  RoomRegistry::new(
    RoomDefaults {
      max_occupancy: None,
      ..RoomDefaults::default()
    },
    Arc::new(InMemoryStore::new()),
    Arc::new(MemoryDurable::new()),
  )
}

fn join_leave(c: &mut Criterion) {
  let mut group = c.benchmark_group("registry_join_leave");
  let rt = Runtime::new().unwrap();

  group.bench_function("join_single_room", |b| {
    b.to_async(&rt).iter(|| async {
      let registry = registry();
      let user = UserRecord::new("user1", 0);
      black_box(registry.join("room1", &user).await.unwrap());
    });
  });

  group.bench_function("join_100_users", |b| {
    b.to_async(&rt).iter(|| async {
      let registry = registry();
      for i in 0..100 {
        let user = UserRecord::new(format!("user{}", i), 0);
        registry.join("room1", &user).await.unwrap();
      }
    });
  });

  group.bench_function("join_then_leave", |b| {
    b.to_async(&rt).iter(|| async {
      let registry = registry();
      let user = UserRecord::new("user1", 0);
      registry.join("room1", &user).await.unwrap();
      registry.leave("room1", "user1").await.unwrap();
    });
  });

  group.finish();
}

fn membership_queries(c: &mut Criterion) {
  let mut group = c.benchmark_group("registry_membership");
  let rt = Runtime::new().unwrap();

  group.bench_function("members_of_50", |b| {
    b.to_async(&rt).iter(|| async {
      let registry = registry();
      for i in 0..50 {
        let user = UserRecord::new(format!("user{}", i), 0);
        registry.join("room1", &user).await.unwrap();
      }
      black_box(registry.members("room1").await.unwrap());
    });
  });

  group.bench_function("occupancy_across_10_rooms", |b| {
    b.to_async(&rt).iter(|| async {
      let registry = registry();
      for room in 0..10 {
        for i in 0..10 {
          let user = UserRecord::new(format!("user{}", i), 0);
          registry.join(&format!("room{}", room), &user).await.unwrap();
        }
      }
      for room in 0..10 {
        black_box(registry.occupancy(&format!("room{}", room)).await.unwrap());
      }
    });
  });

  group.finish();
}

criterion_group!(benches, join_leave, membership_queries);
criterion_main!(benches);
