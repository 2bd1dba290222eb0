//! In-room game engines and their shared plumbing.
//!
//! Each room owns at most one instance of each game type, held in a map of
//! per-room cells; a cell is locked for every touch of that room's game, so
//! game logic never races with itself. Phase windows are driven by
//! [`TimerHandle`]s: explicit, cancellable timers stored on the owning game
//! state. Every transition that supersedes a timer cancels it, and each
//! game carries a generation counter so a timer that fires late finds the
//! world moved on and does nothing.

use crate::events::RoomId;
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};
use tokio::{
  sync::{oneshot, Mutex, RwLock},
  task::JoinHandle,
};

mod legend;
mod lowcard;

pub use legend::{LegendEngine, LegendPhase, LegendSymbol};
pub use lowcard::{LowCardEngine, LowCardPhase};

/// A scheduled, cancellable phase-window timer.
///
/// Cancel is cooperative: the sleeping task exits without running its
/// payload. A handle that already fired is safe to cancel (no-op), and a
/// fire that lost the race to a transition is neutralized by the owning
/// game's generation check.
pub struct TimerHandle {
  handle: JoinHandle<()>,
  cancel: Option<oneshot::Sender<()>>,
}

impl TimerHandle {
  /// Arm a timer that runs `on_fire` after `delay` unless cancelled.
  pub fn schedule<F, Fut>(delay: Duration, on_fire: F) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let sleep = tokio::time::sleep(delay);
    let handle = tokio::spawn(async move {
      tokio::pin!(sleep);
      tokio::select! {
        _ = &mut sleep => on_fire().await,
        _ = cancel_rx => {}
      }
    });
    Self {
      handle,
      cancel: Some(cancel_tx),
    }
  }

  /// Positively cancel. The payload will not run.
  pub fn cancel(mut self) {
    if let Some(tx) = self.cancel.take() {
      let _ = tx.send(());
    }
  }

  pub fn is_armed(&self) -> bool {
    !self.handle.is_finished()
  }
}

/// Map from room to its owned game cell, created on demand.
///
/// The double-checked get-or-create mirrors the room registry; cells are
/// never removed, an idle game is just a cell in its `Idle` phase.
pub(crate) struct RoomCells<G> {
  cells: Arc<RwLock<HashMap<RoomId, Arc<Mutex<G>>>>>,
}

impl<G: Default> RoomCells<G> {
  pub fn new() -> Self {
    Self {
      cells: Arc::new(RwLock::new(HashMap::new())),
    }
  }

  pub async fn cell(&self, room_id: &str) -> Arc<Mutex<G>> {
    let cells = self.cells.read().await;
    if let Some(cell) = cells.get(room_id) {
      return cell.clone();
    }
    drop(cells);

    let mut cells = self.cells.write().await;
    cells
      .entry(room_id.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(G::default())))
      .clone()
  }
}

impl<G> Clone for RoomCells<G> {
  fn clone(&self) -> Self {
    Self {
      cells: self.cells.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[tokio::test(start_paused = true)]
  async fn timer_fires_after_delay() {
    let fired = Arc::new(AtomicU32::new(0));
    let fired_clone = fired.clone();
    let _timer = TimerHandle::schedule(Duration::from_secs(5), move || async move {
      fired_clone.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    tokio::time::advance(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn cancelled_timer_never_fires() {
    let fired = Arc::new(AtomicU32::new(0));
    let fired_clone = fired.clone();
    let timer = TimerHandle::schedule(Duration::from_secs(5), move || async move {
      fired_clone.fetch_add(1, Ordering::SeqCst);
    });

    timer.cancel();
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
  }
}
