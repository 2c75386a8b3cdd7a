use crate::gate::Gate;
use crate::task::SlotId;

use std::fmt;

use parking_lot::Mutex;
use tracing::trace;

struct SlotStates {
  idle: Vec<bool>,
  retired: Vec<bool>,
  idle_count: usize,
}

impl SlotStates {
  fn set_busy(&mut self, slot: SlotId) -> bool {
    if self.idle[slot] {
      self.idle[slot] = false;
      self.idle_count -= 1;
      true
    } else {
      false
    }
  }

  fn first_idle(&self) -> Option<SlotId> {
    if self.idle_count == 0 {
      return None;
    }
    self.idle.iter().position(|idle| *idle)
  }
}

/// Tracks which worker slots are idle.
///
/// Slots start busy and become idle once their worker reports ready. Claims
/// always pick the lowest idle slot id. A retired slot stays busy for good.
pub struct AvailabilityTracker {
  states: Mutex<SlotStates>,
  gate: Gate,
}

impl AvailabilityTracker {
  pub fn new(slot_count: usize) -> Self {
    Self {
      states: Mutex::new(SlotStates {
        idle: vec![false; slot_count],
        retired: vec![false; slot_count],
        idle_count: 0,
      }),
      gate: Gate::new(),
    }
  }

  /// Total number of slots, retired ones included.
  pub fn len(&self) -> usize {
    self.states.lock().idle.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn idle_count(&self) -> usize {
    self.states.lock().idle_count
  }

  pub fn retired_count(&self) -> usize {
    self.states.lock().retired.iter().filter(|r| **r).count()
  }

  pub fn is_idle(&self, slot: SlotId) -> bool {
    self.states.lock().idle.get(slot).copied().unwrap_or(false)
  }

  pub fn is_retired(&self, slot: SlotId) -> bool {
    self.states.lock().retired.get(slot).copied().unwrap_or(false)
  }

  /// Flips an idle slot to busy. No-op if already busy or out of range.
  pub fn mark_busy(&self, slot: SlotId) {
    let mut states = self.states.lock();
    if slot < states.idle.len() && states.set_busy(slot) {
      trace!(slot, idle_count = states.idle_count, "Slot marked busy.");
    }
  }

  /// Flips a busy slot to idle and wakes a parked claimer. No-op if already
  /// idle, retired, or out of range.
  pub fn mark_idle(&self, slot: SlotId) {
    let became_idle = {
      let mut states = self.states.lock();
      if slot >= states.idle.len() || states.retired[slot] || states.idle[slot] {
        false
      } else {
        states.idle[slot] = true;
        states.idle_count += 1;
        trace!(slot, idle_count = states.idle_count, "Slot marked idle.");
        true
      }
    };
    if became_idle {
      self.gate.signal();
    }
  }

  /// Marks a slot busy permanently. Later `mark_idle` calls for it are ignored.
  pub fn retire(&self, slot: SlotId) {
    let mut states = self.states.lock();
    if slot >= states.idle.len() {
      return;
    }
    states.set_busy(slot);
    if !states.retired[slot] {
      states.retired[slot] = true;
      trace!(slot, idle_count = states.idle_count, "Slot retired.");
    }
  }

  /// Claims the lowest idle slot without waiting.
  pub fn try_claim(&self) -> Option<SlotId> {
    let mut states = self.states.lock();
    let slot = states.first_idle()?;
    states.set_busy(slot);
    Some(slot)
  }

  /// Claims the lowest idle slot, parking on the gate while none is idle.
  ///
  /// Only the dispatcher loop calls this, which keeps the gate at one waiter.
  pub(crate) async fn claim_idle(&self) -> SlotId {
    loop {
      let wait = self.gate.wait();
      if let Some(slot) = self.try_claim() {
        return slot;
      }
      trace!("No idle slot, dispatcher parking.");
      wait.await;
    }
  }
}

impl fmt::Debug for AvailabilityTracker {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let states = self.states.lock();
    f.debug_struct("AvailabilityTracker")
      .field("slots", &states.idle.len())
      .field("idle_count", &states.idle_count)
      .finish_non_exhaustive()
  }
}
