//! Zone State Engine (spec §4.4): one NORMAL/HAZARD state machine per
//! area, with a 2 s clear-hysteresis timer driven by a single timer wheel
//! (spec §9 design note: a priority queue of (deadline, zone-id), not a
//! thread per zone).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::types::{AreaId, ZoneStatus};

/// Read-mostly snapshot of every zone's current status, for the pilot
/// channel's `RWY_*` queries (spec §4.8 item 4) without reaching into the
/// pipeline task itself.
#[derive(Clone, Default)]
pub struct ZoneStatusBoard {
    inner: Arc<RwLock<HashMap<AreaId, ZoneStatus>>>,
}

impl ZoneStatusBoard {
    #[must_use]
    pub fn new(area_ids: &[AreaId]) -> Self {
        let inner = area_ids.iter().map(|&id| (id, ZoneStatus::Normal)).collect();
        Self { inner: Arc::new(RwLock::new(inner)) }
    }

    pub fn set(&self, area_id: AreaId, status: ZoneStatus) {
        self.inner.write().insert(area_id, status);
    }

    #[must_use]
    pub fn get(&self, area_id: AreaId) -> Option<ZoneStatus> {
        self.inner.read().get(&area_id).copied()
    }
}

/// A zone-status transition, broadcast as `ME_RA`/`ME_RB`-style messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneTransition {
    pub area_id: AreaId,
    pub status: ZoneStatus,
}

struct ZoneState {
    status: ZoneStatus,
    /// Generation counter, bumped every time the clear timer is
    /// (re)armed; a pending heap entry is stale (and ignored) if its
    /// generation doesn't match the current one. This gives O(log N)
    /// "cancellation" without removing from the middle of the heap.
    generation: u64,
}

pub struct ZoneEngine {
    clear_after: Duration,
    states: HashMap<AreaId, ZoneState>,
    heap: BinaryHeap<Reverse<(Instant, AreaId, u64)>>,
    transitions: mpsc::UnboundedSender<ZoneTransition>,
}

impl ZoneEngine {
    #[must_use]
    pub fn new(
        area_ids: &[AreaId],
        clear_after: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ZoneTransition>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let states = area_ids
            .iter()
            .map(|&id| (id, ZoneState { status: ZoneStatus::Normal, generation: 0 }))
            .collect();
        (Self { clear_after, states, heap: BinaryHeap::new(), transitions: tx }, rx)
    }

    /// Registers a qualifying detection for `area_id` at `now`: transitions
    /// NORMAL->HAZARD (emitting the transition) or re-arms the existing
    /// HAZARD's clear timer, cancelling any pending clear.
    pub fn on_qualifying_detection(&mut self, area_id: AreaId, now: Instant) {
        let Some(state) = self.states.get_mut(&area_id) else {
            tracing::warn!(area_id, "qualifying detection for unknown zone");
            return;
        };

        state.generation += 1;
        let was_normal = state.status == ZoneStatus::Normal;
        state.status = ZoneStatus::Hazard;

        self.heap.push(Reverse((now + self.clear_after, area_id, state.generation)));

        if was_normal {
            self.transitions
                .send(ZoneTransition { area_id, status: ZoneStatus::Hazard })
                .ok();
        }
    }

    /// Pops and fires every heap entry whose deadline is `<= now` and
    /// whose generation is still current (i.e. not superseded by a later
    /// detection). Returns the deadline of the next pending entry, if
    /// any, so the caller's timer task can sleep until then.
    pub fn advance(&mut self, now: Instant) -> Option<Instant> {
        while let Some(&Reverse((deadline, area_id, generation))) = self.heap.peek() {
            if deadline > now {
                return Some(deadline);
            }
            self.heap.pop();

            let Some(state) = self.states.get_mut(&area_id) else { continue };
            if state.generation != generation {
                continue; // superseded by a later detection; stale entry.
            }
            if state.status == ZoneStatus::Hazard {
                state.status = ZoneStatus::Normal;
                self.transitions
                    .send(ZoneTransition { area_id, status: ZoneStatus::Normal })
                    .ok();
            }
        }
        None
    }

    #[must_use]
    pub fn status(&self, area_id: AreaId) -> Option<ZoneStatus> {
        self.states.get(&area_id).map(|s| s.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn normal_to_hazard_emits_once() {
        let (mut engine, mut rx) = ZoneEngine::new(&[1], Duration::from_secs(2));
        let t0 = Instant::now();

        engine.on_qualifying_detection(1, t0);
        assert_eq!(engine.status(1), Some(ZoneStatus::Hazard));

        let transition = rx.recv().await.unwrap();
        assert_eq!(transition, ZoneTransition { area_id: 1, status: ZoneStatus::Hazard });
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_cancels_pending_clear() {
        let (mut engine, mut rx) = ZoneEngine::new(&[1], Duration::from_secs(2));
        let t0 = Instant::now();

        engine.on_qualifying_detection(1, t0);
        rx.recv().await.unwrap(); // HAZARD

        // A new qualifying detection 1s later re-arms the clear timer.
        engine.on_qualifying_detection(1, t0 + Duration::from_secs(1));

        // Advancing to the original 2s deadline must NOT clear the zone:
        // the entry from the first detection is stale.
        assert!(engine.advance(t0 + Duration::from_secs(2)).is_some() || engine.status(1) == Some(ZoneStatus::Hazard));
        assert_eq!(engine.status(1), Some(ZoneStatus::Hazard));

        // But the re-armed deadline (1s + 2s = 3s) does fire.
        engine.advance(t0 + Duration::from_secs(3));
        assert_eq!(engine.status(1), Some(ZoneStatus::Normal));
        let transition = rx.recv().await.unwrap();
        assert_eq!(transition, ZoneTransition { area_id: 1, status: ZoneStatus::Normal });
    }

    #[tokio::test(start_paused = true)]
    async fn clears_exactly_at_2s_boundary() {
        let (mut engine, mut rx) = ZoneEngine::new(&[1], Duration::from_secs(2));
        let t0 = Instant::now();

        engine.on_qualifying_detection(1, t0);
        rx.recv().await.unwrap();

        engine.advance(t0 + Duration::from_secs(2));
        assert_eq!(engine.status(1), Some(ZoneStatus::Normal));
    }

    #[tokio::test(start_paused = true)]
    async fn zones_are_independent() {
        let (mut engine, mut rx) = ZoneEngine::new(&[1, 2], Duration::from_secs(2));
        let t0 = Instant::now();

        engine.on_qualifying_detection(1, t0);
        rx.recv().await.unwrap();

        engine.advance(t0 + Duration::from_secs(2));
        assert_eq!(engine.status(1), Some(ZoneStatus::Normal));
        assert_eq!(engine.status(2), Some(ZoneStatus::Normal));
    }
}
