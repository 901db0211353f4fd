//! # Pool tracker: per-slot state mirror with sequence-based ordering.
//!
//! Maintains the observable state of every worker slot by folding lifecycle
//! events, using event sequence numbers to handle out-of-order delivery.
//!
//! ```text
//! Monitors ──► Bus ──► subscriber listener ──► PoolTracker::update()
//!                                                      │
//!                                                      ▼
//!                                        HashMap<usize, SlotState>
//!                                          (worker_id → {seq, state})
//! ```
//!
//! ## Rules
//! - Events with `seq <= last_seq` for the slot are rejected (stale).
//! - Read operations (`snapshot`, `state_of`) are eventually consistent.
//! - The tracker backs the status dump and is handy in tests; monitors hold
//!   the authoritative state.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::events::{Event, EventKind, KillStage};
use crate::subscribers::Subscribe;
use crate::worker::WorkerState;

/// Per-slot record with ordering validation.
#[derive(Debug, Clone)]
struct SlotState {
    last_seq: u64,
    state: WorkerState,
    attempt: u64,
}

/// Thread-safe mirror of every slot's observable state.
pub struct PoolTracker {
    slots: RwLock<HashMap<usize, SlotState>>,
}

impl PoolTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Folds one event into the mirror if it is newer than the last seen.
    pub async fn update(&self, ev: &Event) {
        let worker_id = match ev.worker {
            Some(id) => id,
            None => return,
        };

        let mut slots = self.slots.write().await;
        let entry = slots.entry(worker_id).or_insert(SlotState {
            last_seq: 0,
            state: WorkerState::Idle,
            attempt: 0,
        });
        if ev.seq <= entry.last_seq {
            return;
        }

        let next = match ev.kind {
            EventKind::WorkerStarting => Some(WorkerState::Starting),
            EventKind::WorkerRunning => Some(WorkerState::Running),
            EventKind::StopStageEntered => ev.stage.map(|stage| match stage {
                KillStage::Graceful => WorkerState::StoppingGraceful,
                KillStage::Immediate => WorkerState::StoppingImmediate,
                KillStage::Forced => WorkerState::StoppingForced,
            }),
            EventKind::WorkerStopped | EventKind::WorkerCrashed => Some(WorkerState::Finished),
            EventKind::WorkerRestartScheduled => Some(WorkerState::Idle),
            _ => None,
        };

        if let Some(state) = next {
            entry.state = state;
        }
        if let Some(attempt) = ev.attempt {
            entry.attempt = attempt;
        }
        entry.last_seq = ev.seq;
    }

    /// Returns `(worker_id, state, attempt)` for every known slot, sorted by
    /// slot id.
    pub async fn snapshot(&self) -> Vec<(usize, WorkerState, u64)> {
        let slots = self.slots.read().await;
        let mut out: Vec<_> = slots
            .iter()
            .map(|(id, slot)| (*id, slot.state, slot.attempt))
            .collect();
        out.sort_unstable_by_key(|(id, _, _)| *id);
        out
    }

    /// Returns the mirrored state of one slot.
    pub async fn state_of(&self, worker_id: usize) -> Option<WorkerState> {
        self.slots.read().await.get(&worker_id).map(|s| s.state)
    }
}

impl Default for PoolTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subscribe for PoolTracker {
    async fn on_event(&self, event: &Event) {
        self.update(event).await;
    }

    fn name(&self) -> &'static str {
        "pool-tracker"
    }
}
