//! Calibration tracking: persisted phase shift, session-scoped delta, and the
//! single pending delta consumed by the next beat (C6).
//!
//! `PendingDelta` is read by the [`crate::beat_scheduler::BeatScheduler`]
//! task, which runs independently of the command that set it, so the three
//! fields live behind one mutex shared between `PhaseShiftManager` and the
//! scheduler rather than being private to either.

use std::sync::{Arc, Mutex};

use crate::config_store::ConfigStore;
use crate::error::PersistenceError;

pub const PHASE_SHIFT_MIN_MS: i32 = -2000;
pub const PHASE_SHIFT_MAX_MS: i32 = 2000;
pub const PHASE_SHIFT_CONFIG_KEY: &str = "phase_shift_ms";

/// The mutable calibration triple, shared between the manager and an
/// in-flight BeatScheduler.
#[derive(Debug, Clone, Copy)]
pub struct PhaseState {
    pub phase_shift_ms: i32,
    pub session_delta_ms: i32,
    pub pending_delta_ms: i32,
}

impl PhaseState {
    pub fn effective(&self) -> i32 {
        self.phase_shift_ms + self.session_delta_ms
    }
}

/// Clamp a requested effective phase shift into `[-2000, 2000]`.
pub fn clamp(value: i32) -> i32 {
    value.clamp(PHASE_SHIFT_MIN_MS, PHASE_SHIFT_MAX_MS)
}

pub struct PhaseShiftManager {
    state: Arc<Mutex<PhaseState>>,
    config: Arc<ConfigStore>,
}

/// Outcome of a `request()` call, telling the caller whether a Scheduled
/// start needs its timer recomputed and rearmed.
pub enum RequestOutcome {
    /// Staged a pending delta for the running BeatScheduler; nothing else
    /// to do.
    StagedWhileRunning,
    /// Committed immediately; if a start was Scheduled, its target must be
    /// recomputed from the new effective phase shift.
    CommittedWhileIdle,
}

impl PhaseShiftManager {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let phase_shift_ms = config.load(PHASE_SHIFT_CONFIG_KEY, 0) as i32;
        Self {
            state: Arc::new(Mutex::new(PhaseState {
                phase_shift_ms,
                session_delta_ms: 0,
                pending_delta_ms: 0,
            })),
            config,
        }
    }

    /// A clone of the shared state handle, for the BeatScheduler to read and
    /// clear `pending_delta_ms` from its own task.
    pub fn shared_state(&self) -> Arc<Mutex<PhaseState>> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> PhaseState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn effective(&self) -> i32 {
        self.snapshot().effective()
    }

    /// Request a new effective phase shift, clamped to the valid range.
    /// `running` selects between the staged (Running) and immediate
    /// (Stopped/Scheduled) behaviors of 4.6.
    pub fn request(&self, requested: i32, running: bool) -> RequestOutcome {
        let new_value = clamp(requested);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if running {
            let delta = new_value - state.effective();
            state.pending_delta_ms += delta;
            state.session_delta_ms += delta;
            RequestOutcome::StagedWhileRunning
        } else {
            state.phase_shift_ms = new_value;
            state.session_delta_ms = 0;
            state.pending_delta_ms = 0;
            drop(state);
            self.persist(new_value);
            RequestOutcome::CommittedWhileIdle
        }
    }

    /// Commit any staged session delta into the durable phase shift. Called
    /// unconditionally by `Stop`; a no-op if nothing was staged.
    pub fn commit_on_stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.session_delta_ms == 0 {
            return;
        }
        state.phase_shift_ms += state.session_delta_ms;
        let committed = state.phase_shift_ms;
        state.session_delta_ms = 0;
        state.pending_delta_ms = 0;
        drop(state);
        self.persist(committed);
    }

    fn persist(&self, value: i32) {
        if let Err(err) = self.config.save(PHASE_SHIFT_CONFIG_KEY, value as i64) {
            log_persistence_failure(&err);
        }
    }
}

fn log_persistence_failure(err: &PersistenceError) {
    log::warn!("failed to persist phase_shift_ms: {err}");
}
