//! Cadence loop at period `60_000 / BPM` ms, re-phasable mid-run (C4).
//!
//! Runs as its own tokio task, spawned by [`crate::controller::ControllerCore`]
//! and cancelled with `JoinHandle::abort()`. Cancellation can land at either
//! await point (the tick sleep or the `play` call); the caller is expected to
//! invoke `stop_all()` on the actuator afterward, since an aborted task leaves
//! no guarantee the device was left idle.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use crate::actuator::{Actuator, Beat};
use crate::clock::Clock;
use crate::phase_shift::PhaseState;

pub struct BeatScheduler {
    bpm: Arc<AtomicU32>,
    phase_state: Arc<Mutex<PhaseState>>,
    clock: Arc<dyn Clock>,
    actuator: Arc<AsyncMutex<Box<dyn Actuator>>>,
}

impl BeatScheduler {
    pub fn new(
        bpm: Arc<AtomicU32>,
        phase_state: Arc<Mutex<PhaseState>>,
        clock: Arc<dyn Clock>,
        actuator: Arc<AsyncMutex<Box<dyn Actuator>>>,
    ) -> Self {
        Self {
            bpm,
            phase_state,
            clock,
            actuator,
        }
    }

    /// Runs until aborted. Never returns on its own.
    pub async fn run(self) -> ! {
        let mut next_tick = self.clock.now_mono();

        loop {
            let period = period_for_bpm(self.bpm.load(Ordering::Relaxed));

            let pending = take_pending_delta(&self.phase_state);
            if pending != 0 {
                next_tick = apply_pending_shift(next_tick, pending);
            }

            {
                let mut actuator = self.actuator.lock().await;
                if let Err(err) = actuator.play(Beat::standard()).await {
                    log::warn!("actuator play failed: {err}");
                }
            }

            next_tick += period;
            let now = self.clock.now_mono();
            while next_tick <= now {
                next_tick += period;
            }

            tokio::time::sleep_until(next_tick).await;
        }
    }
}

fn period_for_bpm(bpm: u32) -> Duration {
    let bpm = bpm.max(1) as u64;
    Duration::from_millis(60_000 / bpm)
}

/// Atomically read and zero `pending_delta_ms`, per I4/5's "read-and-clear
/// performed while holding the lock" requirement.
fn take_pending_delta(phase_state: &Arc<Mutex<PhaseState>>) -> i64 {
    let mut state = phase_state.lock().unwrap_or_else(|e| e.into_inner());
    let pending = state.pending_delta_ms;
    state.pending_delta_ms = 0;
    pending as i64
}

/// `next_tick -= shift_ms`, per 4.4 step 2: a positive shift pulls the next
/// beat earlier, a negative one pushes it later.
fn apply_pending_shift(instant: Instant, shift_ms: i64) -> Instant {
    if shift_ms >= 0 {
        let back = Duration::from_millis(shift_ms as u64);
        instant.checked_sub(back).unwrap_or(instant)
    } else {
        instant + Duration::from_millis((-shift_ms) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_matches_standard_tempos() {
        assert_eq!(period_for_bpm(120), Duration::from_millis(500));
        assert_eq!(period_for_bpm(60), Duration::from_millis(1000));
        assert_eq!(period_for_bpm(240), Duration::from_millis(250));
    }

    #[test]
    fn zero_bpm_does_not_divide_by_zero() {
        assert_eq!(period_for_bpm(0), Duration::from_millis(60_000));
    }

    #[test]
    fn take_pending_delta_clears_after_read() {
        let state = Arc::new(Mutex::new(PhaseState {
            phase_shift_ms: 0,
            session_delta_ms: 200,
            pending_delta_ms: 200,
        }));
        assert_eq!(take_pending_delta(&state), 200);
        assert_eq!(take_pending_delta(&state), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn apply_pending_shift_pulls_earlier_and_pushes_later() {
        tokio::time::advance(Duration::from_secs(1)).await;
        let base = Instant::now();

        let earlier = apply_pending_shift(base, 500);
        assert_eq!(base - earlier, Duration::from_millis(500));

        let later = apply_pending_shift(base, -500);
        assert_eq!(later - base, Duration::from_millis(500));
    }
}
