//! Wall-clock and monotonic time sources.
//!
//! Wall clock is used ONLY to align a one-shot scheduled start against a
//! remote-supplied epoch-ms target. Monotonic time is used ONLY for beat
//! pacing within a run, so it stays immune to wall-clock jumps (NTP steps,
//! DST, manual clock changes).

use std::sync::atomic::{AtomicI64, Ordering};
use tokio::time::Instant;

/// Time source abstraction so scheduling math can be tested without real
/// sleeps.
pub trait Clock: Send + Sync {
    /// Epoch milliseconds, UTC.
    fn now_wall_ms(&self) -> i64;

    /// Monotonic instant, for tick pacing only.
    fn now_mono(&self) -> Instant;
}

/// Real system clock backed by `std::time`/`tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_wall_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn now_mono(&self) -> Instant {
        Instant::now()
    }
}

/// A clock whose wall time can be advanced under test control. Monotonic
/// time still passes in real time, since the scheduling code awaits real
/// `tokio::time::sleep_until` calls driven by `tokio::time::pause()` in
/// tests.
#[derive(Debug)]
pub struct FakeClock {
    wall_ms: AtomicI64,
}

impl FakeClock {
    pub fn new(wall_ms: i64) -> Self {
        Self {
            wall_ms: AtomicI64::new(wall_ms),
        }
    }

    pub fn set_wall_ms(&self, wall_ms: i64) {
        self.wall_ms.store(wall_ms, Ordering::SeqCst);
    }

    pub fn advance_wall_ms(&self, delta_ms: i64) {
        self.wall_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_wall_ms(&self) -> i64 {
        self.wall_ms.load(Ordering::SeqCst)
    }

    fn now_mono(&self) -> Instant {
        Instant::now()
    }
}
