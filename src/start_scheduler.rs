//! Waits until a target wall-clock instant, then hands control to the beat
//! loop (C5).
//!
//! Spawned by [`crate::controller::ControllerCore`] as its own task and
//! cancelled with `JoinHandle::abort()` on any superseding `Stop` or
//! `ScheduleStart`. The `schedule_id`/`RunState` recheck after the wall-clock
//! sleep guards the narrow window between a cancellation being requested and
//! this task actually observing it at its next await point.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::actuator::Actuator;
use crate::beat_scheduler::BeatScheduler;
use crate::clock::Clock;
use crate::phase_shift::PhaseState;
use crate::status::{RunState, StatusSnapshot};

/// A single scheduled-start request, already corrected for the effective
/// phase shift in effect at the time it was issued.
pub struct StartRequest {
    pub payload_target_ms: i64,
    pub target_ms: i64,
    pub schedule_id: u64,
}

/// Handles this task needs to check liveness, flip shared state, and spawn
/// the BeatScheduler it hands off to. Cloned out of `ControllerCore`.
pub struct StartContext {
    pub clock: Arc<dyn Clock>,
    pub actuator: Arc<AsyncMutex<Box<dyn Actuator>>>,
    pub app_id: String,
    pub api_key: String,
    pub app_name: String,
    pub schedule_id: Arc<AtomicU64>,
    pub status: Arc<Mutex<StatusSnapshot>>,
    pub bpm: Arc<AtomicU32>,
    pub phase_state: Arc<Mutex<PhaseState>>,
    pub beat_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

pub async fn run_start(request: StartRequest, ctx: StartContext) {
    // Both the sleep and the initialize call are driven from this one task
    // rather than a detached `tokio::spawn`, so aborting `run_start` (as
    // `cancel_active_schedulers` does via the outer `start_task` handle)
    // drops both futures together instead of leaving `initialize()` running
    // unobserved in the background.
    let init_future = async {
        ctx.actuator
            .lock()
            .await
            .initialize(&ctx.app_id, &ctx.api_key, &ctx.app_name)
            .await
    };

    let delay_ms = request.target_ms - ctx.clock.now_wall_ms();
    let sleep_future = async {
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
        }
    };

    let (_, init_result) = tokio::join!(sleep_future, init_future);

    let current_id = ctx.schedule_id.load(Ordering::SeqCst);
    let still_scheduled = {
        let status = ctx.status.lock().unwrap_or_else(|e| e.into_inner());
        status.run_state == RunState::Scheduled
    };
    if request.schedule_id != current_id || !still_scheduled {
        log::debug!(
            "start scheduler discarding stale wakeup (schedule_id={}, current={current_id})",
            request.schedule_id
        );
        return;
    }

    if let Err(err) = init_result {
        log::error!("actuator initialize failed at scheduled start: {err}");
        fail_to_stopped(&ctx.status, &err);
        return;
    }

    let actual_ms = ctx.clock.now_wall_ms();
    {
        let mut status = ctx.status.lock().unwrap_or_else(|e| e.into_inner());
        status.run_state = RunState::Running;
        status.last_actual_ms = Some(actual_ms);
        status.last_event_text = "running".to_string();
    }

    let beat_scheduler = BeatScheduler::new(
        ctx.bpm.clone(),
        ctx.phase_state.clone(),
        ctx.clock.clone(),
        ctx.actuator.clone(),
    );
    let handle = tokio::spawn(async move {
        beat_scheduler.run().await;
    });
    *ctx.beat_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
}

fn fail_to_stopped(status: &Arc<Mutex<StatusSnapshot>>, reason: &str) {
    let mut status = status.lock().unwrap_or_else(|e| e.into_inner());
    status.run_state = RunState::Stopped;
    status.last_event_text = format!("start aborted: {reason}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::LoggingActuator;
    use crate::clock::FakeClock;

    fn context(clock: Arc<dyn Clock>) -> (StartContext, Arc<Mutex<StatusSnapshot>>) {
        let status = Arc::new(Mutex::new(StatusSnapshot::initial(120, 0)));
        status.lock().unwrap().run_state = RunState::Scheduled;
        let ctx = StartContext {
            clock,
            actuator: Arc::new(AsyncMutex::new(Box::new(LoggingActuator::new()))),
            app_id: "id".to_string(),
            api_key: "key".to_string(),
            app_name: "name".to_string(),
            schedule_id: Arc::new(AtomicU64::new(7)),
            status: status.clone(),
            bpm: Arc::new(AtomicU32::new(120)),
            phase_state: Arc::new(Mutex::new(PhaseState {
                phase_shift_ms: 0,
                session_delta_ms: 0,
                pending_delta_ms: 0,
            })),
            beat_task: Arc::new(Mutex::new(None)),
        };
        (ctx, status)
    }

    #[tokio::test(start_paused = true)]
    async fn reaching_target_transitions_to_running_and_spawns_beat_task() {
        let clock = Arc::new(FakeClock::new(1_000));
        let (ctx, status) = context(clock.clone());
        let beat_task = ctx.beat_task.clone();

        let request = StartRequest {
            payload_target_ms: 1_500,
            target_ms: 1_500,
            schedule_id: 7,
        };

        let handle = tokio::spawn(run_start(request, ctx));
        tokio::time::advance(Duration::from_millis(600)).await;
        clock.set_wall_ms(1_500);
        handle.await.unwrap();

        assert_eq!(status.lock().unwrap().run_state, RunState::Running);
        assert!(beat_task.lock().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_schedule_id_discards_without_starting() {
        let clock = Arc::new(FakeClock::new(1_000));
        let (ctx, status) = context(clock);
        ctx.schedule_id.store(9, Ordering::SeqCst);

        let request = StartRequest {
            payload_target_ms: 1_000,
            target_ms: 1_000,
            schedule_id: 7,
        };
        run_start(request, ctx).await;

        assert_eq!(status.lock().unwrap().run_state, RunState::Scheduled);
    }
}
