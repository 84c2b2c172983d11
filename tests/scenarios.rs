//! End-to-end scenarios against the public `ControllerHandle` API, one per
//! concrete scenario in the core's testable-properties list: BPM-only
//! updates, scheduled-start alignment, stale-start rejection, live re-phase
//! and commit-on-stop, and cancellation of a pending scheduled start.

use std::sync::Arc;
use std::time::Duration;

use bhaptics_controller::controller::{self, Command};
use bhaptics_controller::{ConfigStore, Credentials, LoggingActuator, RunState};

fn credentials() -> Credentials {
    Credentials {
        app_id: "test-app".to_string(),
        api_key: "test-key".to_string(),
        app_name: "test-device".to_string(),
    }
}

fn config_store() -> Arc<ConfigStore> {
    let dir = tempfile::tempdir().unwrap();
    Arc::new(ConfigStore::open(dir.path().join("config.json")).unwrap())
}

#[tokio::test]
async fn bpm_only_update_leaves_run_state_stopped() {
    let handle = controller::spawn(
        config_store(),
        Box::new(LoggingActuator::new()),
        Arc::new(bhaptics_controller::FakeClock::new(0)),
        credentials(),
        120,
    );

    handle.submit(Command::SetBpm(90)).await.unwrap().unwrap();

    let status = handle.status();
    assert_eq!(status.bpm, 90);
    assert_eq!(status.run_state, RunState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn scheduled_start_transitions_to_running_at_target() {
    let clock = Arc::new(bhaptics_controller::FakeClock::new(1_000_000_000_000));
    let handle = controller::spawn(
        config_store(),
        Box::new(LoggingActuator::new()),
        clock.clone(),
        credentials(),
        120,
    );

    let target = clock.now_wall_ms() + 2_000;
    handle
        .submit(Command::ScheduleStart(target))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.status().run_state, RunState::Scheduled);

    tokio::time::advance(Duration::from_millis(2_100)).await;
    clock.set_wall_ms(target);
    // Allow the start scheduler's spawned tasks to observe the advanced clock.
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(1)).await;

    assert_eq!(handle.status().run_state, RunState::Running);
    let status = handle.status();
    assert_eq!(status.last_target_ms, Some(target));
}

#[tokio::test]
async fn stale_start_is_rejected_without_changing_state() {
    let clock = Arc::new(bhaptics_controller::FakeClock::new(1_000_000_000_000));
    let handle = controller::spawn(
        config_store(),
        Box::new(LoggingActuator::new()),
        clock.clone(),
        credentials(),
        120,
    );

    let stale_target = clock.now_wall_ms() - 6_000;
    let result = handle
        .submit(Command::ScheduleStart(stale_target))
        .await
        .unwrap();

    assert!(result.is_err());
    let status = handle.status();
    assert_eq!(status.run_state, RunState::Stopped);
    assert!(status.last_event_text.contains("stale"));
}

#[tokio::test(start_paused = true)]
async fn live_rephase_then_stop_commits_session_delta() {
    let config = config_store();
    let clock = Arc::new(bhaptics_controller::FakeClock::new(1_000_000_000_000));
    let handle = controller::spawn(
        config.clone(),
        Box::new(LoggingActuator::new()),
        clock.clone(),
        credentials(),
        120,
    );

    let target = clock.now_wall_ms() + 1_000;
    handle
        .submit(Command::ScheduleStart(target))
        .await
        .unwrap()
        .unwrap();

    tokio::time::advance(Duration::from_millis(1_100)).await;
    clock.set_wall_ms(target);
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(handle.status().run_state, RunState::Running);

    handle
        .submit(Command::SetPhaseShift(200))
        .await
        .unwrap()
        .unwrap();
    let status = handle.status();
    assert_eq!(status.pending_delta_ms, 200);
    assert_eq!(status.effective_phase_shift_ms, 200);

    handle.submit(Command::Stop).await.unwrap().unwrap();
    assert_eq!(handle.status().run_state, RunState::Stopped);
    assert_eq!(config.load("phase_shift_ms", 0), 200);
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_scheduled_start_prevents_it_from_firing() {
    let clock = Arc::new(bhaptics_controller::FakeClock::new(1_000_000_000_000));
    let handle = controller::spawn(
        config_store(),
        Box::new(LoggingActuator::new()),
        clock.clone(),
        credentials(),
        120,
    );

    let target = clock.now_wall_ms() + 3_000;
    handle
        .submit(Command::ScheduleStart(target))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.status().run_state, RunState::Scheduled);

    tokio::time::advance(Duration::from_secs(1)).await;
    handle.submit(Command::Stop).await.unwrap().unwrap();
    assert_eq!(handle.status().run_state, RunState::Stopped);

    tokio::time::advance(Duration::from_secs(3)).await;
    clock.set_wall_ms(target + 1_000);
    tokio::task::yield_now().await;

    assert_eq!(handle.status().run_state, RunState::Stopped);
}

#[tokio::test]
async fn phase_shift_clamp_while_scheduled_reschedules_earlier_target() {
    let clock = Arc::new(bhaptics_controller::FakeClock::new(1_000_000_000_000));
    let handle = controller::spawn(
        config_store(),
        Box::new(LoggingActuator::new()),
        clock.clone(),
        credentials(),
        120,
    );

    let payload_target = clock.now_wall_ms() + 4_000;
    handle
        .submit(Command::ScheduleStart(payload_target))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        handle.status().last_target_ms,
        Some(payload_target),
        "phase shift starts at zero, so target == payload"
    );

    handle
        .submit(Command::SetPhaseShift(3_000))
        .await
        .unwrap()
        .unwrap();

    let status = handle.status();
    assert_eq!(status.effective_phase_shift_ms, 2_000, "clamped to +2000");
    assert_eq!(status.last_target_ms, Some(payload_target - 2_000));
}
