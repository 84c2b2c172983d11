//! Command-serialized state machine composing the scheduler components over
//! ConfigStore/Actuator/Clock (C7).
//!
//! A single dedicated tokio task owns all mutable controller state; callers
//! never touch it directly. Commands arrive over an `mpsc` channel and are
//! applied one at a time, in enqueue order, each carrying a oneshot reply so
//! [`ControllerHandle::submit`] can observe completion (or time out) without
//! blocking the core.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::actuator::Actuator;
use crate::clock::Clock;
use crate::config_store::ConfigStore;
use crate::error::{CommandTimeoutError, ConfigError, StaleMessage};
use crate::phase_shift::{PhaseShiftManager, RequestOutcome};
use crate::start_scheduler::{self, StartContext, StartRequest};
use crate::status::{RunState, StatusSnapshot};

/// Minimum value a `run`-topic payload must carry to be treated as an
/// epoch-ms start target rather than malformed input (10^11).
const MIN_EPOCH_MS: i64 = 100_000_000_000;
const STALE_THRESHOLD_MS: i64 = 5000;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Credentials {
    pub app_id: String,
    pub api_key: String,
    pub app_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetBpm(i64),
    Stop,
    ScheduleStart(i64),
    SetPhaseShift(i32),
    Close,
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Stale(#[from] StaleMessage),
}

type Reply = oneshot::Sender<Result<(), ControllerError>>;

/// A command could not be placed onto the controller's channel (it is full
/// or the core has shut down). Callers log and drop, the same as any other
/// locally-scoped failure.
#[derive(Debug, thiserror::Error)]
#[error("controller command channel unavailable")]
pub struct EnqueueError;

/// A command already placed onto the channel, awaiting its reply. Splitting
/// enqueue from reply-waiting lets a synchronous callback (the MQTT event
/// loop) perform the enqueue itself, in arrival order, and hand only the
/// waiting off to a spawned task.
pub struct PendingCommand {
    reply_rx: oneshot::Receiver<Result<(), ControllerError>>,
}

impl PendingCommand {
    pub async fn wait(
        self,
        timeout: Duration,
    ) -> Result<Result<(), ControllerError>, CommandTimeoutError> {
        match tokio::time::timeout(timeout, self.reply_rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Ok(Ok(())),
            Err(_) => Err(CommandTimeoutError(timeout)),
        }
    }
}

/// Cheap-to-clone front for submitting commands and reading status snapshots.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<(Command, Reply)>,
    status: Arc<Mutex<StatusSnapshot>>,
}

impl ControllerHandle {
    /// Place `command` onto the controller's channel without awaiting
    /// anything, preserving the caller's enqueue order. Use this from a
    /// synchronous callback; await the returned [`PendingCommand`] (or drop
    /// it) to observe completion.
    pub fn try_enqueue(&self, command: Command) -> Result<PendingCommand, EnqueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .try_send((command, reply_tx))
            .map_err(|_| EnqueueError)?;
        Ok(PendingCommand { reply_rx })
    }

    /// Submit a command with the default 5-second completion timeout.
    pub async fn submit(
        &self,
        command: Command,
    ) -> Result<Result<(), ControllerError>, CommandTimeoutError> {
        self.submit_with_timeout(command, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    pub async fn submit_with_timeout(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<Result<(), ControllerError>, CommandTimeoutError> {
        match self.try_enqueue(command) {
            Ok(pending) => pending.wait(timeout).await,
            Err(_) => Ok(Ok(())),
        }
    }

    /// A read-only copy of the controller's externally visible state. Does
    /// not serialize with in-flight commands beyond a brief field copy.
    pub fn status(&self) -> StatusSnapshot {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

pub struct ControllerCore {
    phase_shift: PhaseShiftManager,
    clock: Arc<dyn Clock>,
    actuator: Arc<AsyncMutex<Box<dyn Actuator>>>,
    credentials: Credentials,
    schedule_id: Arc<AtomicU64>,
    status: Arc<Mutex<StatusSnapshot>>,
    bpm: Arc<AtomicU32>,
    beat_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    start_task: Option<JoinHandle<()>>,
    commands: mpsc::Receiver<(Command, Reply)>,
}

/// Construct the core, spawn its dedicated task, and return a handle to it.
pub fn spawn(
    config: Arc<ConfigStore>,
    actuator: Box<dyn Actuator>,
    clock: Arc<dyn Clock>,
    credentials: Credentials,
    default_bpm: u32,
) -> ControllerHandle {
    let phase_shift = PhaseShiftManager::new(config);
    let phase_shift_ms = phase_shift.effective();
    let status = Arc::new(Mutex::new(StatusSnapshot::initial(
        default_bpm,
        phase_shift_ms,
    )));

    let (tx, rx) = mpsc::channel(32);
    let core = ControllerCore {
        phase_shift,
        clock,
        actuator: Arc::new(AsyncMutex::new(actuator)),
        credentials,
        schedule_id: Arc::new(AtomicU64::new(0)),
        status: status.clone(),
        bpm: Arc::new(AtomicU32::new(default_bpm)),
        beat_task: Arc::new(Mutex::new(None)),
        start_task: None,
        commands: rx,
    };
    tokio::spawn(core.run());

    ControllerHandle {
        commands: tx,
        status,
    }
}

impl ControllerCore {
    pub async fn run(mut self) {
        while let Some((command, reply)) = self.commands.recv().await {
            let result = self.apply(command).await;
            let _ = reply.send(result);
        }
    }

    async fn apply(&mut self, command: Command) -> Result<(), ControllerError> {
        match command {
            Command::SetBpm(value) => self.do_set_bpm(value),
            Command::Stop => {
                self.do_stop().await;
                Ok(())
            }
            Command::ScheduleStart(payload_target_ms) => {
                self.do_schedule_start(payload_target_ms).await
            }
            Command::SetPhaseShift(value) => self.do_set_phase_shift(value).await,
            Command::Close => {
                self.do_stop().await;
                if let Err(err) = self.actuator.lock().await.close().await {
                    log::warn!("actuator close failed: {err}");
                }
                Ok(())
            }
        }
    }

    fn do_set_bpm(&mut self, value: i64) -> Result<(), ControllerError> {
        if value <= 0 {
            return Err(ConfigError::InvalidArgument("bpm").into());
        }
        self.bpm.store(value as u32, Ordering::SeqCst);
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.bpm = value as u32;
        status.last_event_text = format!("bpm set to {value}");
        Ok(())
    }

    async fn do_stop(&mut self) {
        self.schedule_id.fetch_add(1, Ordering::SeqCst);
        self.cancel_active_schedulers().await;
        if let Err(err) = self.actuator.lock().await.stop_all().await {
            log::warn!("actuator stop_all failed: {err}");
        }
        self.phase_shift.commit_on_stop();

        let snapshot = self.phase_shift.snapshot();
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.run_state = RunState::Stopped;
        status.phase_shift_ms = snapshot.phase_shift_ms;
        status.pending_delta_ms = snapshot.pending_delta_ms;
        status.effective_phase_shift_ms = snapshot.effective();
        status.last_event_text = "stopped".to_string();
    }

    async fn do_schedule_start(&mut self, payload_target_ms: i64) -> Result<(), ControllerError> {
        if payload_target_ms < MIN_EPOCH_MS {
            return Err(ConfigError::InvalidArgument("run payload target (epoch-ms)").into());
        }

        let effective = self.phase_shift.effective() as i64;
        let target_ms = payload_target_ms - effective;
        let now = self.clock.now_wall_ms();
        let lag_ms = now - target_ms;
        if lag_ms > STALE_THRESHOLD_MS {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            status.last_event_text = format!("ignored stale start: lag {lag_ms}ms");
            return Err(StaleMessage { lag_ms }.into());
        }

        let new_id = self.schedule_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel_active_schedulers().await;
        if let Err(err) = self.actuator.lock().await.stop_all().await {
            log::warn!("actuator stop_all failed during reschedule: {err}");
        }

        {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            status.run_state = RunState::Scheduled;
            status.last_payload_target_ms = Some(payload_target_ms);
            status.last_target_ms = Some(target_ms);
            status.last_event_text = "scheduled".to_string();
        }

        self.spawn_start(StartRequest {
            payload_target_ms,
            target_ms,
            schedule_id: new_id,
        });
        Ok(())
    }

    async fn do_set_phase_shift(&mut self, requested: i32) -> Result<(), ControllerError> {
        let running = {
            let status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            status.run_state == RunState::Running
        };
        let outcome = self.phase_shift.request(requested, running);
        let snapshot = self.phase_shift.snapshot();

        let (run_state, last_payload_target_ms) = {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            status.phase_shift_ms = snapshot.phase_shift_ms;
            status.pending_delta_ms = snapshot.pending_delta_ms;
            status.effective_phase_shift_ms = snapshot.effective();
            status.last_event_text = match outcome {
                RequestOutcome::StagedWhileRunning => "phase shift staged".to_string(),
                RequestOutcome::CommittedWhileIdle => "phase shift committed".to_string(),
            };
            (status.run_state, status.last_payload_target_ms)
        };

        if matches!(outcome, RequestOutcome::CommittedWhileIdle) && run_state == RunState::Scheduled
        {
            if let Some(payload_target_ms) = last_payload_target_ms {
                let new_target_ms = payload_target_ms - snapshot.effective() as i64;
                let new_id = self.schedule_id.fetch_add(1, Ordering::SeqCst) + 1;
                self.cancel_active_schedulers().await;
                {
                    let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
                    status.last_target_ms = Some(new_target_ms);
                }
                self.spawn_start(StartRequest {
                    payload_target_ms,
                    target_ms: new_target_ms,
                    schedule_id: new_id,
                });
            }
        }
        Ok(())
    }

    fn spawn_start(&mut self, request: StartRequest) {
        let ctx = StartContext {
            clock: self.clock.clone(),
            actuator: self.actuator.clone(),
            app_id: self.credentials.app_id.clone(),
            api_key: self.credentials.api_key.clone(),
            app_name: self.credentials.app_name.clone(),
            schedule_id: self.schedule_id.clone(),
            status: self.status.clone(),
            bpm: self.bpm.clone(),
            phase_state: self.phase_shift.shared_state(),
            beat_task: self.beat_task.clone(),
        };
        self.start_task = Some(tokio::spawn(start_scheduler::run_start(request, ctx)));
    }

    /// Abort and await both in-flight tasks. A no-op if neither is running.
    async fn cancel_active_schedulers(&mut self) {
        if let Some(handle) = self.start_task.take() {
            handle.abort();
            let _ = handle.await;
        }
        let existing = self
            .beat_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = existing {
            handle.abort();
            let _ = handle.await;
        }
    }
}
