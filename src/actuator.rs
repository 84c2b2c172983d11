//! Opaque haptic device driver abstraction.
//!
//! `Actuator` mirrors a vendor SDK's capability set: initialize once, play
//! beats, stop, close. The scheduler is the sole writer; no other task
//! touches an Actuator instance. This crate ships [`LoggingActuator`], a
//! stub that exercises the full lifecycle without linking a real device —
//! production builds swap in a binding behind the same trait.

use async_trait::async_trait;

/// Number of motor intensity channels a beat addresses.
pub const MOTOR_COUNT: usize = 32;

/// One invocation of the device: start offset (ms), duration (ms), a fixed
/// intensity per motor, and a repeat count (`-1` = loop until stopped, as
/// carried over from the source device API).
#[derive(Debug, Clone, Copy)]
pub struct Beat {
    pub offset_ms: u32,
    pub duration_ms: u32,
    pub intensities: [u8; MOTOR_COUNT],
    pub repeat: i32,
}

impl Beat {
    /// The standard beat used by [`crate::beat_scheduler::BeatScheduler`]:
    /// offset 0, 100ms duration, intensity 20 on every motor, non-repeating
    /// per dispatch (the scheduler itself repeats the call on cadence).
    pub fn standard() -> Self {
        Self {
            offset_ms: 0,
            duration_ms: 100,
            intensities: [20; MOTOR_COUNT],
            repeat: -1,
        }
    }
}

/// Capability set for a haptic output device. All operations may fail;
/// failures are reported to the caller, logged, and never alter `RunState`.
#[async_trait]
pub trait Actuator: Send {
    /// Idempotent device initialization. Subsequent calls after a
    /// successful one are no-ops.
    async fn initialize(
        &mut self,
        app_id: &str,
        api_key: &str,
        app_name: &str,
    ) -> Result<(), String>;

    /// Dispatch one beat. The caller awaits completion.
    async fn play(&mut self, beat: Beat) -> Result<(), String>;

    /// Stop any in-progress output.
    async fn stop_all(&mut self) -> Result<(), String>;

    /// Release the device. Safe to call only after `initialize`.
    async fn close(&mut self) -> Result<(), String>;
}

/// Stub Actuator that logs every call instead of driving real hardware.
/// Supports failure injection so tests can exercise the DriverError path.
pub struct LoggingActuator {
    initialized: bool,
    fail_next_play: bool,
}

impl LoggingActuator {
    pub fn new() -> Self {
        Self {
            initialized: false,
            fail_next_play: false,
        }
    }

    /// Make the next `play` call fail once, for failure-path tests.
    #[cfg(test)]
    pub fn inject_play_failure(&mut self) {
        self.fail_next_play = true;
    }
}

impl Default for LoggingActuator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Actuator for LoggingActuator {
    async fn initialize(
        &mut self,
        app_id: &str,
        _api_key: &str,
        app_name: &str,
    ) -> Result<(), String> {
        if self.initialized {
            return Ok(());
        }
        log::info!("actuator initialize: app_id={app_id} app_name={app_name}");
        self.initialized = true;
        Ok(())
    }

    async fn play(&mut self, beat: Beat) -> Result<(), String> {
        if self.fail_next_play {
            self.fail_next_play = false;
            return Err("injected play failure".to_string());
        }
        log::debug!(
            "played haptic feedback: offset={}ms duration={}ms repeat={}",
            beat.offset_ms,
            beat.duration_ms,
            beat.repeat
        );
        Ok(())
    }

    async fn stop_all(&mut self) -> Result<(), String> {
        log::info!("actuator stop_all");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), String> {
        log::info!("actuator close");
        self.initialized = false;
        Ok(())
    }
}
