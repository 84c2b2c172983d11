//! Status snapshot shared between the scheduler and any observer (GUI, logs).

/// Run state of the controller. Transitions are restricted to I5:
/// Stopped -> Scheduled -> Running -> Stopped, with Scheduled -> Stopped
/// also valid (a Stop cancels a pending start).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Scheduled,
    Running,
}

/// Read-only copy of the controller's externally visible state. Produced
/// under a short-lived lock; readers never touch controller internals.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub bpm: u32,
    pub run_state: RunState,
    pub phase_shift_ms: i32,
    pub pending_delta_ms: i32,
    pub effective_phase_shift_ms: i32,
    pub last_payload_target_ms: Option<i64>,
    pub last_target_ms: Option<i64>,
    pub last_actual_ms: Option<i64>,
    pub last_event_text: String,
}

impl StatusSnapshot {
    pub fn initial(bpm: u32, phase_shift_ms: i32) -> Self {
        Self {
            bpm,
            run_state: RunState::Stopped,
            phase_shift_ms,
            pending_delta_ms: 0,
            effective_phase_shift_ms: phase_shift_ms,
            last_payload_target_ms: None,
            last_target_ms: None,
            last_actual_ms: None,
            last_event_text: "initialized".to_string(),
        }
    }
}
