//! Rotation state machine
//!
//! Pure state machine: receives events, returns (new_state, action). The
//! scheduler performs the I/O each action implies. One machine exists per
//! pool binding.

use std::time::Duration;

/// Where a binding is in its rotation cycle.
///
/// Transitions:
/// - Unbound → Scheduled (initial credential applied, pool started)
/// - Scheduled → Refreshing (timer fired, pool open)
/// - Refreshing → Scheduled (refresh succeeded, next lease-derived interval)
/// - Refreshing → Retrying (refresh failed, fixed retry delay)
/// - Retrying → Refreshing (timer fired, pool open)
/// - any → Closed (timer fired, pool closed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    Unbound,
    Scheduled,
    Refreshing,
    Retrying,
    Closed,
}

impl RotationState {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            RotationState::Unbound => "unbound",
            RotationState::Scheduled => "scheduled",
            RotationState::Refreshing => "refreshing",
            RotationState::Retrying => "retrying",
            RotationState::Closed => "closed",
        }
    }
}

/// Events that drive transitions.
#[derive(Debug)]
pub enum RotationEvent {
    /// Initial credential applied and pool started
    Bound { interval: Duration },
    /// A rotation task fired; `pool_closed` is sampled at that moment
    TimerFired { pool_closed: bool },
    RefreshSucceeded { interval: Duration },
    RefreshFailed { retry_in: Duration },
}

/// What the scheduler should do after a transition.
#[derive(Debug, PartialEq, Eq)]
pub enum RotationAction {
    /// Read and apply a new credential now
    Refresh,
    /// Arm exactly one rotation task after `delay`
    Arm { delay: Duration },
    /// Stop rotating; arm nothing
    Stop,
    None,
}

/// Handle a transition. Pure function: no I/O.
pub fn handle_event(state: RotationState, event: RotationEvent) -> (RotationState, RotationAction) {
    match (state, event) {
        // --- Closed is terminal ---
        (RotationState::Closed, _) => (RotationState::Closed, RotationAction::Stop),

        (_, RotationEvent::TimerFired { pool_closed: true }) => {
            (RotationState::Closed, RotationAction::Stop)
        }

        // --- Unbound ---
        (RotationState::Unbound, RotationEvent::Bound { interval }) => (
            RotationState::Scheduled,
            RotationAction::Arm { delay: interval },
        ),

        // --- Scheduled / Retrying ---
        (
            RotationState::Scheduled | RotationState::Retrying,
            RotationEvent::TimerFired { pool_closed: false },
        ) => (RotationState::Refreshing, RotationAction::Refresh),

        // --- Refreshing ---
        (RotationState::Refreshing, RotationEvent::RefreshSucceeded { interval }) => (
            RotationState::Scheduled,
            RotationAction::Arm { delay: interval },
        ),

        (RotationState::Refreshing, RotationEvent::RefreshFailed { retry_in }) => (
            RotationState::Retrying,
            RotationAction::Arm { delay: retry_in },
        ),

        // A firing while a refresh is already running, or before binding,
        // is a stray task: it must not refresh or arm a second successor.
        (state, _event) => (state, RotationAction::None),
    }
}
