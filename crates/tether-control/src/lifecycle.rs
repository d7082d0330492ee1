//! Power state machine.
//!
//! The controller only ever drives the actuator along these edges. Standing
//! requires power; powering off is allowed from any powered state.
//!
//! ```text
//!     ┌───────┐   power on   ┌──────┐    stand    ┌──────────┐
//!     │  Off  │─────────────▶│  On  │────────────▶│ Standing │
//!     └───────┘              └──────┘             └──────────┘
//!         ▲                      │                      │
//!         │       power off      │                      │
//!         └──────────────────────┴──────────────────────┘
//! ```

use tether_core::PowerState;

use crate::error::{ControlError, Result};

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidTransition` if the transition is not allowed.
pub const fn validate_transition(from: PowerState, to: PowerState) -> Result<PowerState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidTransition { from, to })
    }
}

/// Check if a transition is an edge of the power state machine.
#[must_use]
pub const fn is_valid_transition(from: PowerState, to: PowerState) -> bool {
    use PowerState::{Off, On, Standing};

    matches!(
        (from, to),
        (Off, On) | (On, Standing) | (On | Standing, Off)
    )
}

/// Returns the list of valid target states from the given state.
#[must_use]
pub fn valid_transitions_from(state: PowerState) -> Vec<PowerState> {
    use PowerState::{Off, On, Standing};

    match state {
        Off => vec![On],
        On => vec![Standing, Off],
        Standing => vec![Off],
    }
}

/// Returns true if the session must power the actuator off before ending.
#[must_use]
pub const fn needs_power_off(state: PowerState) -> bool {
    state.is_on()
}
