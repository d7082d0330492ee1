//! Simulator application state.

use std::sync::Arc;

use tether_control::mock::MockActuator;
use tether_core::{Behavior, BehaviorName, Color, LedSequenceGroup};

use crate::config::SimConfig;

/// Name of the status-light behavior every simulated actuator starts with.
pub const STATUS_LIGHTS: &str = "status_lights";

/// Shared state available to all request handlers.
pub struct SimState {
    /// The simulated actuator.
    pub actuator: Arc<MockActuator>,
    /// Simulator configuration.
    pub config: SimConfig,
}

impl SimState {
    /// Create simulator state around an existing actuator.
    #[must_use]
    pub const fn new(actuator: Arc<MockActuator>, config: SimConfig) -> Self {
        Self { actuator, config }
    }

    /// Build a fresh actuator from `config`, seeding permanent behaviors if
    /// configured.
    #[must_use]
    pub fn from_config(config: SimConfig) -> Self {
        let actuator = Arc::new(MockActuator::with_config(config.mock_config()));
        if config.seed_permanent {
            seed_permanent(&actuator);
        }
        Self::new(actuator, config)
    }
}

impl Clone for SimState {
    fn clone(&self) -> Self {
        Self {
            actuator: Arc::clone(&self.actuator),
            config: self.config.clone(),
        }
    }
}

/// Install the behaviors a real actuator ships with and refuses to delete.
pub fn seed_permanent(actuator: &MockActuator) {
    if let Ok(name) = BehaviorName::new(STATUS_LIGHTS) {
        let dim = Behavior::new(0).with_leds(LedSequenceGroup::solid(Color::rgb(32, 32, 32)));
        actuator.add_behavior(name, dim, true);
    }
}
