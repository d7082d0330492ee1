//! Verified power and posture transitions.
//!
//! Commands only report acceptance, so every transition is followed by
//! polling `GetPowerState` until the target is observed or the caller's
//! timeout elapses. A command that does not converge is a failure.

use std::sync::Arc;
use std::time::Duration;

use tether_core::PowerState;
use tokio::time::Instant;

use crate::client::ActuatorClient;
use crate::error::{ControlError, Result};
use crate::lease::LeaseHandle;
use crate::lifecycle::{needs_power_off, validate_transition};
use crate::wire::PowerCommand;

/// Drives the actuator through the power state machine.
pub struct PowerController<C: ?Sized> {
    client: Arc<C>,
    poll_interval: Duration,
}

impl<C: ActuatorClient + ?Sized> PowerController<C> {
    /// Create a power controller polling state every `poll_interval`.
    pub const fn new(client: Arc<C>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    /// Read the current power state.
    ///
    /// # Errors
    ///
    /// Returns an error if the actuator cannot be queried.
    pub async fn state(&self) -> Result<PowerState> {
        self.client.power_state().await
    }

    /// Power the motors on and wait for `On` to be observed.
    ///
    /// Already powered is success without a command.
    ///
    /// # Errors
    ///
    /// Returns `PowerOnFailed` if the command is rejected or does not
    /// converge within `timeout`, and `LeaseLost` if the lease is gone.
    pub async fn power_on(&self, lease: &LeaseHandle, timeout: Duration) -> Result<()> {
        let current = self.state().await?;
        if current.is_on() {
            tracing::debug!(state = %current, "Already powered on");
            return Ok(());
        }
        validate_transition(current, PowerState::On)?;

        let held = lease.ensure_valid()?;
        self.client
            .set_power(&held, PowerCommand::On)
            .await
            .map_err(|e| {
                wrap(lease.absorb(e), |reason| ControlError::PowerOnFailed {
                    observed: current,
                    reason,
                })
            })?;

        self.wait_for(timeout, |s| s.is_on(), |observed, reason| {
            ControlError::PowerOnFailed { observed, reason }
        })
        .await?;
        tracing::info!("Powered on");
        Ok(())
    }

    /// Stand up and wait for `Standing` to be observed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the motors are off, `StandFailed` if
    /// the command is rejected or does not converge within `timeout`, and
    /// `LeaseLost` if the lease is gone.
    pub async fn stand(&self, lease: &LeaseHandle, timeout: Duration) -> Result<()> {
        let current = self.state().await?;
        if current == PowerState::Standing {
            tracing::debug!("Already standing");
            return Ok(());
        }
        validate_transition(current, PowerState::Standing)?;

        let held = lease.ensure_valid()?;
        self.client.stand(&held).await.map_err(|e| {
            wrap(lease.absorb(e), |reason| ControlError::StandFailed {
                observed: current,
                reason,
            })
        })?;

        self.wait_for(
            timeout,
            |s| s == PowerState::Standing,
            |observed, reason| ControlError::StandFailed { observed, reason },
        )
        .await?;
        tracing::info!("Standing");
        Ok(())
    }

    /// Power the motors off and wait for `Off` to be observed.
    ///
    /// Does nothing if the motors are already off. Without a valid lease
    /// the command cannot be sent and the call fails.
    ///
    /// # Errors
    ///
    /// Returns `PowerOffFailed` if the lease is gone, the command is
    /// rejected, or `Off` is not observed within `timeout`.
    pub async fn power_off(
        &self,
        lease: &LeaseHandle,
        cut_immediately: bool,
        timeout: Duration,
    ) -> Result<()> {
        let current = self.state().await.map_err(|e| ControlError::PowerOffFailed {
            observed: PowerState::Off,
            reason: format!("could not read power state: {e}"),
        })?;
        if !needs_power_off(current) {
            tracing::debug!("Already powered off");
            return Ok(());
        }

        let off_failed = |reason: String| ControlError::PowerOffFailed {
            observed: current,
            reason,
        };
        let held = lease.ensure_valid().map_err(|e| off_failed(e.to_string()))?;
        self.client
            .set_power(&held, PowerCommand::Off { cut_immediately })
            .await
            .map_err(|e| off_failed(lease.absorb(e).to_string()))?;

        self.wait_for(
            timeout,
            |s| s == PowerState::Off,
            |observed, reason| ControlError::PowerOffFailed { observed, reason },
        )
        .await?;
        tracing::info!(cut_immediately, "Powered off");
        Ok(())
    }

    /// Poll until `reached` holds or `timeout` elapses.
    async fn wait_for(
        &self,
        timeout: Duration,
        reached: impl Fn(PowerState) -> bool + Send,
        failed: impl Fn(PowerState, String) -> ControlError + Send,
    ) -> Result<PowerState> {
        let deadline = Instant::now() + timeout;
        let mut observed = PowerState::Off;

        loop {
            match self.client.power_state().await {
                Ok(state) if reached(state) => return Ok(state),
                Ok(state) => observed = state,
                Err(e) if e.is_retriable() => {
                    tracing::debug!(error = %e, "Power state poll failed");
                }
                Err(e) => return Err(failed(observed, e.to_string())),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(failed(
                    observed,
                    format!("not reached within {}ms", timeout.as_millis()),
                ));
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

/// Lease loss passes through; anything else becomes the operation's error.
fn wrap(err: ControlError, failed: impl FnOnce(String) -> ControlError) -> ControlError {
    if err.is_lease_loss() {
        err
    } else {
        failed(err.to_string())
    }
}
