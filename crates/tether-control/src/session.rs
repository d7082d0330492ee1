//! Session orchestration.
//!
//! A [`Session`] composes the lease, power and behavior managers into one
//! control run:
//!
//! ```text
//! check estop
//! acquire lease, start keep-alive
//!   power on -> stand -> [system params] -> for each step: register, run, delete
//! cleanup (always, in order):
//!   delete outstanding behaviors
//!   power off if not already off
//!   release lease
//! ```
//!
//! The body races against lease loss and the caller's shutdown signal. The
//! first error seen, in the body or in cleanup, is the session's result;
//! later errors are logged.

use std::future::Future;
use std::sync::Arc;

use tether_core::{EstopLevel, SessionId};
use tracing::Instrument;

use crate::behavior::{BehaviorManager, BehaviorStep};
use crate::client::ActuatorClient;
use crate::config::SessionConfig;
use crate::error::{ControlError, Result};
use crate::lease::{LeaseHandle, LeaseManager};
use crate::power::PowerController;

/// What a completed session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// The session's ID.
    pub session_id: SessionId,
    /// Epoch of the lease as first acquired.
    pub lease_epoch: u64,
    /// Priority each step ran at, in order.
    pub priorities: Vec<i32>,
}

/// One control session against an actuator.
pub struct Session<C: ?Sized> {
    id: SessionId,
    config: SessionConfig,
    client: Arc<C>,
    leases: LeaseManager<C>,
    power: PowerController<C>,
    behaviors: BehaviorManager<C>,
}

impl<C: ActuatorClient + ?Sized + 'static> Session<C> {
    /// Create a session.
    pub fn new(client: Arc<C>, config: SessionConfig) -> Self {
        let leases = LeaseManager::new(
            Arc::clone(&client),
            config.resource.clone(),
            config.client_name.clone(),
            config.keep_alive.clone(),
        );
        let power = PowerController::new(Arc::clone(&client), config.poll_interval());
        let behaviors = BehaviorManager::new(Arc::clone(&client));

        Self {
            id: SessionId::generate(),
            config,
            client,
            leases,
            power,
            behaviors,
        }
    }

    /// The session's ID.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// The session's configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Refuse to start while the emergency stop is engaged.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionFailed` if the stop is engaged or its state
    /// cannot be read.
    pub async fn check_preconditions(&self) -> Result<()> {
        let level = self.client.estop_status().await.map_err(|e| {
            ControlError::PreconditionFailed(format!("could not read emergency stop: {e}"))
        })?;
        if level != EstopLevel::None {
            return Err(ControlError::PreconditionFailed(format!(
                "emergency stop engaged ({level:?})"
            )));
        }
        Ok(())
    }

    /// Run the session to completion.
    ///
    /// # Errors
    ///
    /// Returns the first error of the session; cleanup has run by then.
    pub async fn run(&self, steps: &[BehaviorStep]) -> Result<SessionSummary> {
        self.run_until(steps, std::future::pending()).await
    }

    /// Run the session, cancelling the body when `shutdown` resolves.
    ///
    /// Cleanup still runs after cancellation and the session fails with
    /// `Cancelled`.
    ///
    /// # Errors
    ///
    /// Returns the first error of the session; cleanup has run by then.
    pub async fn run_until(
        &self,
        steps: &[BehaviorStep],
        shutdown: impl Future<Output = ()>,
    ) -> Result<SessionSummary> {
        let span = tracing::info_span!(
            "session",
            session_id = %self.id,
            resource = %self.config.resource,
            owner = %self.config.client_name,
        );
        self.execute(steps, shutdown).instrument(span).await
    }

    async fn execute(
        &self,
        steps: &[BehaviorStep],
        shutdown: impl Future<Output = ()>,
    ) -> Result<SessionSummary> {
        self.check_preconditions().await?;
        let lease = self.leases.acquire(self.config.must_acquire).await?;
        let lease_epoch = lease.epoch;
        let handle = self.leases.start_keep_alive(lease);

        let mut outcome = Outcome::default();
        let priorities = {
            tokio::pin!(shutdown);
            let result = tokio::select! {
                biased;
                result = self.body(&handle, steps) => result,
                err = handle.lost() => Err(err),
                () = &mut shutdown => {
                    tracing::warn!("Shutdown requested, cleaning up");
                    Err(ControlError::Cancelled)
                }
            };
            outcome.record("body", result)
        };

        outcome.record("behavior cleanup", self.behaviors.delete_outstanding().await);
        outcome.record(
            "power off",
            self.power
                .power_off(
                    &handle,
                    self.config.cut_immediately,
                    self.config.power_off_timeout(),
                )
                .await,
        );
        outcome.record("lease release", self.leases.release(handle).await);
        outcome.finish()?;

        let summary = SessionSummary {
            session_id: self.id,
            lease_epoch,
            priorities: priorities.unwrap_or_default(),
        };
        tracing::info!(steps = summary.priorities.len(), "Session complete");
        Ok(summary)
    }

    async fn body(&self, lease: &LeaseHandle, steps: &[BehaviorStep]) -> Result<Vec<i32>> {
        self.power
            .power_on(lease, self.config.power_on_timeout())
            .await?;
        self.power.stand(lease, self.config.stand_timeout()).await?;

        if let Some(params) = &self.config.system_params {
            self.behaviors.apply_system_params(lease, params).await?;
        }

        let mut priorities = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            let priority = self.behaviors.run_scoped(lease, step).await?;
            tracing::info!(
                behavior = %step.name,
                priority,
                step = i + 1,
                total = steps.len(),
                "Behavior complete"
            );
            priorities.push(priority);
        }
        Ok(priorities)
    }
}

/// Keeps the first error of a session and logs the rest.
#[derive(Default)]
struct Outcome {
    primary: Option<(&'static str, ControlError)>,
}

impl Outcome {
    fn record<T>(&mut self, stage: &'static str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                if let Some((primary_stage, _)) = &self.primary {
                    tracing::warn!(
                        stage,
                        primary_stage,
                        error = %e,
                        "Suppressed error after an earlier failure"
                    );
                } else {
                    tracing::error!(stage, error = %e, "Session failed");
                    self.primary = Some((stage, e));
                }
                None
            }
        }
    }

    fn finish(self) -> Result<()> {
        self.primary.map_or(Ok(()), |(_, e)| Err(e))
    }
}
