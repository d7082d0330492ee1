//! Behavior lifecycle: register, run for a window, always delete.
//!
//! Registered behaviors are tracked as outstanding until a delete call for
//! them has returned, so the session can sweep whatever a failed or
//! cancelled step left behind. A name whose delete returned is never deleted
//! again.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tether_core::{Behavior, BehaviorName, CoreError, LiveBehavior, SystemParams};

use crate::client::ActuatorClient;
use crate::error::{ControlError, Result};
use crate::lease::LeaseHandle;
use crate::wire::ErrorCode;

/// Priority for a new behavior: one more than the highest existing
/// priority, or `1` when there are none.
///
/// ```
/// use tether_control::next_priority;
///
/// assert_eq!(next_priority([3, 7, 2]), 8);
/// assert_eq!(next_priority(Vec::new()), 1);
/// ```
#[must_use]
pub fn next_priority(existing: impl IntoIterator<Item = i32>) -> i32 {
    existing.into_iter().max().unwrap_or(0).saturating_add(1)
}

/// How a step's priority is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Above every behavior currently registered.
    #[default]
    Next,
    /// A fixed value.
    Fixed(i32),
}

/// One behavior to register, run for `duration`, then delete.
#[derive(Debug, Clone)]
pub struct BehaviorStep {
    /// Name to register under.
    pub name: BehaviorName,
    /// Definition; its priority is replaced according to `priority`.
    pub template: Behavior,
    /// How long the behavior runs.
    pub duration: Duration,
    /// Priority policy.
    pub priority: Priority,
}

impl BehaviorStep {
    /// A step using the next free priority.
    #[must_use]
    pub fn new(name: BehaviorName, template: Behavior, duration: Duration) -> Self {
        Self {
            name,
            template,
            duration,
            priority: Priority::Next,
        }
    }

    /// Use a fixed priority instead.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Priority::Fixed(priority);
        self
    }
}

/// Registers, runs and deletes behaviors on the actuator.
pub struct BehaviorManager<C: ?Sized> {
    client: Arc<C>,
    outstanding: Mutex<BTreeSet<BehaviorName>>,
}

impl<C: ActuatorClient + ?Sized> BehaviorManager<C> {
    /// Create a behavior manager.
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            outstanding: Mutex::default(),
        }
    }

    /// Names registered by this manager that have not been deleted yet.
    #[must_use]
    pub fn outstanding(&self) -> Vec<BehaviorName> {
        self.outstanding.lock().iter().cloned().collect()
    }

    /// List behaviors currently registered on the actuator.
    ///
    /// # Errors
    ///
    /// Returns an error if the actuator cannot be queried.
    pub async fn list_existing(&self) -> Result<Vec<LiveBehavior>> {
        self.client.list_behaviors().await
    }

    /// Compute the priority for a new behavior from what is registered now.
    ///
    /// # Errors
    ///
    /// Returns an error if the actuator cannot be queried.
    pub async fn allocate_priority(&self) -> Result<i32> {
        let existing = self.list_existing().await?;
        Ok(next_priority(existing.iter().map(|b| b.behavior.priority)))
    }

    /// Create or replace a behavior.
    ///
    /// # Errors
    ///
    /// Returns `LeaseLost` if the lease is gone and `RegistrationFailed` if
    /// the actuator refuses the definition.
    pub async fn register(
        &self,
        lease: &LeaseHandle,
        name: &BehaviorName,
        behavior: &Behavior,
    ) -> Result<()> {
        let held = lease.ensure_valid()?;
        // Tracked before the call: a request that times out may still have
        // been stored.
        self.outstanding.lock().insert(name.clone());

        match self.client.register_behavior(&held, name, behavior).await {
            Ok(()) => {
                tracing::debug!(behavior = %name, priority = behavior.priority, "Registered behavior");
                Ok(())
            }
            Err(e) => {
                if e.rpc_code().is_some() {
                    // Rejected outright; nothing was stored.
                    self.outstanding.lock().remove(name);
                }
                Err(lifecycle_error(lease, e, |source| {
                    ControlError::RegistrationFailed {
                        name: name.clone(),
                        source,
                    }
                }))
            }
        }
    }

    /// Run a registered behavior until `until`.
    ///
    /// # Errors
    ///
    /// Returns `LeaseLost` if the lease is gone and `RunFailed` if the
    /// actuator refuses the run.
    pub async fn run(
        &self,
        lease: &LeaseHandle,
        name: &BehaviorName,
        until: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let held = lease.ensure_valid()?;
        self.client
            .run_behavior(&held, name, until, false)
            .await
            .map_err(|e| {
                lifecycle_error(lease, e, |source| ControlError::RunFailed {
                    name: name.clone(),
                    source,
                })
            })?;
        tracing::debug!(behavior = %name, %until, "Running behavior");
        Ok(())
    }

    /// Delete behaviors. Names that do not exist are not an error.
    ///
    /// # Errors
    ///
    /// Returns `DeletionFailed` for any other failure.
    pub async fn delete(&self, names: &[BehaviorName]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }

        let result = self.client.delete_behaviors(names).await;
        // Settled once the call returns, success or not. A delete dropped in
        // flight leaves the names for the session sweep.
        {
            let mut outstanding = self.outstanding.lock();
            for name in names {
                outstanding.remove(name);
            }
        }

        match result {
            Ok(()) => {
                tracing::debug!(count = names.len(), "Deleted behaviors");
                Ok(())
            }
            Err(e) if e.rpc_code() == Some(ErrorCode::DoesNotExist) => {
                tracing::debug!(error = %e, "Some behaviors were already gone");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to delete behaviors");
                Err(ControlError::DeletionFailed {
                    names: names.to_vec(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Delete every behavior still outstanding.
    ///
    /// # Errors
    ///
    /// Returns `DeletionFailed` if the delete call fails.
    pub async fn delete_outstanding(&self) -> Result<()> {
        let names = self.outstanding();
        self.delete(&names).await
    }

    /// Register `step`, run it for its duration and delete it.
    ///
    /// The delete is attempted whether or not registering or running
    /// succeeded. If both the step and the delete fail, the step's error is
    /// returned and the delete failure is logged. Returns early with
    /// `LeaseLost` if the lease is lost during the run window.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the step, or `DeletionFailed`.
    pub async fn run_scoped(&self, lease: &LeaseHandle, step: &BehaviorStep) -> Result<i32> {
        let priority = match step.priority {
            Priority::Fixed(p) => p,
            Priority::Next => self.allocate_priority().await.map_err(|e| {
                lifecycle_error(lease, e, |source| ControlError::RegistrationFailed {
                    name: step.name.clone(),
                    source,
                })
            })?,
        };
        let behavior = Behavior {
            priority,
            ..step.template.clone()
        };

        let result = self
            .register_and_run(lease, &step.name, &behavior, step.duration)
            .await;

        let needs_delete = self.outstanding.lock().contains(&step.name);
        let cleanup = if needs_delete {
            self.delete(std::slice::from_ref(&step.name)).await
        } else {
            Ok(())
        };

        match (result, cleanup) {
            (Ok(()), cleanup) => cleanup.map(|()| priority),
            (Err(primary), Err(secondary)) => {
                tracing::warn!(
                    behavior = %step.name,
                    error = %secondary,
                    "Behavior deletion failed after an earlier error"
                );
                Err(primary)
            }
            (Err(primary), Ok(())) => Err(primary),
        }
    }

    async fn register_and_run(
        &self,
        lease: &LeaseHandle,
        name: &BehaviorName,
        behavior: &Behavior,
        duration: Duration,
    ) -> Result<()> {
        self.register(lease, name, behavior).await?;

        let window = chrono::Duration::from_std(duration)
            .map_err(|e| CoreError::InvalidDuration(e.to_string()))?;
        self.run(lease, name, Utc::now() + window).await?;

        tokio::select! {
            biased;
            err = lease.lost() => Err(err),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Validate and apply audio/visual system parameters.
    ///
    /// # Errors
    ///
    /// Returns `Core` for out-of-range values, `LeaseLost` if the lease is
    /// gone, or the actuator's rejection.
    pub async fn apply_system_params(
        &self,
        lease: &LeaseHandle,
        params: &SystemParams,
    ) -> Result<()> {
        params.validate()?;
        let held = lease.ensure_valid()?;
        self.client
            .set_system_params(&held, params)
            .await
            .map_err(|e| lease.absorb(e))?;
        tracing::info!(
            max_brightness = ?params.max_brightness,
            buzzer_max_volume = ?params.buzzer_max_volume,
            "Applied system params"
        );
        Ok(())
    }
}

/// Lease loss passes through; anything else is wrapped by `wrap`.
fn lifecycle_error(
    lease: &LeaseHandle,
    err: ControlError,
    wrap: impl FnOnce(Box<ControlError>) -> ControlError,
) -> ControlError {
    let err = lease.absorb(err);
    if err.is_lease_loss() {
        err
    } else {
        wrap(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeepAliveConfig;
    use crate::lease::LeaseManager;
    use crate::mock::{Call, MockActuator};
    use crate::wire::RpcOp;
    use tether_core::{ClientName, Color, LedSequenceGroup};
    use tokio::time::Instant;

    struct Fixture {
        mock: Arc<MockActuator>,
        leases: LeaseManager<MockActuator>,
        behaviors: BehaviorManager<MockActuator>,
    }

    fn fixture() -> Fixture {
        let mock = Arc::new(MockActuator::new());
        let leases = LeaseManager::new(
            Arc::clone(&mock),
            "body",
            ClientName::new("tester").unwrap(),
            KeepAliveConfig::default(),
        );
        let behaviors = BehaviorManager::new(Arc::clone(&mock));
        Fixture {
            mock,
            leases,
            behaviors,
        }
    }

    fn name(s: &str) -> BehaviorName {
        BehaviorName::new(s).unwrap()
    }

    fn red() -> Behavior {
        red_at(0)
    }

    fn red_at(priority: i32) -> Behavior {
        Behavior::new(priority).with_leds(LedSequenceGroup::solid(Color::rgb(255, 0, 0)))
    }

    fn step(s: &str, secs: u64) -> BehaviorStep {
        BehaviorStep::new(name(s), red(), Duration::from_secs(secs))
    }

    #[test]
    fn priority_is_one_above_max() {
        assert_eq!(next_priority([3, 7, 2]), 8);
        assert_eq!(next_priority(std::iter::empty()), 1);
        assert_eq!(next_priority([-5]), -4);
        assert_eq!(next_priority([i32::MAX]), i32::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn run_scoped_registers_runs_and_deletes() {
        let f = fixture();
        f.mock.add_behavior(name("idle_glow"), red_at(3), true);
        let lease = f.leases.start_keep_alive(f.leases.acquire(true).await.unwrap());

        let started = Instant::now();
        let priority = f.behaviors.run_scoped(&lease, &step("a", 5)).await.unwrap();
        assert_eq!(priority, 4);
        assert!(started.elapsed() >= Duration::from_secs(5));

        assert!(!f.mock.has_behavior(&name("a")));
        assert!(f.behaviors.outstanding().is_empty());
        let ops: Vec<_> = f
            .mock
            .ops()
            .into_iter()
            .filter(|op| op.is_mutating() || *op == RpcOp::ListBehaviors)
            .collect();
        assert_eq!(
            ops,
            vec![
                RpcOp::ListBehaviors,
                RpcOp::RegisterBehavior,
                RpcOp::RunBehavior,
                RpcOp::DeleteBehaviors,
            ]
        );
        f.leases.release(lease).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn delete_dropped_in_flight_stays_outstanding() {
        let f = fixture();
        f.mock.set_latency(RpcOp::DeleteBehaviors, Duration::from_secs(1));
        let lease = f.leases.start_keep_alive(f.leases.acquire(true).await.unwrap());

        // Cut the step off after its window while its delete is in flight.
        let cut = tokio::time::timeout(
            Duration::from_millis(2500),
            f.behaviors.run_scoped(&lease, &step("a", 2)),
        )
        .await;
        assert!(cut.is_err());
        assert!(f.mock.has_behavior(&name("a")));
        assert_eq!(f.behaviors.outstanding(), vec![name("a")]);

        f.behaviors.delete_outstanding().await.unwrap();
        assert!(!f.mock.has_behavior(&name("a")));
        assert!(f.behaviors.outstanding().is_empty());
        assert_eq!(f.mock.count(RpcOp::DeleteBehaviors), 1);
        f.leases.release(lease).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_priority_skips_listing() {
        let f = fixture();
        let lease = f.leases.start_keep_alive(f.leases.acquire(true).await.unwrap());

        let priority = f
            .behaviors
            .run_scoped(&lease, &step("red", 1).with_priority(100))
            .await
            .unwrap();
        assert_eq!(priority, 100);
        assert_eq!(f.mock.count(RpcOp::ListBehaviors), 0);
        assert!(f.mock.calls().contains(&Call::RegisterBehavior {
            name: name("red"),
            priority: 100,
        }));
        f.leases.release(lease).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_failure_still_deletes() {
        let f = fixture();
        let lease = f.leases.start_keep_alive(f.leases.acquire(true).await.unwrap());
        f.mock.fail_next(RpcOp::RunBehavior, ErrorCode::InternalServerError);

        let err = f
            .behaviors
            .run_scoped(&lease, &step("a", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::RunFailed { .. }));
        assert_eq!(f.mock.count(RpcOp::DeleteBehaviors), 1);
        assert!(!f.mock.has_behavior(&name("a")));
        f.leases.release(lease).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn delete_failure_does_not_mask_run_failure() {
        let f = fixture();
        let lease = f.leases.start_keep_alive(f.leases.acquire(true).await.unwrap());
        f.mock.fail_next(RpcOp::RunBehavior, ErrorCode::InternalServerError);
        f.mock.fail_next(RpcOp::DeleteBehaviors, ErrorCode::InternalServerError);

        let err = f
            .behaviors
            .run_scoped(&lease, &step("a", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::RunFailed { .. }));
        assert_eq!(f.mock.count(RpcOp::DeleteBehaviors), 1);
        assert!(f.behaviors.outstanding().is_empty());
        f.leases.release(lease).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn delete_failure_after_success_is_reported() {
        let f = fixture();
        let lease = f.leases.start_keep_alive(f.leases.acquire(true).await.unwrap());
        f.mock.fail_next(RpcOp::DeleteBehaviors, ErrorCode::InternalServerError);

        let err = f
            .behaviors
            .run_scoped(&lease, &step("a", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::DeletionFailed { .. }));
        f.leases.release(lease).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_registration_is_not_deleted() {
        let f = fixture();
        f.mock.add_behavior(name("idle_glow"), red(), true);
        let lease = f.leases.start_keep_alive(f.leases.acquire(true).await.unwrap());

        let err = f
            .behaviors
            .run_scoped(&lease, &step("idle_glow", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::RegistrationFailed { .. }));
        assert_eq!(f.mock.count(RpcOp::DeleteBehaviors), 0);
        assert!(f.mock.has_behavior(&name("idle_glow")));
        f.leases.release(lease).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn registration_transport_failure_still_deletes() {
        let f = fixture();
        let lease = f.leases.start_keep_alive(f.leases.acquire(true).await.unwrap());
        f.mock.fail_next_transport(RpcOp::RegisterBehavior);

        let err = f
            .behaviors
            .run_scoped(&lease, &step("a", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::RegistrationFailed { .. }));
        // The name never reached the store, so the delete is absorbed.
        assert_eq!(f.mock.count(RpcOp::DeleteBehaviors), 1);
        f.leases.release(lease).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_absent_behavior_is_ok() {
        let f = fixture();
        f.behaviors.delete(&[name("ghost")]).await.unwrap();
        f.behaviors.delete(&[]).await.unwrap();
        assert_eq!(f.mock.count(RpcOp::DeleteBehaviors), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lease_loss_ends_run_window_early() {
        let f = fixture();
        let lease = f.leases.start_keep_alive(f.leases.acquire(true).await.unwrap());
        let rival = ClientName::new("rival").unwrap();

        let mock = Arc::clone(&f.mock);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            mock.preempt("body", &rival);
        });

        let started = Instant::now();
        let err = f
            .behaviors
            .run_scoped(&lease, &step("a", 30))
            .await
            .unwrap_err();
        assert!(err.is_lease_loss());
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(!f.mock.has_behavior(&name("a")));
        f.leases.release(lease).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn system_params_are_validated_before_sending() {
        let f = fixture();
        let lease = f.leases.start_keep_alive(f.leases.acquire(true).await.unwrap());

        let bad = SystemParams {
            buzzer_max_volume: Some(-0.1),
            ..Default::default()
        };
        let err = f
            .behaviors
            .apply_system_params(&lease, &bad)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Core(_)));
        assert_eq!(f.mock.count(RpcOp::SetSystemParams), 0);

        let volume = SystemParams {
            buzzer_max_volume: Some(0.5),
            ..Default::default()
        };
        f.behaviors.apply_system_params(&lease, &volume).await.unwrap();
        assert_eq!(f.mock.current_params().buzzer_max_volume, Some(0.5));
        f.leases.release(lease).await.unwrap();
    }
}
