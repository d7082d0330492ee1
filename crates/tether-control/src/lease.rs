//! Lease acquisition, keep-alive and release.
//!
//! A [`LeaseManager`] claims the lease and hands out a [`LeaseHandle`] that
//! owns the background renewal task. Every mutating call in the crate takes
//! `&LeaseHandle` and checks [`LeaseHandle::ensure_valid`] first, so once the
//! keep-alive task gives up no further command reaches the actuator.
//!
//! # Renewal
//!
//! The task renews every `interval`, or at half the remaining lifetime when
//! the lease is shorter than that, so a renewal is always sent before the
//! deadline. After a transient failure it retries after `initial_retry`,
//! doubling on each consecutive failure up to `interval`, and never sleeps
//! past the lease's local deadline. A lease-terminal rejection, or reaching
//! the deadline after a failed renewal, marks the handle lost.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tether_core::{ClientName, Lease};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::ActuatorClient;
use crate::config::KeepAliveConfig;
use crate::error::{ControlError, Result};
use crate::wire::ErrorCode;

/// State of the keep-alive task as seen by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepAliveStatus {
    /// The lease is being renewed.
    Active,
    /// The lease can no longer be used.
    Lost(String),
}

#[derive(Debug)]
struct Shared {
    resource: String,
    lease: RwLock<Lease>,
    /// Local deadline derived from the last renewal.
    deadline: Mutex<Instant>,
    status: watch::Sender<KeepAliveStatus>,
}

impl Shared {
    fn remaining(&self) -> Duration {
        self.deadline
            .lock()
            .saturating_duration_since(Instant::now())
    }

    fn renewed(&self, lease: Lease) {
        *self.deadline.lock() = Instant::now() + lease.remaining();
        *self.lease.write() = lease;
    }

    fn mark_lost(&self, reason: &str) -> bool {
        let marked = self.status.send_if_modified(|status| {
            if *status == KeepAliveStatus::Active {
                *status = KeepAliveStatus::Lost(reason.to_string());
                true
            } else {
                false
            }
        });
        if marked {
            tracing::error!(resource = %self.resource, reason, "Lease lost");
        }
        marked
    }

    fn lost_error(&self) -> Option<ControlError> {
        match &*self.status.borrow() {
            KeepAliveStatus::Active => None,
            KeepAliveStatus::Lost(reason) => Some(ControlError::LeaseLost {
                resource: self.resource.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// A held lease with its keep-alive task.
///
/// Must be returned through [`LeaseManager::release`]. Dropping it aborts
/// the keep-alive task without releasing the lease, which then lapses at its
/// deadline.
#[derive(Debug)]
pub struct LeaseHandle {
    shared: Arc<Shared>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LeaseHandle {
    /// The leased resource.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.shared.resource
    }

    /// The most recently renewed lease.
    #[must_use]
    pub fn current(&self) -> Lease {
        self.shared.lease.read().clone()
    }

    /// Current keep-alive status.
    #[must_use]
    pub fn status(&self) -> KeepAliveStatus {
        self.shared.status.borrow().clone()
    }

    /// Returns true once the lease can no longer be used.
    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.shared.lost_error().is_some()
    }

    /// Return the current lease if it may still gate a mutating call.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::LeaseLost` if renewal failed or the local
    /// deadline passed.
    pub fn ensure_valid(&self) -> Result<Lease> {
        if let Some(err) = self.shared.lost_error() {
            return Err(err);
        }
        if self.shared.remaining().is_zero() {
            self.shared.mark_lost("lease deadline passed without renewal");
            return Err(ControlError::LeaseLost {
                resource: self.shared.resource.clone(),
                reason: "lease deadline passed without renewal".to_string(),
            });
        }
        Ok(self.current())
    }

    /// Resolves once the lease is lost.
    pub async fn lost(&self) -> ControlError {
        let mut rx = self.shared.status.subscribe();
        // The sender lives in `shared`, so this only ends on a status change.
        let _ = rx
            .wait_for(|status| matches!(status, KeepAliveStatus::Lost(_)))
            .await;
        self.shared
            .lost_error()
            .unwrap_or_else(|| ControlError::LeaseLost {
                resource: self.shared.resource.clone(),
                reason: "keep-alive stopped".to_string(),
            })
    }

    /// Turn a lease rejection from the actuator into `LeaseLost`, marking
    /// the handle lost. Other errors pass through unchanged.
    #[must_use]
    pub fn absorb(&self, err: ControlError) -> ControlError {
        if err.is_lease_rejection() {
            self.shared.mark_lost(&err.to_string());
            ControlError::LeaseLost {
                resource: self.shared.resource.clone(),
                reason: err.to_string(),
            }
        } else {
            err
        }
    }

    async fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(resource = %self.shared.resource, error = %e, "Keep-alive task failed");
            }
        }
    }
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::warn!(
                resource = %self.shared.resource,
                "Lease handle dropped without release; lease will lapse"
            );
        }
    }
}

/// Acquires, renews and releases the lease on one resource.
pub struct LeaseManager<C: ?Sized> {
    client: Arc<C>,
    resource: String,
    owner: ClientName,
    keep_alive: KeepAliveConfig,
}

impl<C: ActuatorClient + ?Sized + 'static> LeaseManager<C> {
    /// Create a lease manager.
    pub fn new(
        client: Arc<C>,
        resource: impl Into<String>,
        owner: ClientName,
        keep_alive: KeepAliveConfig,
    ) -> Self {
        Self {
            client,
            resource: resource.into(),
            owner,
            keep_alive,
        }
    }

    /// The resource this manager leases.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The identity leases are held under.
    #[must_use]
    pub const fn owner(&self) -> &ClientName {
        &self.owner
    }

    /// Claim the lease.
    ///
    /// When another client holds it, fails if `must_acquire` is set and
    /// otherwise takes the lease from them.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::LeaseUnavailable` if the lease cannot be
    /// obtained.
    pub async fn acquire(&self, must_acquire: bool) -> Result<Lease> {
        let unavailable = |e: ControlError| ControlError::LeaseUnavailable {
            resource: self.resource.clone(),
            reason: e.to_string(),
        };

        let lease = match self.client.acquire_lease(&self.resource, &self.owner).await {
            Ok(lease) => lease,
            Err(e) if e.rpc_code() == Some(ErrorCode::ResourceAlreadyClaimed) && !must_acquire => {
                tracing::warn!(
                    resource = %self.resource,
                    error = %e,
                    "Lease held by another client, taking it"
                );
                self.client
                    .take_lease(&self.resource, &self.owner)
                    .await
                    .map_err(unavailable)?
            }
            Err(e) => return Err(unavailable(e)),
        };

        tracing::info!(
            resource = %self.resource,
            owner = %self.owner,
            epoch = lease.epoch,
            "Acquired lease"
        );
        Ok(lease)
    }

    /// Start renewing `lease` in the background.
    #[must_use]
    pub fn start_keep_alive(&self, lease: Lease) -> LeaseHandle {
        let (status, _) = watch::channel(KeepAliveStatus::Active);
        let shared = Arc::new(Shared {
            resource: self.resource.clone(),
            deadline: Mutex::new(Instant::now() + lease.remaining()),
            lease: RwLock::new(lease),
            status,
        });
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(keep_alive(
            Arc::clone(&self.client),
            Arc::clone(&shared),
            self.keep_alive.clone(),
            stop_rx,
        ));

        LeaseHandle {
            shared,
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Stop renewing and give the lease back.
    ///
    /// A rejected release of a lease that was already lost is logged and
    /// treated as success: the actuator no longer considers us the holder.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::LeaseReleaseFailed` if a lease we still held
    /// could not be released.
    pub async fn release(&self, mut handle: LeaseHandle) -> Result<()> {
        handle.shutdown().await;
        let lease = handle.current();
        let was_lost = handle.is_lost();

        match self.client.release_lease(&lease).await {
            Ok(()) => {
                tracing::info!(resource = %self.resource, epoch = lease.epoch, "Released lease");
                Ok(())
            }
            Err(e) if was_lost => {
                tracing::warn!(
                    resource = %self.resource,
                    error = %e,
                    "Release of lost lease rejected"
                );
                Ok(())
            }
            Err(e) => Err(ControlError::LeaseReleaseFailed {
                resource: self.resource.clone(),
                source: Box::new(e),
            }),
        }
    }
}

async fn keep_alive<C: ActuatorClient + ?Sized>(
    client: Arc<C>,
    shared: Arc<Shared>,
    config: KeepAliveConfig,
    mut stop: oneshot::Receiver<()>,
) {
    let interval = config.interval();
    let mut retry = config.initial_retry();
    // Backoff delay while renewals are failing.
    let mut failing: Option<Duration> = None;

    loop {
        let remaining = shared.remaining();
        let wait = match failing {
            Some(delay) => delay.min(remaining),
            None => renew_ahead(interval, remaining),
        };
        tokio::select! {
            biased;
            _ = &mut stop => return,
            () = tokio::time::sleep(wait) => {}
        }

        if shared.remaining().is_zero() {
            shared.mark_lost("lease expired before it could be renewed");
            return;
        }

        let current = shared.lease.read().clone();
        match client.renew_lease(&current).await {
            Ok(renewed) => {
                tracing::trace!(resource = %shared.resource, epoch = renewed.epoch, "Renewed lease");
                shared.renewed(renewed);
                retry = config.initial_retry();
                failing = None;
            }
            Err(e)
                if e.is_lease_rejection()
                    || e.rpc_code() == Some(ErrorCode::ResourceAlreadyClaimed) =>
            {
                shared.mark_lost(&e.to_string());
                return;
            }
            Err(e) => {
                tracing::warn!(
                    resource = %shared.resource,
                    error = %e,
                    retry_in_ms = u64::try_from(retry.as_millis()).unwrap_or(u64::MAX),
                    "Lease renewal failed, retrying"
                );
                failing = Some(retry);
                retry = (retry * 2).min(interval);
            }
        }
    }
}

/// Wait before the next routine renewal: `interval`, but never more than
/// half of what is left of the lease.
fn renew_ahead(interval: Duration, remaining: Duration) -> Duration {
    interval.min(remaining / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockActuator, MockConfig};
    use crate::wire::RpcOp;

    fn owner(name: &str) -> ClientName {
        ClientName::new(name).unwrap()
    }

    fn manager(mock: &Arc<MockActuator>, name: &str) -> LeaseManager<MockActuator> {
        LeaseManager::new(
            Arc::clone(mock),
            "body",
            owner(name),
            KeepAliveConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn must_acquire_fails_when_held() {
        let mock = Arc::new(MockActuator::new());
        let first = manager(&mock, "a").acquire(true).await.unwrap();

        let err = manager(&mock, "b").acquire(true).await.unwrap_err();
        assert!(matches!(err, ControlError::LeaseUnavailable { .. }));
        assert_eq!(mock.holder("body"), Some((owner("a"), first.epoch)));
        assert_eq!(mock.count(RpcOp::TakeLease), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn optional_acquire_takes_when_held() {
        let mock = Arc::new(MockActuator::new());
        manager(&mock, "a").acquire(true).await.unwrap();

        let lease = manager(&mock, "b").acquire(false).await.unwrap();
        assert_eq!(lease.owner, owner("b"));
        assert_eq!(mock.count(RpcOp::TakeLease), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_outlives_ttl() {
        let mock = Arc::new(MockActuator::new());
        let leases = manager(&mock, "a");
        let lease = leases.acquire(true).await.unwrap();
        let handle = leases.start_keep_alive(lease.clone());

        tokio::time::sleep(mock.config().lease_ttl * 3).await;
        let current = handle.ensure_valid().unwrap();
        assert!(current.supersedes(&lease));
        assert!(mock.count(RpcOp::RenewLease) >= 10);

        leases.release(handle).await.unwrap();
        assert_eq!(mock.holder("body"), None);
        assert_eq!(mock.count(RpcOp::ReleaseLease), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn short_lease_is_renewed_before_its_deadline() {
        let mock = Arc::new(MockActuator::with_config(MockConfig {
            lease_ttl: Duration::from_secs(2),
            ..MockConfig::default()
        }));
        let leases = manager(&mock, "a");
        let handle = leases.start_keep_alive(leases.acquire(true).await.unwrap());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(handle.status(), KeepAliveStatus::Active);
        assert!(handle.ensure_valid().is_ok());
        // About every second: half of the 2s lifetime.
        assert!(mock.count(RpcOp::RenewLease) >= 3);
        assert!(mock.holder("body").is_some());

        leases.release(handle).await.unwrap();
    }

    #[test]
    fn renewal_waits_at_most_half_the_remaining_lifetime() {
        let interval = Duration::from_secs(2);
        assert_eq!(renew_ahead(interval, Duration::from_secs(10)), interval);
        assert_eq!(
            renew_ahead(interval, Duration::from_secs(2)),
            Duration::from_secs(1)
        );
        assert_eq!(
            renew_ahead(interval, Duration::from_millis(500)),
            Duration::from_millis(250)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn preemption_marks_handle_lost() {
        let mock = Arc::new(MockActuator::new());
        let leases = manager(&mock, "a");
        let handle = leases.start_keep_alive(leases.acquire(true).await.unwrap());

        mock.preempt("body", &owner("rival"));
        let err = tokio::time::timeout(Duration::from_secs(5), handle.lost())
            .await
            .unwrap();
        assert!(err.is_lease_loss());
        assert!(handle.ensure_valid().is_err());

        // Releasing a lost lease is still attempted, and its rejection is
        // not an error.
        leases.release(handle).await.unwrap();
        assert_eq!(mock.count(RpcOp::ReleaseLease), 1);
        assert_eq!(mock.holder("body").map(|(o, _)| o), Some(owner("rival")));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_recover() {
        let mock = Arc::new(MockActuator::new());
        let leases = manager(&mock, "a");
        let handle = leases.start_keep_alive(leases.acquire(true).await.unwrap());

        mock.fail_times(RpcOp::RenewLease, ErrorCode::InternalServerError, 3);
        // 2s interval, then retries after 1s, 2s and 2s (capped).
        tokio::time::sleep(Duration::from_millis(7500)).await;

        assert!(!handle.is_lost());
        assert_eq!(mock.count(RpcOp::RenewLease), 4);
        leases.release(handle).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_transient_failures_lose_lease_at_deadline() {
        let mock = Arc::new(MockActuator::new());
        let leases = manager(&mock, "a");
        let handle = leases.start_keep_alive(leases.acquire(true).await.unwrap());

        mock.fail_times(RpcOp::RenewLease, ErrorCode::InternalServerError, usize::MAX);
        let err = tokio::time::timeout(mock.config().lease_ttl * 2, handle.lost())
            .await
            .unwrap();
        assert!(err.to_string().contains("expired before it could be renewed"));
        leases.release(handle).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn absorb_marks_lost_on_lease_rejection() {
        let mock = Arc::new(MockActuator::new());
        let leases = manager(&mock, "a");
        let handle = leases.start_keep_alive(leases.acquire(true).await.unwrap());

        let other = handle.absorb(ControlError::rpc(RpcOp::Stand, ErrorCode::InvalidRequest, ""));
        assert!(matches!(other, ControlError::Rpc { .. }));
        assert!(!handle.is_lost());

        let lost = handle.absorb(ControlError::rpc(RpcOp::Stand, ErrorCode::LeaseStale, ""));
        assert!(lost.is_lease_loss());
        assert!(handle.is_lost());
        leases.release(handle).await.unwrap();
    }
}
