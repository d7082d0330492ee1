//! Reading and updating audio/visual system parameters.
//!
//! Reading needs no lease. Updating holds the lease only for the one
//! `SetSystemParams` call and gives it back whatever the outcome.

use std::sync::Arc;

use anyhow::{Context, Result};
use tether_control::{ActuatorClient, BehaviorManager, LeaseManager, SessionConfig};
use tether_core::SystemParams;

/// Returns true if `params` sets at least one field.
#[must_use]
pub const fn is_update(params: &SystemParams) -> bool {
    params.enabled.is_some()
        || params.max_brightness.is_some()
        || params.buzzer_max_volume.is_some()
}

/// Apply `change` under a short-lived lease and return the resulting values.
pub async fn update<C>(
    client: Arc<C>,
    config: &SessionConfig,
    change: &SystemParams,
) -> Result<SystemParams>
where
    C: ActuatorClient + ?Sized + 'static,
{
    change.validate()?;

    let leases = LeaseManager::new(
        Arc::clone(&client),
        config.resource.clone(),
        config.client_name.clone(),
        config.keep_alive.clone(),
    );
    let behaviors = BehaviorManager::new(Arc::clone(&client));

    let lease = leases.acquire(config.must_acquire).await?;
    let handle = leases.start_keep_alive(lease);
    let applied = behaviors.apply_system_params(&handle, change).await;
    let released = leases.release(handle).await;

    applied.context("could not apply system params")?;
    released.context("could not release lease")?;

    let current = client.system_params().await?;
    Ok(current)
}
