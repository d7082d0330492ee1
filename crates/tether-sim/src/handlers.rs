//! HTTP handlers for the simulated actuator.
//!
//! Actuator endpoints always answer `200 OK` with an [`RpcResponse`]
//! envelope. Rejections travel in the response header, the way the real
//! endpoint reports them, so clients exercise the same error paths.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use tether_control::wire::{
    AcquireLeaseRequest, DeleteBehaviorsRequest, LeaseRequest, RegisterBehaviorRequest,
    RpcResponse, RunBehaviorRequest, SetPowerRequest, SetSystemParamsRequest,
};
use tether_control::{ActuatorClient, ControlError, ErrorCode, Result, RpcOp};
use tether_core::{BehaviorName, EstopLevel, Lease, LiveBehavior, PowerState, SystemParams};

use crate::state::SimState;

type Reply<T> = Json<RpcResponse<T>>;

fn reply<T>(op: RpcOp, result: Result<T>) -> Reply<T> {
    if let Err(e) = &result {
        tracing::warn!(op = %op, error = %e, "Request rejected");
    }
    Json(RpcResponse::from_result(result))
}

fn behavior_name(op: RpcOp, raw: String) -> Result<BehaviorName> {
    BehaviorName::new(raw)
        .map_err(|e| ControlError::rpc(op, ErrorCode::InvalidRequest, e.to_string()))
}

// ============================================================================
// Health
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
}

/// Health check handler.
///
/// ```text
/// GET /health
///
/// Response: 200 OK
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health() -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    };

    (StatusCode::OK, Json(response))
}

// ============================================================================
// Lease
// ============================================================================

/// POST /v1/lease/acquire
pub async fn acquire_lease(
    State(state): State<SimState>,
    Json(req): Json<AcquireLeaseRequest>,
) -> Reply<Lease> {
    let result = state.actuator.acquire_lease(&req.resource, &req.owner).await;
    if let Ok(lease) = &result {
        tracing::info!(owner = %lease.owner, epoch = lease.epoch, "Lease acquired");
    }
    reply(RpcOp::AcquireLease, result)
}

/// POST /v1/lease/take
pub async fn take_lease(
    State(state): State<SimState>,
    Json(req): Json<AcquireLeaseRequest>,
) -> Reply<Lease> {
    let result = state.actuator.take_lease(&req.resource, &req.owner).await;
    if let Ok(lease) = &result {
        tracing::info!(owner = %lease.owner, epoch = lease.epoch, "Lease taken");
    }
    reply(RpcOp::TakeLease, result)
}

/// POST /v1/lease/renew
pub async fn renew_lease(
    State(state): State<SimState>,
    Json(req): Json<LeaseRequest>,
) -> Reply<Lease> {
    reply(RpcOp::RenewLease, state.actuator.renew_lease(&req.lease).await)
}

/// POST /v1/lease/release
pub async fn release_lease(
    State(state): State<SimState>,
    Json(req): Json<LeaseRequest>,
) -> Reply<()> {
    let result = state.actuator.release_lease(&req.lease).await;
    if result.is_ok() {
        tracing::info!(owner = %req.lease.owner, "Lease released");
    }
    reply(RpcOp::ReleaseLease, result)
}

// ============================================================================
// Power and posture
// ============================================================================

/// GET /v1/estop
pub async fn estop_status(State(state): State<SimState>) -> Reply<EstopLevel> {
    reply(RpcOp::GetEstopStatus, state.actuator.estop_status().await)
}

/// POST /v1/power
pub async fn set_power(
    State(state): State<SimState>,
    Json(req): Json<SetPowerRequest>,
) -> Reply<()> {
    let result = state.actuator.set_power(&req.lease, req.command).await;
    if result.is_ok() {
        tracing::info!(command = ?req.command, "Power command accepted");
    }
    reply(RpcOp::SetPower, result)
}

/// GET /v1/power
pub async fn power_state(State(state): State<SimState>) -> Reply<PowerState> {
    reply(RpcOp::GetPowerState, state.actuator.power_state().await)
}

/// POST /v1/stand
pub async fn stand(State(state): State<SimState>, Json(req): Json<LeaseRequest>) -> Reply<()> {
    reply(RpcOp::Stand, state.actuator.stand(&req.lease).await)
}

// ============================================================================
// System parameters
// ============================================================================

/// GET /v1/system-params
pub async fn system_params(State(state): State<SimState>) -> Reply<SystemParams> {
    reply(RpcOp::GetSystemParams, state.actuator.system_params().await)
}

/// POST /v1/system-params
pub async fn set_system_params(
    State(state): State<SimState>,
    Json(req): Json<SetSystemParamsRequest>,
) -> Reply<()> {
    reply(
        RpcOp::SetSystemParams,
        state
            .actuator
            .set_system_params(&req.lease, &req.params)
            .await,
    )
}

// ============================================================================
// Behaviors
// ============================================================================

/// PUT /v1/behaviors/:name
pub async fn register_behavior(
    State(state): State<SimState>,
    Path(name): Path<String>,
    Json(req): Json<RegisterBehaviorRequest>,
) -> Reply<()> {
    let op = RpcOp::RegisterBehavior;
    let result = async {
        let name = behavior_name(op, name)?;
        state
            .actuator
            .register_behavior(&req.lease, &name, &req.behavior)
            .await
    }
    .await;
    reply(op, result)
}

/// POST /v1/behaviors/:name/run
pub async fn run_behavior(
    State(state): State<SimState>,
    Path(name): Path<String>,
    Json(req): Json<RunBehaviorRequest>,
) -> Reply<()> {
    let op = RpcOp::RunBehavior;
    let result = async {
        let name = behavior_name(op, name)?;
        state
            .actuator
            .run_behavior(&req.lease, &name, req.end_time, req.restart)
            .await
    }
    .await;
    reply(op, result)
}

/// DELETE /v1/behaviors
pub async fn delete_behaviors(
    State(state): State<SimState>,
    Json(req): Json<DeleteBehaviorsRequest>,
) -> Reply<()> {
    reply(
        RpcOp::DeleteBehaviors,
        state.actuator.delete_behaviors(&req.names).await,
    )
}

/// GET /v1/behaviors
pub async fn list_behaviors(State(state): State<SimState>) -> Reply<Vec<LiveBehavior>> {
    reply(RpcOp::ListBehaviors, state.actuator.list_behaviors().await)
}

// ============================================================================
// Simulator controls
// ============================================================================

/// Request to change the simulated emergency-stop level.
#[derive(Debug, Deserialize)]
pub struct EstopRequest {
    /// New level.
    pub level: EstopLevel,
}

/// Engage or clear the emergency stop.
///
/// POST /sim/estop
pub async fn set_estop(
    State(state): State<SimState>,
    Json(req): Json<EstopRequest>,
) -> StatusCode {
    state.actuator.set_estop(req.level);
    tracing::warn!(level = ?req.level, "Emergency stop level changed");
    StatusCode::NO_CONTENT
}

/// Operations received so far, in arrival order.
///
/// GET /sim/calls
pub async fn calls(State(state): State<SimState>) -> Json<Vec<RpcOp>> {
    Json(state.actuator.ops())
}
