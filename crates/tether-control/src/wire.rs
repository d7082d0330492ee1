//! Wire types for the actuator RPC endpoint.
//!
//! Every response carries a [`ResponseHeader`]; a non-`Ok` code is how the
//! actuator reports a rejected request. The HTTP status is only used for
//! transport-level failures.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_core::{Behavior, BehaviorName, ClientName, Lease, SystemParams};

use crate::error::{ControlError, Result};

/// The RPC operations exposed by the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcOp {
    /// Claim a free lease.
    AcquireLease,
    /// Claim a lease, preempting any current holder.
    TakeLease,
    /// Extend a held lease.
    RenewLease,
    /// Give a held lease back.
    ReleaseLease,
    /// Read the emergency-stop level.
    GetEstopStatus,
    /// Command motor power on or off.
    SetPower,
    /// Read the power/posture state.
    GetPowerState,
    /// Command the standing posture.
    Stand,
    /// Read audio/visual system parameters.
    GetSystemParams,
    /// Write audio/visual system parameters.
    SetSystemParams,
    /// Create or replace a named behavior.
    RegisterBehavior,
    /// Run a registered behavior until an end time.
    RunBehavior,
    /// Delete behaviors by name.
    DeleteBehaviors,
    /// List registered behaviors.
    ListBehaviors,
}

impl RpcOp {
    /// The operation's wire name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AcquireLease => "AcquireLease",
            Self::TakeLease => "TakeLease",
            Self::RenewLease => "RenewLease",
            Self::ReleaseLease => "ReleaseLease",
            Self::GetEstopStatus => "GetEstopStatus",
            Self::SetPower => "SetPower",
            Self::GetPowerState => "GetPowerState",
            Self::Stand => "Stand",
            Self::GetSystemParams => "GetSystemParams",
            Self::SetSystemParams => "SetSystemParams",
            Self::RegisterBehavior => "RegisterBehavior",
            Self::RunBehavior => "RunBehavior",
            Self::DeleteBehaviors => "DeleteBehaviors",
            Self::ListBehaviors => "ListBehaviors",
        }
    }

    /// Returns true for operations that change actuator state.
    ///
    /// Lease bookkeeping calls mutate the ownership record, not the actuator,
    /// and are not included.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::SetPower
                | Self::Stand
                | Self::SetSystemParams
                | Self::RegisterBehavior
                | Self::RunBehavior
                | Self::DeleteBehaviors
        )
    }
}

impl fmt::Display for RpcOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured status code carried in every response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Success.
    #[default]
    Ok,
    /// The request was malformed or not allowed in the current state.
    InvalidRequest,
    /// The actuator failed internally.
    InternalServerError,
    /// Another client holds a valid lease on the resource.
    ResourceAlreadyClaimed,
    /// The presented lease has been superseded by a newer holder.
    LeaseStale,
    /// The presented lease passed its deadline.
    LeaseExpired,
    /// The presenter does not hold the lease.
    NotLeaseHolder,
    /// The emergency stop is engaged.
    Estopped,
    /// The named behavior is not registered.
    DoesNotExist,
    /// The requested end time already passed.
    Expired,
    /// The behavior belongs to the actuator and cannot be changed.
    PermanentBehavior,
    /// The behavior definition was rejected.
    InvalidBehavior,
}

impl ErrorCode {
    /// Returns true for codes meaning the caller no longer holds its lease.
    #[must_use]
    pub const fn is_lease_terminal(&self) -> bool {
        matches!(
            self,
            Self::LeaseStale | Self::LeaseExpired | Self::NotLeaseHolder
        )
    }

    /// Returns true for codes worth retrying unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::InternalServerError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::InvalidRequest => "invalid_request",
            Self::InternalServerError => "internal_server_error",
            Self::ResourceAlreadyClaimed => "resource_already_claimed",
            Self::LeaseStale => "lease_stale",
            Self::LeaseExpired => "lease_expired",
            Self::NotLeaseHolder => "not_lease_holder",
            Self::Estopped => "estopped",
            Self::DoesNotExist => "does_not_exist",
            Self::Expired => "expired",
            Self::PermanentBehavior => "permanent_behavior",
            Self::InvalidBehavior => "invalid_behavior",
        };
        f.write_str(s)
    }
}

/// Status header present on every response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResponseHeader {
    /// Outcome of the request.
    pub code: ErrorCode,
    /// Human-readable detail for non-`Ok` codes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ResponseHeader {
    /// A success header.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// An error header.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Build the header an actuator would send for a failed call.
    #[must_use]
    pub fn from_error(err: &ControlError) -> Self {
        match err {
            ControlError::Rpc { code, message, .. } => Self::error(*code, message.clone()),
            ControlError::Core(e) => Self::error(ErrorCode::InvalidRequest, e.to_string()),
            other => Self::error(ErrorCode::InternalServerError, other.to_string()),
        }
    }

    /// Returns true if the header reports success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == ErrorCode::Ok
    }
}

/// Response envelope: a header plus an optional payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse<T> {
    /// Status header.
    pub header: ResponseHeader,
    /// Payload, present on success for operations that return data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<T>,
}

impl<T> RpcResponse<T> {
    /// A successful response with a payload.
    #[must_use]
    pub fn ok(body: T) -> Self {
        Self {
            header: ResponseHeader::ok(),
            body: Some(body),
        }
    }

    /// A failed response.
    #[must_use]
    pub fn error(header: ResponseHeader) -> Self {
        Self { header, body: None }
    }

    /// Wrap a call result the way the actuator reports it.
    #[must_use]
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(body) => Self::ok(body),
            Err(e) => Self::error(ResponseHeader::from_error(&e)),
        }
    }

    /// Interpret the header, yielding the payload if any.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Rpc` when the header carries a non-`Ok` code.
    pub fn into_result(self, op: RpcOp) -> Result<Option<T>> {
        if self.header.is_ok() {
            Ok(self.body)
        } else {
            Err(ControlError::Rpc {
                op,
                code: self.header.code,
                message: self.header.message,
            })
        }
    }

    /// Interpret the header and require a payload.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Rpc` for a non-`Ok` header and
    /// `ControlError::Internal` when a successful response has no payload.
    pub fn into_body(self, op: RpcOp) -> Result<T> {
        self.into_result(op)?
            .ok_or_else(|| ControlError::Internal(format!("{op} response carried no body")))
    }
}

/// Request body for `AcquireLease` and `TakeLease`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireLeaseRequest {
    /// Resource to claim.
    pub resource: String,
    /// Identity to claim it under.
    pub owner: ClientName,
}

/// Request body carrying only a lease (`RenewLease`, `ReleaseLease`, `Stand`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRequest {
    /// The lease being presented.
    pub lease: Lease,
}

/// Commanded power change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PowerCommand {
    /// Power the motors on.
    On,
    /// Power the motors off.
    Off {
        /// Cut power without settling first.
        cut_immediately: bool,
    },
}

/// Request body for `SetPower`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPowerRequest {
    /// The lease authorizing the change.
    pub lease: Lease,
    /// What to do.
    pub command: PowerCommand,
}

/// Request body for `SetSystemParams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSystemParamsRequest {
    /// The lease authorizing the change.
    pub lease: Lease,
    /// Fields to change; unset fields keep their value.
    pub params: SystemParams,
}

/// Request body for `RegisterBehavior`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterBehaviorRequest {
    /// The lease authorizing the change.
    pub lease: Lease,
    /// The definition stored under the path name.
    pub behavior: Behavior,
}

/// Request body for `RunBehavior`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunBehaviorRequest {
    /// The lease authorizing the run.
    pub lease: Lease,
    /// When the behavior stops.
    pub end_time: DateTime<Utc>,
    /// Restart from the beginning if already running.
    #[serde(default)]
    pub restart: bool,
}

/// Request body for `DeleteBehaviors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteBehaviorsRequest {
    /// Behaviors to delete.
    pub names: Vec<BehaviorName>,
}
