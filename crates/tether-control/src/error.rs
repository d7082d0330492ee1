//! Error types for the controller.
//!
//! The variants mirror how a control session can fail: before the lease is
//! touched, while acquiring or keeping it, while moving the actuator through
//! its power states, and while driving behaviors.

use tether_core::{BehaviorName, CoreError, PowerState};
use thiserror::Error;

use crate::wire::{ErrorCode, RpcOp};

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

fn join_names(names: &[BehaviorName]) -> String {
    names
        .iter()
        .map(BehaviorName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that can occur during a control session.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A safety interlock refused the session before any mutation.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Another client holds a valid lease and exclusivity was required.
    #[error("lease on {resource} unavailable: {reason}")]
    LeaseUnavailable {
        /// The contested resource.
        resource: String,
        /// What the actuator reported.
        reason: String,
    },

    /// The lease could not be kept mid-session.
    #[error("lease on {resource} lost: {reason}")]
    LeaseLost {
        /// The resource whose lease was lost.
        resource: String,
        /// Why renewal or validation failed.
        reason: String,
    },

    /// Returning the lease failed.
    #[error("failed to release lease on {resource}: {source}")]
    LeaseReleaseFailed {
        /// The resource being released.
        resource: String,
        /// The underlying failure.
        #[source]
        source: Box<ControlError>,
    },

    /// Power-on was not verified within its timeout.
    #[error("power on failed (observed {observed}): {reason}")]
    PowerOnFailed {
        /// Last observed power state.
        observed: PowerState,
        /// What went wrong.
        reason: String,
    },

    /// Standing was not verified within its timeout.
    #[error("stand failed (observed {observed}): {reason}")]
    StandFailed {
        /// Last observed power state.
        observed: PowerState,
        /// What went wrong.
        reason: String,
    },

    /// Power-off was not verified within its timeout.
    #[error("power off failed (observed {observed}): {reason}")]
    PowerOffFailed {
        /// Last observed power state.
        observed: PowerState,
        /// What went wrong.
        reason: String,
    },

    /// The requested power transition is not an edge of the state machine.
    #[error("invalid power transition: cannot go from {from} to {to}")]
    InvalidTransition {
        /// The current state.
        from: PowerState,
        /// The requested target state.
        to: PowerState,
    },

    /// A behavior could not be registered.
    #[error("failed to register behavior {name}: {source}")]
    RegistrationFailed {
        /// The behavior name.
        name: BehaviorName,
        /// The underlying failure.
        #[source]
        source: Box<ControlError>,
    },

    /// A registered behavior could not be run.
    #[error("failed to run behavior {name}: {source}")]
    RunFailed {
        /// The behavior name.
        name: BehaviorName,
        /// The underlying failure.
        #[source]
        source: Box<ControlError>,
    },

    /// Behaviors could not be deleted.
    #[error("failed to delete behaviors [{}]: {source}", join_names(.names))]
    DeletionFailed {
        /// The behaviors that were being deleted.
        names: Vec<BehaviorName>,
        /// The underlying failure.
        #[source]
        source: Box<ControlError>,
    },

    /// The actuator answered with a non-`Ok` status header.
    #[error("{op} rejected ({code}): {message}")]
    Rpc {
        /// The operation that was rejected.
        op: RpcOp,
        /// Structured status code.
        code: ErrorCode,
        /// Detail from the actuator.
        message: String,
    },

    /// The request never produced a status header.
    #[error("{op} transport error: {message}")]
    Transport {
        /// The operation being attempted.
        op: RpcOp,
        /// Transport failure detail.
        message: String,
    },

    /// The session was cancelled before it completed.
    #[error("session cancelled")]
    Cancelled,

    /// Invalid input.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Shorthand for a rejected call.
    #[must_use]
    pub fn rpc(op: RpcOp, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Rpc {
            op,
            code,
            message: message.into(),
        }
    }

    /// The status code when this is a rejected call.
    #[must_use]
    pub const fn rpc_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the actuator rejected a call because our lease is
    /// no longer the current one.
    #[must_use]
    pub fn is_lease_rejection(&self) -> bool {
        self.rpc_code().is_some_and(|code| code.is_lease_terminal())
    }

    /// Returns true if this error means the session lost its lease.
    #[must_use]
    pub const fn is_lease_loss(&self) -> bool {
        matches!(self, Self::LeaseLost { .. })
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Rpc { code, .. } => code.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> BehaviorName {
        BehaviorName::new(s).unwrap()
    }

    #[test]
    fn retriable_errors() {
        assert!(ControlError::Transport {
            op: RpcOp::RenewLease,
            message: "connection reset".into(),
        }
        .is_retriable());
        assert!(
            ControlError::rpc(RpcOp::RenewLease, ErrorCode::InternalServerError, "boom")
                .is_retriable()
        );
        assert!(!ControlError::rpc(RpcOp::RenewLease, ErrorCode::LeaseStale, "").is_retriable());
        assert!(!ControlError::Cancelled.is_retriable());
    }

    #[test]
    fn lease_rejection_detection() {
        assert!(ControlError::rpc(RpcOp::SetPower, ErrorCode::LeaseStale, "").is_lease_rejection());
        assert!(
            !ControlError::rpc(RpcOp::SetPower, ErrorCode::Estopped, "").is_lease_rejection()
        );
        assert!(ControlError::LeaseLost {
            resource: "body".into(),
            reason: "preempted".into(),
        }
        .is_lease_loss());
    }

    #[test]
    fn deletion_failed_message_lists_names() {
        let err = ControlError::DeletionFailed {
            names: vec![name("note_do"), name("note_re")],
            source: Box::new(ControlError::rpc(
                RpcOp::DeleteBehaviors,
                ErrorCode::PermanentBehavior,
                "cannot delete",
            )),
        };
        let msg = err.to_string();
        assert!(msg.contains("note_do, note_re"), "{msg}");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn run_failed_keeps_cause() {
        let err = ControlError::RunFailed {
            name: name("a"),
            source: Box::new(ControlError::rpc(
                RpcOp::RunBehavior,
                ErrorCode::Expired,
                "end time in the past",
            )),
        };
        assert!(err.to_string().starts_with("failed to run behavior a"));
    }
}
