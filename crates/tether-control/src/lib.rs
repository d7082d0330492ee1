//! Lease-guarded control of a shared actuator.
//!
//! This crate sequences requests to an actuator that many clients may
//! compete for. A session claims an exclusive, time-bounded lease, keeps it
//! alive in the background, powers the actuator on and stands it up, runs
//! timed light/sound behaviors, and always tears down in reverse order.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Session                            │
//! │  ┌─────────────┐ ┌─────────────────┐ ┌──────────────────┐   │
//! │  │   Lease     │ │  Power/Posture  │ │    Behavior      │   │
//! │  │   Manager   │ │  Controller     │ │    Manager       │   │
//! │  └─────────────┘ └─────────────────┘ └──────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                     ┌─────────────────┐
//!                     │  ActuatorClient │
//!                     │  (HTTP / mock)  │
//!                     └─────────────────┘
//! ```
//!
//! Every mutating call takes a [`LeaseHandle`]. The handle refuses to hand
//! out its lease once the keep-alive task has given up, so nothing reaches
//! the actuator after the lease is lost.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tether_control::{BehaviorStep, HttpActuatorClient, Session, SessionConfig};
//! use tether_core::{Behavior, BehaviorName, Color, LedSequenceGroup};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(HttpActuatorClient::new("http://spot.local:8080")?);
//! let session = Session::new(client, SessionConfig::default());
//!
//! let red = Behavior::new(0).with_leds(LedSequenceGroup::solid(Color::rgb(255, 0, 0)));
//! let step = BehaviorStep::new(BehaviorName::new("red")?, red, Duration::from_secs(5));
//!
//! let summary = session.run(&[step]).await?;
//! println!("session {} done", summary.session_id);
//! # Ok(())
//! # }
//! ```
//!
//! # Power State Machine
//!
//! - `Off` → `On`
//! - `On` → `Standing` or `Off`
//! - `Standing` → `Off`
//!
//! See the [`lifecycle`] module for transition validation helpers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod behavior;
pub mod client;
pub mod config;
pub mod error;
pub mod lease;
pub mod lifecycle;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod power;
pub mod session;
pub mod wire;

pub use behavior::{next_priority, BehaviorManager, BehaviorStep, Priority};
pub use client::{ActuatorClient, HttpActuatorClient};
pub use config::{KeepAliveConfig, SessionConfig};
pub use error::{ControlError, Result};
pub use lease::{KeepAliveStatus, LeaseHandle, LeaseManager};
pub use power::PowerController;
pub use session::{Session, SessionSummary};
pub use wire::{ErrorCode, PowerCommand, RpcOp};

// Re-export commonly used types from dependencies for convenience
pub use tether_core::{ClientName, Lease, PowerState, SessionId};
