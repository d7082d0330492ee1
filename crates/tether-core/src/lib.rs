//! Core types and utilities for tether.
//!
//! This crate provides the foundational types shared by the controller, the
//! simulator and the command line:
//!
//! - **Identifiers**: validated names for lease owners and behaviors, and
//!   per-run session IDs
//! - **Domain types**: leases, power state, estop level, behaviors and their
//!   light/sound payloads, system parameters
//! - **Error types**: validation errors shared across crates
//!
//! # Example
//!
//! ```
//! use tether_core::{BehaviorName, ClientName, PowerState, SessionId};
//!
//! let owner = ClientName::new("scale-client").unwrap();
//! let behavior = BehaviorName::new("note_do").unwrap();
//! let session_id = SessionId::generate();
//!
//! assert!(!PowerState::Off.is_on());
//! assert_eq!(behavior.as_str(), "note_do");
//! # let _ = (owner, session_id);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod types;

pub use error::{CoreError, Result};
pub use ids::{BehaviorName, ClientName, IdError, SessionId};
pub use types::{
    AudioSequenceGroup, Behavior, BuzzerNote, Color, EstopLevel, Lease, LedSequenceGroup,
    LiveBehavior, Note, PowerState, SystemParams,
};
