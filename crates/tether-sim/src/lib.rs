//! HTTP simulator of a leased actuator endpoint.
//!
//! Serves the same routes [`tether_control::HttpActuatorClient`] talks to,
//! backed by an in-memory actuator. Leases lapse, power transitions take
//! time and permanent behaviors refuse deletion, so a control session can be
//! exercised end to end without hardware.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   HTTP/JSON   ┌─────────────────────────────┐
//! │  HttpActuatorClient  │ ────────────▶ │         tether-sim          │
//! │  (tether-control)    │               │  Router ─▶ Handlers         │
//! └──────────────────────┘               │              │              │
//!                                        │              ▼              │
//!                                        │        MockActuator         │
//!                                        └─────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tether_sim::{create_router, SimConfig, SimState};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SimConfig::from_env();
//! let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
//! let app = create_router(SimState::from_config(config));
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::SimConfig;
pub use routes::create_router;
pub use state::SimState;
