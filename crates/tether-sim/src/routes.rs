//! Router configuration.

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::SimState;

/// Create the simulator router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Lease
/// - `POST /v1/lease/acquire` - Claim a free lease
/// - `POST /v1/lease/take` - Claim a lease, preempting the holder
/// - `POST /v1/lease/renew` - Extend a held lease
/// - `POST /v1/lease/release` - Give a lease back
///
/// ## Power and posture
/// - `GET /v1/estop` - Emergency-stop level
/// - `GET /v1/power` - Power state
/// - `POST /v1/power` - Power on or off
/// - `POST /v1/stand` - Stand up
///
/// ## System parameters
/// - `GET /v1/system-params` - Read parameters
/// - `POST /v1/system-params` - Update parameters
///
/// ## Behaviors
/// - `GET /v1/behaviors` - List behaviors
/// - `DELETE /v1/behaviors` - Delete behaviors named in the body
/// - `PUT /v1/behaviors/:name` - Register a behavior
/// - `POST /v1/behaviors/:name/run` - Run a behavior
///
/// ## Simulator controls
/// - `POST /sim/estop` - Change the emergency-stop level
/// - `GET /sim/calls` - Operations received so far
pub fn create_router(state: SimState) -> Router {
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = state.config.request_timeout();

    Router::new()
        // Health
        .route("/health", get(handlers::health))
        // Lease
        .route("/v1/lease/acquire", post(handlers::acquire_lease))
        .route("/v1/lease/take", post(handlers::take_lease))
        .route("/v1/lease/renew", post(handlers::renew_lease))
        .route("/v1/lease/release", post(handlers::release_lease))
        // Power and posture
        .route("/v1/estop", get(handlers::estop_status))
        .route(
            "/v1/power",
            get(handlers::power_state).post(handlers::set_power),
        )
        .route("/v1/stand", post(handlers::stand))
        // System parameters
        .route(
            "/v1/system-params",
            get(handlers::system_params).post(handlers::set_system_params),
        )
        // Behaviors
        .route(
            "/v1/behaviors",
            get(handlers::list_behaviors).delete(handlers::delete_behaviors),
        )
        .route("/v1/behaviors/:name", put(handlers::register_behavior))
        .route("/v1/behaviors/:name/run", post(handlers::run_behavior))
        // Simulator controls
        .route("/sim/estop", post(handlers::set_estop))
        .route("/sim/calls", get(handlers::calls))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
