//! Control sessions over HTTP against a running simulator.
//!
//! These run in real time with short transition delays, so the whole stack
//! is exercised: client, router, handlers and the simulated actuator.

use std::sync::Arc;
use std::time::Duration;

use tether_control::{
    ActuatorClient, BehaviorStep, ControlError, HttpActuatorClient, KeepAliveConfig, RpcOp,
    Session, SessionConfig,
};
use tether_core::{
    Behavior, BehaviorName, ClientName, Color, EstopLevel, LedSequenceGroup, PowerState,
};
use tether_sim::state::STATUS_LIGHTS;
use tether_sim::{create_router, SimConfig, SimState};

// =============================================================================
// Helpers
// =============================================================================

fn fast_sim() -> SimConfig {
    SimConfig {
        lease_ttl_secs: 2,
        power_on_delay_ms: 20,
        stand_delay_ms: 20,
        power_off_delay_ms: 20,
        ..SimConfig::default()
    }
}

async fn spawn_sim(config: SimConfig) -> (Arc<HttpActuatorClient>, SimState) {
    let state = SimState::from_config(config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = HttpActuatorClient::new(format!("http://{addr}")).unwrap();
    (Arc::new(client), state)
}

fn session_config(owner: &str) -> SessionConfig {
    SessionConfig {
        client_name: ClientName::new(owner).unwrap(),
        power_on_timeout_secs: 2,
        stand_timeout_secs: 2,
        power_off_timeout_secs: 2,
        poll_interval_ms: 20,
        keep_alive: KeepAliveConfig {
            interval_ms: 300,
            initial_retry_ms: 100,
        },
        ..SessionConfig::default()
    }
}

fn light(name: &str, color: Color) -> BehaviorStep {
    let behavior = Behavior::new(0).with_leds(LedSequenceGroup::solid(color));
    BehaviorStep::new(
        BehaviorName::new(name).unwrap(),
        behavior,
        Duration::from_millis(150),
    )
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn session_over_http_leaves_only_permanent_behaviors() {
    let (client, state) = spawn_sim(fast_sim()).await;
    let session = Session::new(Arc::clone(&client), session_config("e2e"));

    let steps = [
        light("e2e_red", Color::rgb(255, 0, 0)),
        light("e2e_blue", Color::rgb(0, 0, 255)),
    ];
    let summary = session.run(&steps).await.unwrap();

    // The seeded status lights sit at priority 0.
    assert_eq!(summary.priorities, vec![1, 1]);
    assert_eq!(client.power_state().await.unwrap(), PowerState::Off);
    assert_eq!(
        state.actuator.behavior_names(),
        vec![BehaviorName::new(STATUS_LIGHTS).unwrap()]
    );
    assert!(state.actuator.holder("body").is_none());

    let ops = state.actuator.ops();
    assert_eq!(ops.first(), Some(&RpcOp::GetEstopStatus));
    assert_eq!(ops.last(), Some(&RpcOp::ReleaseLease));
}

#[tokio::test(flavor = "multi_thread")]
async fn engaged_estop_refuses_session_over_http() {
    let (client, state) = spawn_sim(fast_sim()).await;
    state.actuator.set_estop(EstopLevel::SettleThenCut);

    let session = Session::new(client, session_config("e2e"));
    let err = session
        .run(&[light("e2e_red", Color::rgb(255, 0, 0))])
        .await
        .unwrap_err();

    assert!(matches!(err, ControlError::PreconditionFailed(_)));
    assert_eq!(state.actuator.ops(), vec![RpcOp::GetEstopStatus]);
}

#[tokio::test(flavor = "multi_thread")]
async fn held_lease_blocks_session_over_http() {
    let (client, state) = spawn_sim(fast_sim()).await;
    let holder = ClientName::new("holder").unwrap();
    client.acquire_lease("body", &holder).await.unwrap();

    let session = Session::new(Arc::clone(&client), session_config("e2e"));
    let err = session
        .run(&[light("e2e_red", Color::rgb(255, 0, 0))])
        .await
        .unwrap_err();

    assert!(matches!(err, ControlError::LeaseUnavailable { .. }));
    assert!(!state.actuator.ops().iter().any(RpcOp::is_mutating));
    assert_eq!(
        state.actuator.holder("body").map(|(owner, _)| owner),
        Some(holder)
    );
}
