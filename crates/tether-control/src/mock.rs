//! In-memory actuator for tests and local simulation.
//!
//! [`MockActuator`] keeps lease, power and behavior state behind a mutex and
//! answers calls the way a real actuator would, including lease epochs,
//! delayed power transitions and permanent behaviors. Every call is recorded
//! so tests can assert on the exact sequence of operations.
//!
//! Timing uses `tokio::time`, so tests running with paused time control how
//! long power transitions take and when leases lapse.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tether_core::{
    Behavior, BehaviorName, ClientName, EstopLevel, Lease, LiveBehavior, PowerState, SystemParams,
};
use tokio::time::Instant;

use crate::client::ActuatorClient;
use crate::error::{ControlError, Result};
use crate::wire::{ErrorCode, PowerCommand, RpcOp};

/// Timing knobs for the mock actuator.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// How long a lease stays valid after acquire, take or renew.
    pub lease_ttl: Duration,
    /// Time from an accepted power-on command to `On`.
    pub power_on_delay: Duration,
    /// Time from an accepted stand command to `Standing`.
    pub stand_delay: Duration,
    /// Time from an accepted graceful power-off command to `Off`.
    pub power_off_delay: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(10),
            power_on_delay: Duration::from_millis(500),
            stand_delay: Duration::from_millis(500),
            power_off_delay: Duration::from_millis(500),
        }
    }
}

/// A call received by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// `AcquireLease`.
    AcquireLease {
        /// Requesting identity.
        owner: ClientName,
    },
    /// `TakeLease`.
    TakeLease {
        /// Requesting identity.
        owner: ClientName,
    },
    /// `RenewLease`.
    RenewLease {
        /// Presenting identity.
        owner: ClientName,
        /// Epoch presented.
        epoch: u64,
    },
    /// `ReleaseLease`.
    ReleaseLease {
        /// Presenting identity.
        owner: ClientName,
        /// Epoch presented.
        epoch: u64,
    },
    /// `GetEstopStatus`.
    GetEstopStatus,
    /// `SetPower`.
    SetPower(PowerCommand),
    /// `GetPowerState`.
    GetPowerState,
    /// `Stand`.
    Stand,
    /// `GetSystemParams`.
    GetSystemParams,
    /// `SetSystemParams`.
    SetSystemParams(SystemParams),
    /// `RegisterBehavior`.
    RegisterBehavior {
        /// Behavior name.
        name: BehaviorName,
        /// Priority in the definition.
        priority: i32,
    },
    /// `RunBehavior`.
    RunBehavior {
        /// Behavior name.
        name: BehaviorName,
    },
    /// `DeleteBehaviors`.
    DeleteBehaviors {
        /// Names in the request.
        names: Vec<BehaviorName>,
    },
    /// `ListBehaviors`.
    ListBehaviors,
}

impl Call {
    /// The operation this call invoked.
    #[must_use]
    pub const fn op(&self) -> RpcOp {
        match self {
            Self::AcquireLease { .. } => RpcOp::AcquireLease,
            Self::TakeLease { .. } => RpcOp::TakeLease,
            Self::RenewLease { .. } => RpcOp::RenewLease,
            Self::ReleaseLease { .. } => RpcOp::ReleaseLease,
            Self::GetEstopStatus => RpcOp::GetEstopStatus,
            Self::SetPower(_) => RpcOp::SetPower,
            Self::GetPowerState => RpcOp::GetPowerState,
            Self::Stand => RpcOp::Stand,
            Self::GetSystemParams => RpcOp::GetSystemParams,
            Self::SetSystemParams(_) => RpcOp::SetSystemParams,
            Self::RegisterBehavior { .. } => RpcOp::RegisterBehavior,
            Self::RunBehavior { .. } => RpcOp::RunBehavior,
            Self::DeleteBehaviors { .. } => RpcOp::DeleteBehaviors,
            Self::ListBehaviors => RpcOp::ListBehaviors,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FaultKind {
    Rpc(ErrorCode),
    Transport,
}

#[derive(Debug)]
struct Fault {
    op: RpcOp,
    kind: FaultKind,
    remaining: usize,
}

#[derive(Debug)]
struct LeaseRecord {
    owner: ClientName,
    /// Epoch issued by the acquire or take that created this record. Older
    /// epochs belong to a previous holder.
    base_epoch: u64,
    epoch: u64,
    deadline: Instant,
}

#[derive(Debug, Clone, Copy)]
struct PendingPower {
    target: PowerState,
    ready_at: Instant,
}

#[derive(Debug)]
struct StoredBehavior {
    behavior: Behavior,
    permanent: bool,
}

#[derive(Debug, Default)]
struct State {
    leases: HashMap<String, LeaseRecord>,
    epochs: HashMap<String, u64>,
    estop: EstopLevel,
    power: PowerState,
    pending: Option<PendingPower>,
    power_stalled: bool,
    params: SystemParams,
    behaviors: BTreeMap<BehaviorName, StoredBehavior>,
    faults: Vec<Fault>,
    latency: HashMap<RpcOp, Duration>,
    calls: Vec<Call>,
}

impl State {
    fn next_epoch(&mut self, resource: &str) -> u64 {
        let epoch = self.epochs.entry(resource.to_string()).or_insert(0);
        *epoch += 1;
        *epoch
    }

    fn settle_power(&mut self, now: Instant) -> PowerState {
        if let Some(pending) = self.pending {
            if !self.power_stalled && now >= pending.ready_at {
                self.power = pending.target;
                self.pending = None;
            }
        }
        self.power
    }

    fn take_fault(&mut self, op: RpcOp) -> Option<ControlError> {
        let idx = self.faults.iter().position(|f| f.op == op)?;
        let fault = &mut self.faults[idx];
        let kind = fault.kind;
        fault.remaining -= 1;
        if fault.remaining == 0 {
            self.faults.remove(idx);
        }
        Some(match kind {
            FaultKind::Rpc(code) => ControlError::rpc(op, code, "injected fault"),
            FaultKind::Transport => ControlError::Transport {
                op,
                message: "injected transport fault".into(),
            },
        })
    }

    fn check_lease(&self, op: RpcOp, lease: &Lease, now: Instant) -> Result<&LeaseRecord> {
        let Some(record) = self.leases.get(&lease.resource) else {
            return Err(ControlError::rpc(
                op,
                ErrorCode::NotLeaseHolder,
                format!("no lease held on {}", lease.resource),
            ));
        };
        if lease.epoch < record.base_epoch {
            return Err(ControlError::rpc(
                op,
                ErrorCode::LeaseStale,
                format!(
                    "lease epoch {} superseded by {} (held by {})",
                    lease.epoch, record.base_epoch, record.owner
                ),
            ));
        }
        if lease.owner != record.owner || lease.epoch > record.epoch {
            return Err(ControlError::rpc(
                op,
                ErrorCode::NotLeaseHolder,
                format!("{} does not hold {}", lease.owner, lease.resource),
            ));
        }
        if now >= record.deadline {
            return Err(ControlError::rpc(
                op,
                ErrorCode::LeaseExpired,
                format!("lease on {} expired", lease.resource),
            ));
        }
        Ok(record)
    }
}

/// In-memory actuator implementing [`ActuatorClient`].
#[derive(Debug, Default)]
pub struct MockActuator {
    config: MockConfig,
    state: Mutex<State>,
}

impl MockActuator {
    /// Create a mock actuator with default timing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock actuator with custom timing.
    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config,
            state: Mutex::default(),
        }
    }

    /// The timing configuration.
    #[must_use]
    pub const fn config(&self) -> &MockConfig {
        &self.config
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// The operation of every call received so far.
    #[must_use]
    pub fn ops(&self) -> Vec<RpcOp> {
        self.state.lock().calls.iter().map(Call::op).collect()
    }

    /// How many times `op` was called.
    #[must_use]
    pub fn count(&self, op: RpcOp) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.op() == op)
            .count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Make the next call to `op` fail with `code`.
    pub fn fail_next(&self, op: RpcOp, code: ErrorCode) {
        self.fail_times(op, code, 1);
    }

    /// Make the next `times` calls to `op` fail with `code`.
    pub fn fail_times(&self, op: RpcOp, code: ErrorCode, times: usize) {
        if times > 0 {
            self.state.lock().faults.push(Fault {
                op,
                kind: FaultKind::Rpc(code),
                remaining: times,
            });
        }
    }

    /// Make the next call to `op` fail without a response header.
    pub fn fail_next_transport(&self, op: RpcOp) {
        self.state.lock().faults.push(Fault {
            op,
            kind: FaultKind::Transport,
            remaining: 1,
        });
    }

    /// Hold every call to `op` for `delay` before the actuator sees it, like
    /// a slow network. A caller dropped in that window never reaches the
    /// actuator and is not recorded.
    pub fn set_latency(&self, op: RpcOp, delay: Duration) {
        self.state.lock().latency.insert(op, delay);
    }

    /// Set the emergency-stop level. Any level other than `None` cuts power.
    pub fn set_estop(&self, level: EstopLevel) {
        let mut state = self.state.lock();
        state.estop = level;
        if level != EstopLevel::None {
            state.power = PowerState::Off;
            state.pending = None;
        }
    }

    /// Force the power state, dropping any pending transition.
    pub fn set_power_state(&self, power: PowerState) {
        let mut state = self.state.lock();
        state.power = power;
        state.pending = None;
    }

    /// While stalled, power and stand commands are accepted but never
    /// converge.
    pub fn stall_power(&self, stalled: bool) {
        self.state.lock().power_stalled = stalled;
    }

    /// Register a behavior directly, bypassing the lease.
    pub fn add_behavior(&self, name: BehaviorName, behavior: Behavior, permanent: bool) {
        self.state.lock().behaviors.insert(
            name,
            StoredBehavior {
                behavior,
                permanent,
            },
        );
    }

    /// Returns true if a behavior with this name is registered.
    #[must_use]
    pub fn has_behavior(&self, name: &BehaviorName) -> bool {
        self.state.lock().behaviors.contains_key(name)
    }

    /// Names of all registered behaviors.
    #[must_use]
    pub fn behavior_names(&self) -> Vec<BehaviorName> {
        self.state.lock().behaviors.keys().cloned().collect()
    }

    /// Current system parameters.
    #[must_use]
    pub fn current_params(&self) -> SystemParams {
        self.state.lock().params
    }

    /// Current holder and epoch of `resource`, if leased and not expired.
    #[must_use]
    pub fn holder(&self, resource: &str) -> Option<(ClientName, u64)> {
        let state = self.state.lock();
        let now = Instant::now();
        state
            .leases
            .get(resource)
            .filter(|r| now < r.deadline)
            .map(|r| (r.owner.clone(), r.epoch))
    }

    /// Make the current lease on `resource` lapse immediately.
    pub fn expire_lease(&self, resource: &str) {
        if let Some(record) = self.state.lock().leases.get_mut(resource) {
            record.deadline = Instant::now();
        }
    }

    /// Hand `resource` to `owner` as if another client took it.
    pub fn preempt(&self, resource: &str, owner: &ClientName) -> Lease {
        let mut state = self.state.lock();
        self.grant(&mut state, resource, owner)
    }

    fn grant(&self, state: &mut State, resource: &str, owner: &ClientName) -> Lease {
        let epoch = state.next_epoch(resource);
        state.leases.insert(
            resource.to_string(),
            LeaseRecord {
                owner: owner.clone(),
                base_epoch: epoch,
                epoch,
                deadline: Instant::now() + self.config.lease_ttl,
            },
        );
        self.lease_for(resource, owner, epoch)
    }

    fn lease_for(&self, resource: &str, owner: &ClientName, epoch: u64) -> Lease {
        let ttl = chrono::Duration::from_std(self.config.lease_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));
        Lease {
            resource: resource.to_string(),
            owner: owner.clone(),
            epoch,
            expires_at: Utc::now() + ttl,
        }
    }

    async fn lag(&self, op: RpcOp) {
        let delay = self.state.lock().latency.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Record the call and apply any injected fault for it.
    fn begin(state: &mut State, call: Call) -> Result<()> {
        let op = call.op();
        state.calls.push(call);
        state.take_fault(op).map_or(Ok(()), Err)
    }
}

#[async_trait]
impl ActuatorClient for MockActuator {
    async fn acquire_lease(&self, resource: &str, owner: &ClientName) -> Result<Lease> {
        self.lag(RpcOp::AcquireLease).await;
        let mut state = self.state.lock();
        Self::begin(
            &mut state,
            Call::AcquireLease {
                owner: owner.clone(),
            },
        )?;

        let now = Instant::now();
        if let Some(record) = state.leases.get(resource).filter(|r| now < r.deadline) {
            return Err(ControlError::rpc(
                RpcOp::AcquireLease,
                ErrorCode::ResourceAlreadyClaimed,
                format!("{resource} is held by {}", record.owner),
            ));
        }
        Ok(self.grant(&mut state, resource, owner))
    }

    async fn take_lease(&self, resource: &str, owner: &ClientName) -> Result<Lease> {
        self.lag(RpcOp::TakeLease).await;
        let mut state = self.state.lock();
        Self::begin(
            &mut state,
            Call::TakeLease {
                owner: owner.clone(),
            },
        )?;
        Ok(self.grant(&mut state, resource, owner))
    }

    async fn renew_lease(&self, lease: &Lease) -> Result<Lease> {
        self.lag(RpcOp::RenewLease).await;
        let mut state = self.state.lock();
        Self::begin(
            &mut state,
            Call::RenewLease {
                owner: lease.owner.clone(),
                epoch: lease.epoch,
            },
        )?;

        let now = Instant::now();
        state.check_lease(RpcOp::RenewLease, lease, now)?;
        let epoch = state.next_epoch(&lease.resource);
        if let Some(record) = state.leases.get_mut(&lease.resource) {
            record.epoch = epoch;
            record.deadline = now + self.config.lease_ttl;
        }
        Ok(self.lease_for(&lease.resource, &lease.owner, epoch))
    }

    async fn release_lease(&self, lease: &Lease) -> Result<()> {
        self.lag(RpcOp::ReleaseLease).await;
        let mut state = self.state.lock();
        Self::begin(
            &mut state,
            Call::ReleaseLease {
                owner: lease.owner.clone(),
                epoch: lease.epoch,
            },
        )?;

        state.check_lease(RpcOp::ReleaseLease, lease, Instant::now())?;
        state.leases.remove(&lease.resource);
        Ok(())
    }

    async fn estop_status(&self) -> Result<EstopLevel> {
        self.lag(RpcOp::GetEstopStatus).await;
        let mut state = self.state.lock();
        Self::begin(&mut state, Call::GetEstopStatus)?;
        Ok(state.estop)
    }

    async fn set_power(&self, lease: &Lease, command: PowerCommand) -> Result<()> {
        self.lag(RpcOp::SetPower).await;
        let mut state = self.state.lock();
        Self::begin(&mut state, Call::SetPower(command))?;

        let now = Instant::now();
        state.check_lease(RpcOp::SetPower, lease, now)?;
        let current = state.settle_power(now);

        match command {
            PowerCommand::On => {
                if state.estop != EstopLevel::None {
                    return Err(ControlError::rpc(
                        RpcOp::SetPower,
                        ErrorCode::Estopped,
                        "emergency stop engaged",
                    ));
                }
                if !current.is_on() {
                    state.pending = Some(PendingPower {
                        target: PowerState::On,
                        ready_at: now + self.config.power_on_delay,
                    });
                }
            }
            PowerCommand::Off { cut_immediately } => {
                if current.is_on() || state.pending.is_some() {
                    let delay = if cut_immediately {
                        Duration::ZERO
                    } else {
                        self.config.power_off_delay
                    };
                    state.pending = Some(PendingPower {
                        target: PowerState::Off,
                        ready_at: now + delay,
                    });
                }
            }
        }
        Ok(())
    }

    async fn power_state(&self) -> Result<PowerState> {
        self.lag(RpcOp::GetPowerState).await;
        let mut state = self.state.lock();
        Self::begin(&mut state, Call::GetPowerState)?;
        Ok(state.settle_power(Instant::now()))
    }

    async fn stand(&self, lease: &Lease) -> Result<()> {
        self.lag(RpcOp::Stand).await;
        let mut state = self.state.lock();
        Self::begin(&mut state, Call::Stand)?;

        let now = Instant::now();
        state.check_lease(RpcOp::Stand, lease, now)?;
        match state.settle_power(now) {
            PowerState::Off => Err(ControlError::rpc(
                RpcOp::Stand,
                ErrorCode::InvalidRequest,
                "cannot stand while powered off",
            )),
            PowerState::Standing => Ok(()),
            PowerState::On => {
                state.pending = Some(PendingPower {
                    target: PowerState::Standing,
                    ready_at: now + self.config.stand_delay,
                });
                Ok(())
            }
        }
    }

    async fn system_params(&self) -> Result<SystemParams> {
        self.lag(RpcOp::GetSystemParams).await;
        let mut state = self.state.lock();
        Self::begin(&mut state, Call::GetSystemParams)?;
        Ok(state.params)
    }

    async fn set_system_params(&self, lease: &Lease, params: &SystemParams) -> Result<()> {
        self.lag(RpcOp::SetSystemParams).await;
        let mut state = self.state.lock();
        Self::begin(&mut state, Call::SetSystemParams(*params))?;

        state.check_lease(RpcOp::SetSystemParams, lease, Instant::now())?;
        params.validate().map_err(|e| {
            ControlError::rpc(RpcOp::SetSystemParams, ErrorCode::InvalidRequest, e.to_string())
        })?;
        state.params = state.params.merged(*params);
        Ok(())
    }

    async fn register_behavior(
        &self,
        lease: &Lease,
        name: &BehaviorName,
        behavior: &Behavior,
    ) -> Result<()> {
        self.lag(RpcOp::RegisterBehavior).await;
        let mut state = self.state.lock();
        Self::begin(
            &mut state,
            Call::RegisterBehavior {
                name: name.clone(),
                priority: behavior.priority,
            },
        )?;

        state.check_lease(RpcOp::RegisterBehavior, lease, Instant::now())?;
        if state.behaviors.get(name).is_some_and(|b| b.permanent) {
            return Err(ControlError::rpc(
                RpcOp::RegisterBehavior,
                ErrorCode::PermanentBehavior,
                format!("{name} is permanent"),
            ));
        }
        if !behavior.has_output() {
            return Err(ControlError::rpc(
                RpcOp::RegisterBehavior,
                ErrorCode::InvalidBehavior,
                format!("{name} has no lights or audio"),
            ));
        }
        state.behaviors.insert(
            name.clone(),
            StoredBehavior {
                behavior: behavior.clone(),
                permanent: false,
            },
        );
        Ok(())
    }

    async fn run_behavior(
        &self,
        lease: &Lease,
        name: &BehaviorName,
        end_time: DateTime<Utc>,
        _restart: bool,
    ) -> Result<()> {
        self.lag(RpcOp::RunBehavior).await;
        let mut state = self.state.lock();
        Self::begin(&mut state, Call::RunBehavior { name: name.clone() })?;

        state.check_lease(RpcOp::RunBehavior, lease, Instant::now())?;
        if !state.behaviors.contains_key(name) {
            return Err(ControlError::rpc(
                RpcOp::RunBehavior,
                ErrorCode::DoesNotExist,
                format!("no behavior named {name}"),
            ));
        }
        if end_time <= Utc::now() {
            return Err(ControlError::rpc(
                RpcOp::RunBehavior,
                ErrorCode::Expired,
                format!("end time {end_time} already passed"),
            ));
        }
        Ok(())
    }

    async fn delete_behaviors(&self, names: &[BehaviorName]) -> Result<()> {
        self.lag(RpcOp::DeleteBehaviors).await;
        let mut state = self.state.lock();
        Self::begin(
            &mut state,
            Call::DeleteBehaviors {
                names: names.to_vec(),
            },
        )?;

        if let Some(name) = names
            .iter()
            .find(|n| state.behaviors.get(*n).is_some_and(|b| b.permanent))
        {
            return Err(ControlError::rpc(
                RpcOp::DeleteBehaviors,
                ErrorCode::PermanentBehavior,
                format!("{name} is permanent"),
            ));
        }

        let missing: Vec<&str> = names
            .iter()
            .filter(|n| state.behaviors.remove(*n).is_none())
            .map(BehaviorName::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ControlError::rpc(
                RpcOp::DeleteBehaviors,
                ErrorCode::DoesNotExist,
                format!("no behaviors named {}", missing.join(", ")),
            ))
        }
    }

    async fn list_behaviors(&self) -> Result<Vec<LiveBehavior>> {
        self.lag(RpcOp::ListBehaviors).await;
        let mut state = self.state.lock();
        Self::begin(&mut state, Call::ListBehaviors)?;
        Ok(state
            .behaviors
            .iter()
            .map(|(name, stored)| LiveBehavior {
                name: name.clone(),
                behavior: stored.behavior.clone(),
                permanent: stored.permanent,
            })
            .collect())
    }
}
