//! Client for the actuator RPC endpoint.
//!
//! [`ActuatorClient`] is the seam between the orchestration logic and the
//! transport. [`HttpActuatorClient`] speaks JSON over HTTP; tests use the
//! in-memory `MockActuator`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tether_core::{
    Behavior, BehaviorName, ClientName, EstopLevel, Lease, LiveBehavior, PowerState, SystemParams,
};

use crate::error::{ControlError, Result};
use crate::wire::{
    AcquireLeaseRequest, DeleteBehaviorsRequest, LeaseRequest, PowerCommand,
    RegisterBehaviorRequest, RpcOp, RpcResponse, RunBehaviorRequest, SetPowerRequest,
    SetSystemParamsRequest,
};

/// Trait for actuator communication.
///
/// Every mutating call takes the lease that authorizes it. The actuator
/// answers a stale, expired or foreign lease with a lease-terminal
/// [`ErrorCode`](crate::wire::ErrorCode).
#[async_trait]
pub trait ActuatorClient: Send + Sync {
    /// Claim a free lease on `resource`.
    ///
    /// # Errors
    ///
    /// Returns `ResourceAlreadyClaimed` if another valid lease exists.
    async fn acquire_lease(&self, resource: &str, owner: &ClientName) -> Result<Lease>;

    /// Claim a lease on `resource`, preempting any current holder.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn take_lease(&self, resource: &str, owner: &ClientName) -> Result<Lease>;

    /// Extend a held lease. The returned lease supersedes the one presented.
    ///
    /// # Errors
    ///
    /// Returns a lease-terminal error if the lease is no longer current.
    async fn renew_lease(&self, lease: &Lease) -> Result<Lease>;

    /// Give a held lease back.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the lease is not current.
    async fn release_lease(&self, lease: &Lease) -> Result<()>;

    /// Read the emergency-stop level.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn estop_status(&self) -> Result<EstopLevel>;

    /// Command motor power. Returns once the command is accepted, not once
    /// the actuator has converged.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is rejected.
    async fn set_power(&self, lease: &Lease, command: PowerCommand) -> Result<()>;

    /// Read the current power state.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn power_state(&self) -> Result<PowerState>;

    /// Command the standing posture.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is rejected.
    async fn stand(&self, lease: &Lease) -> Result<()>;

    /// Read the audio/visual system parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn system_params(&self) -> Result<SystemParams>;

    /// Update the audio/visual system parameters; unset fields are unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the update is rejected.
    async fn set_system_params(&self, lease: &Lease, params: &SystemParams) -> Result<()>;

    /// Create or replace a named behavior.
    ///
    /// # Errors
    ///
    /// Returns `PermanentBehavior` or `InvalidBehavior` if the actuator
    /// refuses the definition.
    async fn register_behavior(
        &self,
        lease: &Lease,
        name: &BehaviorName,
        behavior: &Behavior,
    ) -> Result<()>;

    /// Run a registered behavior until `end_time`.
    ///
    /// # Errors
    ///
    /// Returns `DoesNotExist` for unknown names and `Expired` if `end_time`
    /// already passed.
    async fn run_behavior(
        &self,
        lease: &Lease,
        name: &BehaviorName,
        end_time: DateTime<Utc>,
        restart: bool,
    ) -> Result<()>;

    /// Delete behaviors by name. Does not require a lease.
    ///
    /// # Errors
    ///
    /// Returns `DoesNotExist` listing missing names after deleting the rest,
    /// or `PermanentBehavior` without deleting anything.
    async fn delete_behaviors(&self, names: &[BehaviorName]) -> Result<()>;

    /// List registered behaviors, including permanent ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn list_behaviors(&self) -> Result<Vec<LiveBehavior>>;
}

/// HTTP client for the actuator.
#[derive(Debug, Clone)]
pub struct HttpActuatorClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpActuatorClient {
    /// Create a new actuator client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the actuator (e.g., "http://spot.local:8080")
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ControlError::Internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, base_url))
    }

    /// Create a new actuator client with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL of the actuator.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, op: RpcOp, path: &str) -> Result<Option<T>> {
        self.send(op, self.client.get(self.url(path))).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        op: RpcOp,
        path: &str,
        body: &B,
    ) -> Result<Option<T>> {
        self.send(op, self.client.post(self.url(path)).json(body))
            .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        op: RpcOp,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<T>> {
        let response = request.send().await.map_err(|e| ControlError::Transport {
            op,
            message: format!("request failed: {e}"),
        })?;

        let status = response.status();
        let parsed = response.json::<RpcResponse<T>>().await;

        if !status.is_success() {
            // A rejection may still arrive with an error status.
            if let Ok(envelope) = parsed {
                if !envelope.header.is_ok() {
                    return envelope.into_result(op);
                }
            }
            tracing::error!(op = %op, status = %status, "Actuator request failed");
            return Err(ControlError::Transport {
                op,
                message: format!("actuator returned status {status}"),
            });
        }

        // A truncated or garbled body is a link failure, not a rejection.
        let envelope = parsed.map_err(|e| ControlError::Transport {
            op,
            message: format!("failed to read response: {e}"),
        })?;
        let result = envelope.into_result(op);
        if let Err(e) = &result {
            tracing::debug!(op = %op, error = %e, "Actuator rejected request");
        }
        result
    }
}

#[async_trait]
impl ActuatorClient for HttpActuatorClient {
    async fn acquire_lease(&self, resource: &str, owner: &ClientName) -> Result<Lease> {
        let request = AcquireLeaseRequest {
            resource: resource.to_string(),
            owner: owner.clone(),
        };
        let lease: Option<Lease> = self
            .post(RpcOp::AcquireLease, "/v1/lease/acquire", &request)
            .await?;
        require(RpcOp::AcquireLease, lease)
    }

    async fn take_lease(&self, resource: &str, owner: &ClientName) -> Result<Lease> {
        let request = AcquireLeaseRequest {
            resource: resource.to_string(),
            owner: owner.clone(),
        };
        let lease: Option<Lease> = self
            .post(RpcOp::TakeLease, "/v1/lease/take", &request)
            .await?;
        require(RpcOp::TakeLease, lease)
    }

    async fn renew_lease(&self, lease: &Lease) -> Result<Lease> {
        let request = LeaseRequest {
            lease: lease.clone(),
        };
        let renewed: Option<Lease> = self
            .post(RpcOp::RenewLease, "/v1/lease/renew", &request)
            .await?;
        require(RpcOp::RenewLease, renewed)
    }

    async fn release_lease(&self, lease: &Lease) -> Result<()> {
        let request = LeaseRequest {
            lease: lease.clone(),
        };
        let _: Option<()> = self
            .post(RpcOp::ReleaseLease, "/v1/lease/release", &request)
            .await?;
        tracing::debug!(resource = %lease.resource, epoch = lease.epoch, "Released lease");
        Ok(())
    }

    async fn estop_status(&self) -> Result<EstopLevel> {
        let level = self.get(RpcOp::GetEstopStatus, "/v1/estop").await?;
        require(RpcOp::GetEstopStatus, level)
    }

    async fn set_power(&self, lease: &Lease, command: PowerCommand) -> Result<()> {
        let request = SetPowerRequest {
            lease: lease.clone(),
            command,
        };
        let _: Option<()> = self.post(RpcOp::SetPower, "/v1/power", &request).await?;
        Ok(())
    }

    async fn power_state(&self) -> Result<PowerState> {
        let state = self.get(RpcOp::GetPowerState, "/v1/power").await?;
        require(RpcOp::GetPowerState, state)
    }

    async fn stand(&self, lease: &Lease) -> Result<()> {
        let request = LeaseRequest {
            lease: lease.clone(),
        };
        let _: Option<()> = self.post(RpcOp::Stand, "/v1/stand", &request).await?;
        Ok(())
    }

    async fn system_params(&self) -> Result<SystemParams> {
        let params = self
            .get(RpcOp::GetSystemParams, "/v1/system-params")
            .await?;
        require(RpcOp::GetSystemParams, params)
    }

    async fn set_system_params(&self, lease: &Lease, params: &SystemParams) -> Result<()> {
        let request = SetSystemParamsRequest {
            lease: lease.clone(),
            params: *params,
        };
        let _: Option<()> = self
            .post(RpcOp::SetSystemParams, "/v1/system-params", &request)
            .await?;
        Ok(())
    }

    async fn register_behavior(
        &self,
        lease: &Lease,
        name: &BehaviorName,
        behavior: &Behavior,
    ) -> Result<()> {
        let request = RegisterBehaviorRequest {
            lease: lease.clone(),
            behavior: behavior.clone(),
        };
        let url = self.url(&format!("/v1/behaviors/{name}"));
        let _: Option<()> = self
            .send(RpcOp::RegisterBehavior, self.client.put(url).json(&request))
            .await?;
        tracing::debug!(behavior = %name, priority = behavior.priority, "Registered behavior");
        Ok(())
    }

    async fn run_behavior(
        &self,
        lease: &Lease,
        name: &BehaviorName,
        end_time: DateTime<Utc>,
        restart: bool,
    ) -> Result<()> {
        let request = RunBehaviorRequest {
            lease: lease.clone(),
            end_time,
            restart,
        };
        let _: Option<()> = self
            .post(
                RpcOp::RunBehavior,
                &format!("/v1/behaviors/{name}/run"),
                &request,
            )
            .await?;
        Ok(())
    }

    async fn delete_behaviors(&self, names: &[BehaviorName]) -> Result<()> {
        let request = DeleteBehaviorsRequest {
            names: names.to_vec(),
        };
        let url = self.url("/v1/behaviors");
        let _: Option<()> = self
            .send(RpcOp::DeleteBehaviors, self.client.delete(url).json(&request))
            .await?;
        Ok(())
    }

    async fn list_behaviors(&self) -> Result<Vec<LiveBehavior>> {
        let behaviors = self.get(RpcOp::ListBehaviors, "/v1/behaviors").await?;
        Ok(behaviors.unwrap_or_default())
    }
}

fn require<T>(op: RpcOp, body: Option<T>) -> Result<T> {
    body.ok_or_else(|| ControlError::Internal(format!("{op} response carried no body")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ErrorCode;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn owner() -> ClientName {
        ClientName::new("tester").unwrap()
    }

    fn lease_json(epoch: u64) -> serde_json::Value {
        json!({
            "resource": "body",
            "owner": "tester",
            "epoch": epoch,
            "expires_at": (Utc::now() + chrono::Duration::seconds(10)).to_rfc3339(),
        })
    }

    #[test]
    fn http_client_creation() {
        let client = HttpActuatorClient::new("http://localhost:8080/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn acquire_lease_parses_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/lease/acquire"))
            .and(body_json(json!({"resource": "body", "owner": "tester"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "header": {"code": "ok"},
                "body": lease_json(7),
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpActuatorClient::new(server.uri()).unwrap();
        let lease = client.acquire_lease("body", &owner()).await.unwrap();
        assert_eq!(lease.epoch, 7);
        assert_eq!(lease.owner, owner());
    }

    #[tokio::test]
    async fn rejection_header_becomes_rpc_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/lease/acquire"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "header": {"code": "resource_already_claimed", "message": "held by other"},
            })))
            .mount(&server)
            .await;

        let client = HttpActuatorClient::new(server.uri()).unwrap();
        let err = client.acquire_lease("body", &owner()).await.unwrap_err();
        assert_eq!(err.rpc_code(), Some(ErrorCode::ResourceAlreadyClaimed));
        assert!(err.to_string().contains("held by other"));
    }

    #[tokio::test]
    async fn server_error_without_envelope_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/power"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpActuatorClient::new(server.uri()).unwrap();
        let err = client.power_state().await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::Transport {
                op: RpcOp::GetPowerState,
                ..
            }
        ));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn delete_behaviors_sends_names() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/behaviors"))
            .and(body_json(json!({"names": ["note_do", "note_re"]})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"header": {"code": "ok"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpActuatorClient::new(server.uri()).unwrap();
        let names = [
            BehaviorName::new("note_do").unwrap(),
            BehaviorName::new("note_re").unwrap(),
        ];
        client.delete_behaviors(&names).await.unwrap();
    }

    #[tokio::test]
    async fn run_behavior_uses_name_in_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/behaviors/note_mi/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "header": {"code": "does_not_exist", "message": "no behavior note_mi"},
            })))
            .mount(&server)
            .await;

        let client = HttpActuatorClient::new(server.uri()).unwrap();
        let lease: Lease = serde_json::from_value(lease_json(1)).unwrap();
        let err = client
            .run_behavior(
                &lease,
                &BehaviorName::new("note_mi").unwrap(),
                Utc::now() + chrono::Duration::seconds(1),
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.rpc_code(), Some(ErrorCode::DoesNotExist));
    }

    #[tokio::test]
    async fn list_behaviors_parses_permanent_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/behaviors"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "header": {"code": "ok"},
                "body": [{
                    "name": "idle_glow",
                    "behavior": {"enabled": true, "priority": 3},
                    "permanent": true,
                }],
            })))
            .mount(&server)
            .await;

        let client = HttpActuatorClient::new(server.uri()).unwrap();
        let behaviors = client.list_behaviors().await.unwrap();
        assert_eq!(behaviors.len(), 1);
        assert!(behaviors[0].permanent);
        assert_eq!(behaviors[0].behavior.priority, 3);
    }

    #[tokio::test]
    async fn unreadable_success_body_is_retriable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/power"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"header": {"co"#))
            .mount(&server)
            .await;

        let client = HttpActuatorClient::new(server.uri()).unwrap();
        let err = client.power_state().await.unwrap_err();
        assert!(matches!(err, ControlError::Transport { op: RpcOp::GetPowerState, .. }));
        assert!(err.is_retriable());
    }
}
