//! In-memory guest, host and endpoint fakes with fault injection.
//!
//! Used by this crate's unit tests and, through the `testing` feature, by
//! the server's integration tests.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use uvmagent_core::error::{AgentError, Result};
use uvmagent_core::guest::{GuestResourceRequest, RequestType, ResourceType};
use uvmagent_core::host::HostModifyRequest;
use uvmagent_core::network::NetworkEndpoint;

use crate::endpoint::EndpointResolver;
use crate::guest::GuestChannel;
use crate::host::ComputeSystem;

/// A plausible endpoint named `name` in namespace `namespace_id`.
pub fn endpoint(name: &str, namespace_id: &str) -> NetworkEndpoint {
    NetworkEndpoint {
        id: format!("{}-id", name),
        name: name.to_string(),
        namespace_id: namespace_id.to_string(),
        mac_address: "00-15-5D-52-C0-00".to_string(),
        ip_address: "172.20.0.2".to_string(),
        prefix_length: 24,
        gateway_address: "172.20.0.1".to_string(),
        dns_suffix: "cluster.local".to_string(),
        dns_servers: "172.20.0.10".to_string(),
    }
}

#[derive(Debug, Default)]
struct GuestFaults {
    fail: Vec<(ResourceType, RequestType)>,
    hang: Vec<(ResourceType, RequestType)>,
}

/// Guest channel that records every request it receives.
#[derive(Debug, Default)]
pub struct FakeGuest {
    requests: Mutex<Vec<GuestResourceRequest>>,
    faults: Mutex<GuestFaults>,
}

impl FakeGuest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<GuestResourceRequest> {
        self.requests.lock().clone()
    }

    /// Reject matching requests.
    pub fn fail_when(&self, resource: ResourceType, request: RequestType) {
        self.faults.lock().fail.push((resource, request));
    }

    /// Never answer matching requests.
    pub fn hang_when(&self, resource: ResourceType, request: RequestType) {
        self.faults.lock().hang.push((resource, request));
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = GuestFaults::default();
    }
}

#[async_trait]
impl GuestChannel for FakeGuest {
    async fn send(&self, request: &GuestResourceRequest) -> Result<()> {
        self.requests.lock().push(request.clone());

        let op = (request.resource_type, request.request_type);
        let (fail, hang) = {
            let faults = self.faults.lock();
            (faults.fail.contains(&op), faults.hang.contains(&op))
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(AgentError::GuestCommunication {
                message: format!("injected failure for {:?} {:?}", op.0, op.1),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostFault {
    /// Reject without applying.
    Fail,
    /// Apply, then never acknowledge.
    Stall,
    /// Apply, then report a timeout.
    TimeOut,
}

/// Host compute system that tracks which adapters and shares are live.
#[derive(Debug, Default)]
pub struct FakeComputeSystem {
    requests: Mutex<Vec<HostModifyRequest>>,
    faults: Mutex<Vec<(&'static str, HostFault)>>,
    adapters: Mutex<BTreeSet<String>>,
    shares: Mutex<BTreeSet<String>>,
}

impl FakeComputeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<HostModifyRequest> {
        self.requests.lock().clone()
    }

    /// Reject requests of `kind` (see [`HostModifyRequest::kind`]).
    pub fn fail_when(&self, kind: &'static str) {
        self.faults.lock().push((kind, HostFault::Fail));
    }

    /// Apply requests of `kind` but never answer them.
    pub fn stall_when(&self, kind: &'static str) {
        self.faults.lock().push((kind, HostFault::Stall));
    }

    /// Apply requests of `kind`, then fail them with `Timeout`.
    pub fn time_out_when(&self, kind: &'static str) {
        self.faults.lock().push((kind, HostFault::TimeOut));
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// NIC ids with a live host adapter, sorted.
    pub fn live_adapters(&self) -> Vec<String> {
        self.adapters.lock().iter().cloned().collect()
    }

    /// Live host shares as `vsmb:<name>` or `plan9:<name>`, sorted.
    pub fn live_shares(&self) -> Vec<String> {
        self.shares.lock().iter().cloned().collect()
    }

    fn apply(&self, request: &HostModifyRequest) {
        match request {
            HostModifyRequest::AddNetworkAdapter { nic_id, .. } => {
                self.adapters.lock().insert(nic_id.clone());
            }
            HostModifyRequest::RemoveNetworkAdapter { nic_id } => {
                self.adapters.lock().remove(nic_id);
            }
            HostModifyRequest::AddVsmbShare { name, .. } => {
                self.shares.lock().insert(format!("vsmb:{}", name));
            }
            HostModifyRequest::RemoveVsmbShare { name } => {
                self.shares.lock().remove(&format!("vsmb:{}", name));
            }
            HostModifyRequest::AddPlan9Share { name, .. } => {
                self.shares.lock().insert(format!("plan9:{}", name));
            }
            HostModifyRequest::RemovePlan9Share { name, .. } => {
                self.shares.lock().remove(&format!("plan9:{}", name));
            }
        }
    }
}

#[async_trait]
impl ComputeSystem for FakeComputeSystem {
    async fn modify(&self, request: &HostModifyRequest) -> Result<()> {
        self.requests.lock().push(request.clone());

        let kind = request.kind();
        let fault = self
            .faults
            .lock()
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, fault)| *fault);

        if fault == Some(HostFault::Fail) {
            return Err(AgentError::HostModify {
                message: format!("injected failure for {}", kind),
            });
        }

        self.apply(request);

        match fault {
            Some(HostFault::Stall) => std::future::pending::<Result<()>>().await,
            Some(HostFault::TimeOut) => Err(AgentError::Timeout(format!("injected for {}", kind))),
            _ => Ok(()),
        }
    }
}

/// Endpoint table held in memory.
#[derive(Debug, Default)]
pub struct FakeResolver {
    endpoints: Mutex<HashMap<String, NetworkEndpoint>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, endpoint: NetworkEndpoint) -> Self {
        self.insert(endpoint);
        self
    }

    pub fn insert(&self, endpoint: NetworkEndpoint) {
        self.endpoints
            .lock()
            .insert(endpoint.name.clone(), endpoint);
    }
}

#[async_trait]
impl EndpointResolver for FakeResolver {
    async fn endpoint_by_name(&self, name: &str) -> Result<NetworkEndpoint> {
        self.endpoints
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::EndpointNotFound {
                name: name.to_string(),
            })
    }
}
