//! Endpoint attachment: NIC attach/detach by endpoint name.
//!
//! Resolves the named endpoint, derives the guest namespace from it and
//! drives the VM's NIC bookkeeping.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uvmagent_core::error::Result;
use uvmagent_core::network::NicAttachment;

use crate::endpoint::EndpointResolver;
use crate::uvm::UtilityVM;

/// Attaches host network endpoints to one Utility VM.
#[derive(Clone)]
pub struct EndpointAttachment {
    vm: Arc<UtilityVM>,
    resolver: Arc<dyn EndpointResolver>,
}

impl EndpointAttachment {
    pub fn new(vm: Arc<UtilityVM>, resolver: Arc<dyn EndpointResolver>) -> Self {
        Self { vm, resolver }
    }

    pub fn vm(&self) -> &Arc<UtilityVM> {
        &self.vm
    }

    /// Attach endpoint `endpoint_name` to the VM as NIC `nic_id`.
    pub async fn attach_nic(
        &self,
        container_id: &str,
        nic_id: &str,
        endpoint_name: &str,
        cancel: &CancellationToken,
    ) -> Result<NicAttachment> {
        let endpoint = self.resolver.endpoint_by_name(endpoint_name).await?;

        tracing::info!(
            container_id,
            endpoint_id = %endpoint.id,
            endpoint_name,
            nic_id,
            "Adding NIC to UVM"
        );

        self.vm
            .add_endpoint_to_ns_with_id(
                container_id,
                &endpoint.namespace_id,
                nic_id,
                &endpoint,
                cancel,
            )
            .await
    }

    /// Detach NIC `nic_id`. Detaching a NIC that is not attached succeeds.
    pub async fn detach_nic(
        &self,
        container_id: &str,
        nic_id: &str,
        endpoint_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let endpoint = self.resolver.endpoint_by_name(endpoint_name).await?;

        tracing::info!(
            container_id,
            endpoint_id = %endpoint.id,
            endpoint_name,
            nic_id,
            "Removing NIC from UVM"
        );

        self.vm
            .remove_endpoint_from_ns(&endpoint.namespace_id, nic_id, &endpoint, cancel)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for EndpointAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointAttachment")
            .field("vm", &self.vm)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{endpoint, FakeComputeSystem, FakeGuest, FakeResolver};
    use uvmagent_core::error::AgentError;
    use uvmagent_core::guest::{GuestOs, RequestType, ResourceType};

    fn setup(
        os: GuestOs,
    ) -> (Arc<FakeGuest>, Arc<FakeComputeSystem>, EndpointAttachment) {
        let guest = Arc::new(FakeGuest::new());
        let host = Arc::new(FakeComputeSystem::new());
        let vm = Arc::new(UtilityVM::new("vm-1", os, guest.clone(), host.clone()));
        let resolver = FakeResolver::new().with(endpoint("eth-test", "ns-1"));
        (guest, host, EndpointAttachment::new(vm, Arc::new(resolver)))
    }

    #[tokio::test]
    async fn test_attach_uses_endpoint_namespace() {
        let (guest, _host, attach) = setup(GuestOs::Linux);
        let nic = attach
            .attach_nic("c1", "nic-1", "eth-test", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(nic.container_id, "c1");
        assert_eq!(nic.namespace_id, "ns-1");
        assert_eq!(nic.endpoint_id, "eth-test-id");
        match &guest.requests()[0].settings {
            uvmagent_core::guest::ResourceSettings::Network(adapter) => {
                assert_eq!(adapter.namespace_id, "ns-1");
                assert_eq!(adapter.id, "nic-1");
            }
            other => panic!("unexpected settings {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_not_found() {
        let (guest, host, attach) = setup(GuestOs::Linux);
        let err = attach
            .attach_nic("c1", "nic-1", "missing", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::EndpointNotFound { ref name } if name == "missing"));
        assert!(guest.requests().is_empty());
        assert!(host.requests().is_empty());
    }

    #[tokio::test]
    async fn test_detach_twice_succeeds() {
        let (guest, host, attach) = setup(GuestOs::Windows);
        let cancel = CancellationToken::new();
        attach
            .attach_nic("c1", "nic-1", "eth-test", &cancel)
            .await
            .unwrap();

        attach
            .detach_nic("c1", "nic-1", "eth-test", &cancel)
            .await
            .unwrap();
        let calls = guest.requests().len() + host.requests().len();

        attach
            .detach_nic("c1", "nic-1", "eth-test", &cancel)
            .await
            .unwrap();
        assert_eq!(guest.requests().len() + host.requests().len(), calls);
        assert_eq!(attach.vm().nic_count(), 0);
    }

    #[tokio::test]
    async fn test_attach_detach_leaves_no_attachments() {
        let (guest, host, attach) = setup(GuestOs::Linux);
        let cancel = CancellationToken::new();

        attach
            .attach_nic("c1", "nic-1", "eth-test", &cancel)
            .await
            .unwrap();
        assert_eq!(attach.vm().nic_count(), 1);

        attach
            .detach_nic("c1", "nic-1", "eth-test", &cancel)
            .await
            .unwrap();
        assert!(attach.vm().nic_attachments().is_empty());
        assert!(host.live_adapters().is_empty());

        let kinds: Vec<RequestType> = guest
            .requests()
            .iter()
            .filter(|r| r.resource_type == ResourceType::Network)
            .map(|r| r.request_type)
            .collect();
        assert_eq!(kinds, vec![RequestType::Add, RequestType::Remove]);
    }

    #[tokio::test]
    async fn test_detach_unknown_endpoint_fails() {
        let (_guest, _host, attach) = setup(GuestOs::Linux);
        let err = attach
            .detach_nic("c1", "nic-1", "missing", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::EndpointNotFound { .. }));
    }
}
