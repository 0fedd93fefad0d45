//! NIC hot-add and hot-remove inside guest network namespaces.

use tokio_util::sync::CancellationToken;
use uvmagent_core::error::{AgentError, Result};
use uvmagent_core::guest::{GuestOs, GuestResourceRequest, NetworkAdapter, RequestType};
use uvmagent_core::host::HostModifyRequest;
use uvmagent_core::network::{NetworkEndpoint, NicAttachment};

use super::UtilityVM;

fn nic_lock_key(namespace_id: &str, nic_id: &str) -> String {
    format!("nic/{}/{}", namespace_id, nic_id)
}

fn guest_adapter(namespace_id: &str, nic_id: &str, endpoint: &NetworkEndpoint) -> NetworkAdapter {
    NetworkAdapter {
        namespace_id: namespace_id.to_string(),
        id: nic_id.to_string(),
        mac_address: endpoint.mac_address.clone(),
        ip_address: endpoint.ip_address.clone(),
        prefix_length: endpoint.prefix_length,
        gateway_address: endpoint.gateway_address.clone(),
        dns_suffix: endpoint.dns_suffix.clone(),
        dns_server_list: endpoint.dns_servers.clone(),
    }
}

impl UtilityVM {
    /// Attach `endpoint` as NIC `nic_id` in guest namespace `namespace_id`.
    ///
    /// Fails with `NicAlreadyAttached` without touching host or guest if the
    /// NIC is already live. If the guest step fails the host adapter is
    /// removed before returning.
    pub async fn add_endpoint_to_ns_with_id(
        &self,
        container_id: &str,
        namespace_id: &str,
        nic_id: &str,
        endpoint: &NetworkEndpoint,
        cancel: &CancellationToken,
    ) -> Result<NicAttachment> {
        let _guard = self
            .resource_locks
            .lock(nic_lock_key(namespace_id, nic_id))
            .await;

        {
            let state = self.state.lock();
            if state
                .namespaces
                .get(namespace_id)
                .is_some_and(|nics| nics.contains_key(nic_id))
            {
                return Err(AgentError::NicAlreadyAttached {
                    namespace_id: namespace_id.to_string(),
                    nic_id: nic_id.to_string(),
                });
            }
        }

        self.host_add(
            &HostModifyRequest::AddNetworkAdapter {
                nic_id: nic_id.to_string(),
                endpoint_id: endpoint.id.clone(),
                mac_address: endpoint.mac_address.clone(),
            },
            HostModifyRequest::RemoveNetworkAdapter {
                nic_id: nic_id.to_string(),
            },
            cancel,
        )
        .await?;

        let adapter = guest_adapter(namespace_id, nic_id, endpoint);
        if let Err(e) = self.notify_guest_nic_added(&adapter, cancel).await {
            tracing::warn!(
                vm_id = %self.id,
                namespace_id,
                nic_id,
                error = %e,
                "Guest NIC add failed, removing host adapter"
            );
            self.guest_undo_if_ambiguous(
                &e,
                &GuestResourceRequest::network(RequestType::Remove, adapter),
            )
            .await;
            self.host_release(&HostModifyRequest::RemoveNetworkAdapter {
                nic_id: nic_id.to_string(),
            })
            .await;
            return Err(e);
        }

        let attachment = NicAttachment::new(container_id, nic_id, endpoint);
        self.state
            .lock()
            .namespaces
            .entry(namespace_id.to_string())
            .or_default()
            .insert(nic_id.to_string(), attachment.clone());

        tracing::info!(vm_id = %self.id, namespace_id, nic_id, "NIC attached");
        Ok(attachment)
    }

    async fn notify_guest_nic_added(
        &self,
        adapter: &NetworkAdapter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.os == GuestOs::Windows {
            self.guest_request(
                &GuestResourceRequest::network(RequestType::PreAdd, adapter.clone()),
                cancel,
            )
            .await?;
        }
        self.guest_request(
            &GuestResourceRequest::network(RequestType::Add, adapter.clone()),
            cancel,
        )
        .await
    }

    /// Detach NIC `nic_id` from namespace `namespace_id`.
    ///
    /// Unknown namespaces and NICs are a successful no-op. On a guest
    /// failure the record stays so the detach can be retried.
    pub async fn remove_endpoint_from_ns(
        &self,
        namespace_id: &str,
        nic_id: &str,
        endpoint: &NetworkEndpoint,
        cancel: &CancellationToken,
    ) -> Result<Option<NicAttachment>> {
        let _guard = self
            .resource_locks
            .lock(nic_lock_key(namespace_id, nic_id))
            .await;

        let existing = {
            let state = self.state.lock();
            state
                .namespaces
                .get(namespace_id)
                .and_then(|nics| nics.get(nic_id))
                .cloned()
        };
        let Some(existing) = existing else {
            tracing::debug!(vm_id = %self.id, namespace_id, nic_id, "NIC not attached, nothing to remove");
            return Ok(None);
        };

        if existing.endpoint_id != endpoint.id {
            tracing::warn!(
                vm_id = %self.id,
                nic_id,
                attached_endpoint = %existing.endpoint_id,
                requested_endpoint = %endpoint.id,
                "Detaching NIC attached from a different endpoint"
            );
        }

        self.guest_request(
            &GuestResourceRequest::network(
                RequestType::Remove,
                guest_adapter(namespace_id, nic_id, endpoint),
            ),
            cancel,
        )
        .await?;

        self.host_modify(
            &HostModifyRequest::RemoveNetworkAdapter {
                nic_id: nic_id.to_string(),
            },
            cancel,
        )
        .await?;

        let removed = {
            let mut state = self.state.lock();
            let removed = state
                .namespaces
                .get_mut(namespace_id)
                .and_then(|nics| nics.remove(nic_id));
            if state
                .namespaces
                .get(namespace_id)
                .is_some_and(|nics| nics.is_empty())
            {
                state.namespaces.remove(namespace_id);
            }
            removed
        };

        tracing::info!(vm_id = %self.id, namespace_id, nic_id, "NIC detached");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::testing::{endpoint, FakeComputeSystem, FakeGuest};
    use uvmagent_core::guest::ResourceType;

    fn uvm(os: GuestOs) -> (Arc<FakeGuest>, Arc<FakeComputeSystem>, UtilityVM) {
        let guest = Arc::new(FakeGuest::new());
        let host = Arc::new(FakeComputeSystem::new());
        let vm = UtilityVM::new("vm-1", os, guest.clone(), host.clone());
        (guest, host, vm)
    }

    #[tokio::test]
    async fn test_add_records_attachment() {
        let (guest, host, vm) = uvm(GuestOs::Linux);
        let ep = endpoint("eth-test", "ns-1");
        let cancel = CancellationToken::new();

        let nic = vm
            .add_endpoint_to_ns_with_id("c1", "ns-1", "nic-1", &ep, &cancel)
            .await
            .unwrap();

        assert_eq!(nic.namespace_id, "ns-1");
        assert_eq!(vm.nic_count(), 1);
        assert_eq!(host.live_adapters(), vec!["nic-1".to_string()]);
        let sent = guest.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].resource_type, ResourceType::Network);
        assert_eq!(sent[0].request_type, RequestType::Add);
    }

    #[tokio::test]
    async fn test_windows_sends_pre_add_first() {
        let (guest, _host, vm) = uvm(GuestOs::Windows);
        let ep = endpoint("eth-test", "ns-1");
        vm.add_endpoint_to_ns_with_id("c1", "ns-1", "nic-1", &ep, &CancellationToken::new())
            .await
            .unwrap();

        let kinds: Vec<RequestType> = guest.requests().iter().map(|r| r.request_type).collect();
        assert_eq!(kinds, vec![RequestType::PreAdd, RequestType::Add]);
    }

    #[tokio::test]
    async fn test_duplicate_nic_fails_without_guest_call() {
        let (guest, host, vm) = uvm(GuestOs::Linux);
        let ep = endpoint("eth-test", "ns-1");
        let cancel = CancellationToken::new();

        vm.add_endpoint_to_ns_with_id("c1", "ns-1", "A", &ep, &cancel)
            .await
            .unwrap();
        let err = vm
            .add_endpoint_to_ns_with_id("c1", "ns-1", "A", &ep, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::NicAlreadyAttached { .. }));
        assert_eq!(vm.nic_count(), 1);
        assert_eq!(guest.requests().len(), 1);
        assert_eq!(host.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_same_nic_id_in_other_namespace_is_independent() {
        let (_guest, _host, vm) = uvm(GuestOs::Linux);
        let cancel = CancellationToken::new();
        vm.add_endpoint_to_ns_with_id("c1", "ns-1", "A", &endpoint("e1", "ns-1"), &cancel)
            .await
            .unwrap();
        vm.add_endpoint_to_ns_with_id("c2", "ns-2", "A", &endpoint("e2", "ns-2"), &cancel)
            .await
            .unwrap();
        assert_eq!(vm.nic_count(), 2);
    }

    #[tokio::test]
    async fn test_guest_failure_releases_host_adapter() {
        let (guest, host, vm) = uvm(GuestOs::Linux);
        guest.fail_when(ResourceType::Network, RequestType::Add);
        let ep = endpoint("eth-test", "ns-1");

        let err = vm
            .add_endpoint_to_ns_with_id("c1", "ns-1", "nic-1", &ep, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::GuestCommunication { .. }));
        assert_eq!(vm.nic_count(), 0);
        assert!(host.live_adapters().is_empty());
    }

    #[tokio::test]
    async fn test_host_failure_skips_guest() {
        let (guest, host, vm) = uvm(GuestOs::Linux);
        host.fail_when("add_network_adapter");
        let ep = endpoint("eth-test", "ns-1");

        let err = vm
            .add_endpoint_to_ns_with_id("c1", "ns-1", "nic-1", &ep, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::HostModify { .. }));
        assert!(guest.requests().is_empty());
        assert_eq!(vm.nic_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_guest_add_rolls_back() {
        let (guest, host, vm) = uvm(GuestOs::Linux);
        guest.hang_when(ResourceType::Network, RequestType::Add);
        let ep = endpoint("eth-test", "ns-1");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = vm
            .add_endpoint_to_ns_with_id("c1", "ns-1", "nic-1", &ep, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Cancelled(_)));
        assert!(host.live_adapters().is_empty());
        assert_eq!(vm.nic_count(), 0);
        // Ambiguous add is followed by a guest remove.
        assert!(guest
            .requests()
            .iter()
            .any(|r| r.request_type == RequestType::Remove));
    }

    #[tokio::test]
    async fn test_cancel_during_host_add_releases_adapter() {
        let (guest, host, vm) = uvm(GuestOs::Linux);
        host.stall_when("add_network_adapter");
        let ep = endpoint("eth-test", "ns-1");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = vm
            .add_endpoint_to_ns_with_id("c1", "ns-1", "nic-1", &ep, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Cancelled(_)));
        assert_eq!(vm.nic_count(), 0);
        assert!(host.live_adapters().is_empty());
        assert!(matches!(
            host.requests().last(),
            Some(HostModifyRequest::RemoveNetworkAdapter { nic_id }) if nic_id == "nic-1"
        ));
        assert!(guest.requests().is_empty());
    }

    #[tokio::test]
    async fn test_host_add_timeout_releases_adapter() {
        let (_guest, host, vm) = uvm(GuestOs::Windows);
        host.time_out_when("add_network_adapter");
        let ep = endpoint("eth-test", "ns-1");
        let cancel = CancellationToken::new();

        let err = vm
            .add_endpoint_to_ns_with_id("c1", "ns-1", "nic-1", &ep, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
        assert!(host.live_adapters().is_empty());

        // Nothing was recorded, so a retry goes through.
        host.clear_faults();
        vm.add_endpoint_to_ns_with_id("c1", "ns-1", "nic-1", &ep, &cancel)
            .await
            .unwrap();
        assert_eq!(host.live_adapters(), vec!["nic-1".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let (guest, host, vm) = uvm(GuestOs::Linux);
        let removed = vm
            .remove_endpoint_from_ns(
                "ns-1",
                "nic-1",
                &endpoint("eth-test", "ns-1"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(removed.is_none());
        assert!(guest.requests().is_empty());
        assert!(host.requests().is_empty());
    }

    #[tokio::test]
    async fn test_remove_guest_failure_keeps_record() {
        let (guest, host, vm) = uvm(GuestOs::Linux);
        let ep = endpoint("eth-test", "ns-1");
        let cancel = CancellationToken::new();
        vm.add_endpoint_to_ns_with_id("c1", "ns-1", "nic-1", &ep, &cancel)
            .await
            .unwrap();

        guest.fail_when(ResourceType::Network, RequestType::Remove);
        assert!(vm
            .remove_endpoint_from_ns("ns-1", "nic-1", &ep, &cancel)
            .await
            .is_err());
        assert_eq!(vm.nic_count(), 1);
        assert_eq!(host.live_adapters().len(), 1);

        guest.clear_faults();
        let removed = vm
            .remove_endpoint_from_ns("ns-1", "nic-1", &ep, &cancel)
            .await
            .unwrap();
        assert!(removed.is_some());
        assert_eq!(vm.nic_count(), 0);
        assert!(host.live_adapters().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_attach_leaves_one_record() {
        let (_guest, _host, vm) = uvm(GuestOs::Linux);
        let vm = Arc::new(vm);
        let ep = endpoint("eth-test", "ns-1");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let vm = vm.clone();
            let ep = ep.clone();
            tasks.push(tokio::spawn(async move {
                vm.add_endpoint_to_ns_with_id("c1", "ns-1", "A", &ep, &CancellationToken::new())
                    .await
            }));
        }

        let mut ok = 0;
        for t in tasks {
            if t.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(vm.nic_count(), 1);
    }
}
