//! Utility VM handle: the attachment bookkeeping of one running guest.
//!
//! The VM itself is created and destroyed elsewhere. This type owns the
//! record of which NICs and shares are attached and is the only place
//! those records change.
//!
//! Locking: `state` is held only for bookkeeping mutations, never across
//! a guest or host call. Operations on the same resource identity are
//! serialized with `resource_locks` instead.

mod network;
mod plan9;
mod share;
mod vsmb;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uvmagent_core::error::{AgentError, Result};
use uvmagent_core::guest::{GuestOs, GuestResourceRequest};
use uvmagent_core::host::HostModifyRequest;
use uvmagent_core::network::NicAttachment;

use crate::guest::GuestChannel;
use crate::host::ComputeSystem;
use crate::sync::{cancellable, KeyedLock};

pub use plan9::{Plan9Share, PLAN9_PORT};
pub use vsmb::{VsmbShare, VSMB_PATH_PREFIX};

/// Mutable attachment state, guarded by the VM lock.
#[derive(Debug, Default)]
struct UvmState {
    /// namespace_id → nic_id → attachment
    namespaces: HashMap<String, HashMap<String, NicAttachment>>,
    vsmb_shares: HashMap<vsmb::VsmbKey, VsmbShare>,
    /// guest path → VSMB share mapped there
    vsmb_mappings: HashMap<String, vsmb::VsmbKey>,
    /// guest path → share
    plan9_shares: HashMap<String, Plan9Share>,
    vsmb_counter: u64,
    plan9_counter: u64,
}

/// A running Utility VM.
pub struct UtilityVM {
    id: String,
    os: GuestOs,
    /// GUID used in guest-visible VSMB paths.
    vsmb_guid: String,
    guest: Arc<dyn GuestChannel>,
    host: Arc<dyn ComputeSystem>,
    state: Mutex<UvmState>,
    resource_locks: KeyedLock,
}

impl UtilityVM {
    pub fn new(
        id: impl Into<String>,
        os: GuestOs,
        guest: Arc<dyn GuestChannel>,
        host: Arc<dyn ComputeSystem>,
    ) -> Self {
        Self {
            id: id.into(),
            os,
            vsmb_guid: uuid::Uuid::new_v4().to_string(),
            guest,
            host,
            state: Mutex::new(UvmState::default()),
            resource_locks: KeyedLock::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn os(&self) -> GuestOs {
        self.os
    }

    /// Snapshot of all live NIC attachments.
    pub fn nic_attachments(&self) -> Vec<NicAttachment> {
        let state = self.state.lock();
        state
            .namespaces
            .values()
            .flat_map(|nics| nics.values().cloned())
            .collect()
    }

    pub fn nic_count(&self) -> usize {
        let state = self.state.lock();
        state.namespaces.values().map(HashMap::len).sum()
    }

    /// Snapshot of the VSMB shares currently allocated on the host.
    pub fn vsmb_shares(&self) -> Vec<VsmbShare> {
        self.state.lock().vsmb_shares.values().cloned().collect()
    }

    /// Snapshot of the Plan9 shares currently allocated on the host.
    pub fn plan9_shares(&self) -> Vec<Plan9Share> {
        self.state.lock().plan9_shares.values().cloned().collect()
    }

    /// Total host-side share objects, regardless of mechanism.
    pub fn share_count(&self) -> usize {
        let state = self.state.lock();
        state.vsmb_shares.len() + state.plan9_shares.len()
    }

    async fn guest_request(
        &self,
        request: &GuestResourceRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancellable(cancel, "guest request", self.guest.send(request)).await
    }

    async fn host_modify(
        &self,
        request: &HostModifyRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancellable(cancel, "host modify", self.host.modify(request)).await
    }

    /// Host `Add` that sends `undo` if its outcome is unknown.
    ///
    /// A timed-out or cancelled `Add` may still have been applied by the
    /// host, and nothing records it, so the matching remove is sent before
    /// the error is returned.
    async fn host_add(
        &self,
        add: &HostModifyRequest,
        undo: HostModifyRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let result = self.host_modify(add, cancel).await;
        if let Err(e) = &result {
            if is_ambiguous(e) {
                tracing::warn!(
                    vm_id = %self.id,
                    kind = add.kind(),
                    error = %e,
                    "Host add outcome unknown, releasing"
                );
                self.host_release(&undo).await;
            }
        }
        result
    }

    /// Undo a host-side allocation. Runs even after cancellation.
    async fn host_release(&self, request: &HostModifyRequest) {
        if let Err(e) = self.host.modify(request).await {
            tracing::error!(
                vm_id = %self.id,
                kind = request.kind(),
                error = %e,
                "Compensating release failed; host resource may be leaked"
            );
        }
    }

    /// Best-effort guest `Remove` after an `Add` whose outcome is unknown.
    async fn guest_undo_if_ambiguous(&self, err: &AgentError, undo: &GuestResourceRequest) {
        if !is_ambiguous(err) {
            return;
        }
        debug_assert!(undo.request_type.is_retry_safe());
        if let Err(e) = self.guest.send(undo).await {
            tracing::warn!(vm_id = %self.id, error = %e, "Guest cleanup after ambiguous add failed");
        }
    }
}

/// Whether a failed request may still have taken effect.
fn is_ambiguous(err: &AgentError) -> bool {
    matches!(err.root(), AgentError::Timeout(_) | AgentError::Cancelled(_))
}

impl std::fmt::Debug for UtilityVM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtilityVM")
            .field("id", &self.id)
            .field("os", &self.os)
            .finish_non_exhaustive()
    }
}
