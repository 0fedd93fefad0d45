//! Host-side compute system modify requests.
//!
//! These change the VM's virtual hardware (network adapters, VSMB and
//! Plan9 shares) before or after the guest is told about the change.

use serde::{Deserialize, Serialize};

/// VSMB share options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VsmbOptions {
    pub read_only: bool,
    pub share_read: bool,
    pub cache_io: bool,
    pub pseudo_oplocks: bool,
    pub take_backup_privilege: bool,
    pub no_direct_map: bool,
}

impl VsmbOptions {
    /// Default options for sharing a directory into the guest.
    pub fn default_for(read_only: bool) -> Self {
        Self {
            read_only,
            share_read: read_only,
            cache_io: read_only,
            pseudo_oplocks: true,
            take_backup_privilege: true,
            no_direct_map: false,
        }
    }
}

/// Plan9 share flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan9Flags {
    pub read_only: bool,
    /// Only `allowed_names` are reachable through the share.
    pub restrict_file_access: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_names: Vec<String>,
}

impl Plan9Flags {
    /// Whether `name`, a direct child of the share root, is reachable in the guest.
    pub fn is_visible(&self, name: &str) -> bool {
        !self.restrict_file_access || self.allowed_names.iter().any(|n| n == name)
    }
}

/// A modification of the VM's host-side configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostModifyRequest {
    AddNetworkAdapter {
        nic_id: String,
        endpoint_id: String,
        mac_address: String,
    },
    RemoveNetworkAdapter {
        nic_id: String,
    },
    AddVsmbShare {
        name: String,
        host_path: String,
        options: VsmbOptions,
    },
    RemoveVsmbShare {
        name: String,
    },
    AddPlan9Share {
        name: String,
        host_path: String,
        port: u32,
        flags: Plan9Flags,
    },
    RemovePlan9Share {
        name: String,
        port: u32,
    },
}

impl HostModifyRequest {
    /// Short name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            HostModifyRequest::AddNetworkAdapter { .. } => "add_network_adapter",
            HostModifyRequest::RemoveNetworkAdapter { .. } => "remove_network_adapter",
            HostModifyRequest::AddVsmbShare { .. } => "add_vsmb_share",
            HostModifyRequest::RemoveVsmbShare { .. } => "remove_vsmb_share",
            HostModifyRequest::AddPlan9Share { .. } => "add_plan9_share",
            HostModifyRequest::RemovePlan9Share { .. } => "remove_plan9_share",
        }
    }
}
