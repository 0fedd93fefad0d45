//! Guest-facing request types.
//!
//! `GuestResourceRequest` is the single message sent over the guest channel
//! to make the guest reflect a host-side resource change. The JSON shape
//! matches what the guest compute service expects (PascalCase fields).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operating system family of the guest, fixed at UVM construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GuestOs {
    /// Windows guest: shares via VSMB.
    Windows,
    /// Linux guest: shares via a Plan9 file server.
    #[default]
    Linux,
}

impl fmt::Display for GuestOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestOs::Windows => write!(f, "windows"),
            GuestOs::Linux => write!(f, "linux"),
        }
    }
}

impl FromStr for GuestOs {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "windows" => Ok(GuestOs::Windows),
            "linux" => Ok(GuestOs::Linux),
            _ => Err(format!(
                "unknown guest OS: '{}' (supported: windows, linux)",
                s
            )),
        }
    }
}

/// Kind of resource a guest request operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    MappedDirectory,
    Network,
}

/// Operation requested of the guest.
///
/// `Remove` may be retried safely; `Add` must never be sent twice for the
/// same resource without a `Remove` in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    /// Windows-only network pre-add, sent before the adapter is hot-added.
    PreAdd,
    Add,
    Remove,
}

impl RequestType {
    /// Whether resending this request after an ambiguous failure is safe.
    pub fn is_retry_safe(&self) -> bool {
        matches!(self, RequestType::Remove)
    }
}

/// Directory mapping as seen by the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MappedDirectory {
    /// Guest-visible location of the host share (VSMB path or Plan9 share name).
    pub host_path: String,
    /// Where the guest mounts the share.
    pub container_path: String,
    pub read_only: bool,
    /// Plan9 share name; absent for VSMB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_name: Option<String>,
    /// Plan9 vsock port; absent for VSMB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
}

/// Network adapter as seen by the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkAdapter {
    pub namespace_id: String,
    /// NIC ID, unique within the namespace.
    pub id: String,
    pub mac_address: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub prefix_length: u8,
    #[serde(default)]
    pub gateway_address: String,
    #[serde(default)]
    pub dns_suffix: String,
    #[serde(default)]
    pub dns_server_list: String,
}

/// Resource-specific settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceSettings {
    MappedDirectory(MappedDirectory),
    Network(NetworkAdapter),
}

/// Message sent to the guest over the guest channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GuestResourceRequest {
    pub resource_type: ResourceType,
    pub request_type: RequestType,
    pub settings: ResourceSettings,
}

impl GuestResourceRequest {
    pub fn mapped_directory(request_type: RequestType, settings: MappedDirectory) -> Self {
        Self {
            resource_type: ResourceType::MappedDirectory,
            request_type,
            settings: ResourceSettings::MappedDirectory(settings),
        }
    }

    pub fn network(request_type: RequestType, settings: NetworkAdapter) -> Self {
        Self {
            resource_type: ResourceType::Network,
            request_type,
            settings: ResourceSettings::Network(settings),
        }
    }
}
