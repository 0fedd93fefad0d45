//! Host compute system: hot-add and hot-remove of VM virtual hardware.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use uvmagent_core::error::{AgentError, Result};
use uvmagent_core::host::HostModifyRequest;

use crate::uds::post_json;

pub const HOST_MODIFY_ROUTE: &str = "/modify";

/// Host-side VM configuration changes.
#[async_trait]
pub trait ComputeSystem: Send + Sync {
    async fn modify(&self, request: &HostModifyRequest) -> Result<()>;
}

/// Compute system reached over the VMM's Unix control socket.
#[derive(Debug, Clone)]
pub struct UnixComputeSystem {
    socket_path: PathBuf,
    timeout: Duration,
}

impl UnixComputeSystem {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

#[async_trait]
impl ComputeSystem for UnixComputeSystem {
    async fn modify(&self, request: &HostModifyRequest) -> Result<()> {
        tracing::debug!(kind = request.kind(), "Sending host modify request");

        let response = tokio::time::timeout(
            self.timeout,
            post_json(&self.socket_path, HOST_MODIFY_ROUTE, request),
        )
        .await
        .map_err(|_| {
            AgentError::Timeout(format!("host {} after {:?}", request.kind(), self.timeout))
        })?
        .map_err(|e| AgentError::HostModify {
            message: format!(
                "compute system {} unreachable: {}",
                self.socket_path.display(),
                e
            ),
        })?;

        if !response.is_success() {
            return Err(AgentError::HostModify {
                message: format!(
                    "{} rejected ({}): {}",
                    request.kind(),
                    response.status,
                    response.body_excerpt()
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uds::test_server::respond_once;

    #[tokio::test]
    async fn test_modify_sends_tagged_json() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("host.sock");
        let server = respond_once(&socket, 200, "");

        let host = UnixComputeSystem::new(&socket, Duration::from_secs(5));
        host.modify(&HostModifyRequest::RemoveNetworkAdapter {
            nic_id: "nic-1".to_string(),
        })
        .await
        .unwrap();

        let body: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(body["type"], "remove_network_adapter");
        assert_eq!(body["nic_id"], "nic-1");
    }

    #[tokio::test]
    async fn test_modify_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("host.sock");
        let _server = respond_once(&socket, 409, "share exists");

        let host = UnixComputeSystem::new(&socket, Duration::from_secs(5));
        let err = host
            .modify(&HostModifyRequest::RemoveVsmbShare {
                name: "s1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::HostModify { .. }));
        assert!(err.to_string().contains("share exists"));
    }
}
