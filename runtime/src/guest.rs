//! Guest channel: synchronous resource requests to the running guest.
//!
//! A send blocks until the guest acknowledges, fails, or times out.
//! Delivery is not exactly-once, so callers never resend an `Add`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use uvmagent_core::error::{AgentError, Result};
use uvmagent_core::guest::GuestResourceRequest;

use crate::uds::post_json;

/// Route the guest compute service accepts resource requests on.
pub const GUEST_RESOURCE_ROUTE: &str = "/resource";

/// Transport to the guest.
#[async_trait]
pub trait GuestChannel: Send + Sync {
    /// Deliver one request and wait for the guest's verdict.
    async fn send(&self, request: &GuestResourceRequest) -> Result<()>;
}

/// Guest channel over a Unix socket bridged into the guest (vsock/hvsock).
///
/// Sends HTTP POST /resource requests with JSON-encoded
/// `GuestResourceRequest` bodies; any 2xx status is an acknowledgement.
#[derive(Debug, Clone)]
pub struct UnixGuestChannel {
    socket_path: PathBuf,
    timeout: Duration,
}

impl UnixGuestChannel {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    /// Get the socket path this channel sends to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

#[async_trait]
impl GuestChannel for UnixGuestChannel {
    async fn send(&self, request: &GuestResourceRequest) -> Result<()> {
        tracing::debug!(
            resource_type = ?request.resource_type,
            request_type = ?request.request_type,
            "Sending guest request"
        );

        let response = tokio::time::timeout(
            self.timeout,
            post_json(&self.socket_path, GUEST_RESOURCE_ROUTE, request),
        )
        .await
        .map_err(|_| {
            AgentError::Timeout(format!(
                "guest {:?} {:?} request after {:?}",
                request.request_type, request.resource_type, self.timeout
            ))
        })?
        .map_err(|e| AgentError::GuestCommunication {
            message: format!(
                "guest channel {} unreachable: {}",
                self.socket_path.display(),
                e
            ),
        })?;

        if !response.is_success() {
            return Err(AgentError::GuestCommunication {
                message: format!(
                    "guest rejected {:?} {:?} ({}): {}",
                    request.request_type,
                    request.resource_type,
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
    use uvmagent_core::guest::{MappedDirectory, RequestType};

    fn request() -> GuestResourceRequest {
        GuestResourceRequest::mapped_directory(
            RequestType::Add,
            MappedDirectory {
                host_path: "s1".to_string(),
                container_path: "/mnt/data".to_string(),
                read_only: false,
                share_name: Some("s1".to_string()),
                port: Some(564),
            },
        )
    }

    #[tokio::test]
    async fn test_send_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("guest.sock");
        let server = respond_once(&socket, 200, "");

        let channel = UnixGuestChannel::new(&socket, Duration::from_secs(5));
        channel.send(&request()).await.unwrap();

        let body = server.await.unwrap();
        let sent: GuestResourceRequest = serde_json::from_str(&body).unwrap();
        assert_eq!(sent, request());
    }

    #[tokio::test]
    async fn test_send_rejected_by_guest() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("guest.sock");
        let _server = respond_once(&socket, 500, "mount failed");

        let channel = UnixGuestChannel::new(&socket, Duration::from_secs(5));
        let err = channel.send(&request()).await.unwrap_err();
        match err {
            AgentError::GuestCommunication { message } => {
                assert!(message.contains("mount failed"));
                assert!(message.contains("500"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_send_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let channel =
            UnixGuestChannel::new(dir.path().join("missing.sock"), Duration::from_secs(1));
        let err = channel.send(&request()).await.unwrap_err();
        assert!(matches!(err, AgentError::GuestCommunication { .. }));
    }

    #[tokio::test]
    async fn test_send_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("guest.sock");
        // Accepts but never answers.
        let listener = tokio::net::UnixListener::bind(&socket).unwrap();
        let _hold = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let channel = UnixGuestChannel::new(&socket, Duration::from_millis(50));
        let err = channel.send(&request()).await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
    }
}
