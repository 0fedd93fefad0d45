//! gRPC server setup for the ComputeAgent service.
//!
//! Listens on a per-VM Unix domain socket. Startup is split in two so the
//! caller learns about address conflicts before anything is served:
//! `ComputeAgentServer::bind` claims the socket, `BoundComputeAgent::serve`
//! starts the accept loop and returns a handle to stop or await it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use uvmagent_core::error::{AgentError, Result};

use crate::api::compute_agent_server::ComputeAgentServer as ComputeAgentGrpc;
use crate::service::ComputeAgentService;

/// File name prefix of compute agent sockets.
pub const COMPUTE_AGENT_SOCKET_PREFIX: &str = "computeagent";

/// Socket the compute agent for `vm_id` listens on.
pub fn compute_agent_address(socket_dir: &Path, vm_id: &str) -> PathBuf {
    socket_dir.join(format!("{}-{}.sock", COMPUTE_AGENT_SOCKET_PREFIX, vm_id))
}

/// Decide whether an accept error means the listener was closed under us.
///
/// Returns `Ok(())` for a closed listener, which ends serving cleanly, and
/// the error itself otherwise.
pub fn trap_closed_conn_err(err: io::Error) -> io::Result<()> {
    if err.raw_os_error() == Some(libc::EBADF)
        || err.kind() == io::ErrorKind::NotConnected
        || err.to_string().contains("use of closed network connection")
    {
        return Ok(());
    }
    Err(err)
}

type FailureSlot = Arc<Mutex<Option<String>>>;

/// End `incoming` at the first accept error, remembering it unless it only
/// says the listener is closed.
fn guard_incoming<S, IO>(
    incoming: S,
    failure: FailureSlot,
) -> impl Stream<Item = io::Result<IO>>
where
    S: Stream<Item = io::Result<IO>>,
{
    incoming.scan(failure, |failure, conn| {
        let item = match conn {
            conn @ Ok(_) => Some(conn),
            Err(e) => {
                match trap_closed_conn_err(e) {
                    Ok(()) => tracing::debug!("Listener closed, stopping accept loop"),
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        *failure.lock() = Some(e.to_string());
                    }
                }
                None
            }
        };
        futures::future::ready(item)
    })
}

/// Compute agent server that has not claimed its socket yet.
pub struct ComputeAgentServer {
    /// Path to the Unix domain socket.
    socket_path: PathBuf,
    service: ComputeAgentService,
}

impl ComputeAgentServer {
    pub fn new(socket_path: PathBuf, service: ComputeAgentService) -> Self {
        Self {
            socket_path,
            service,
        }
    }

    /// Server for `vm_id` at its conventional address under `socket_dir`.
    pub fn for_vm(socket_dir: &Path, vm_id: &str, service: ComputeAgentService) -> Self {
        Self::new(compute_agent_address(socket_dir, vm_id), service)
    }

    pub fn address(&self) -> &Path {
        &self.socket_path
    }

    /// Claim the socket.
    ///
    /// Fails with `BindFailure` if another server is accepting on it. A
    /// leftover socket file nobody listens on is replaced.
    pub async fn bind(self) -> Result<BoundComputeAgent> {
        let address = self.socket_path.display().to_string();
        let bind_failure = |message: String| AgentError::BindFailure {
            address: address.clone(),
            message,
        };

        // Ensure parent directory exists
        if let Some(parent) = self.socket_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| bind_failure(format!("failed to create socket directory: {}", e)))?;
        }

        if self.socket_path.exists() {
            if UnixStream::connect(&self.socket_path).await.is_ok() {
                return Err(bind_failure("address already in use".to_string()));
            }
            tracing::debug!(address = %address, "Removing stale socket");
            tokio::fs::remove_file(&self.socket_path)
                .await
                .map_err(|e| bind_failure(format!("failed to remove stale socket: {}", e)))?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| bind_failure(e.to_string()))?;

        tracing::info!(address = %address, "Compute agent listening");

        Ok(BoundComputeAgent {
            socket_path: self.socket_path,
            listener,
            service: self.service,
        })
    }
}

/// Compute agent holding its socket, not yet serving.
#[derive(Debug)]
pub struct BoundComputeAgent {
    socket_path: PathBuf,
    listener: UnixListener,
    service: ComputeAgentService,
}

impl BoundComputeAgent {
    pub fn address(&self) -> &Path {
        &self.socket_path
    }

    /// Start serving on a background task.
    pub fn serve(self) -> ComputeAgentHandle {
        let incoming = UnixListenerStream::new(self.listener);
        spawn_serve(self.socket_path, self.service, incoming)
    }
}

fn spawn_serve<S>(
    socket_path: PathBuf,
    service: ComputeAgentService,
    incoming: S,
) -> ComputeAgentHandle
where
    S: Stream<Item = io::Result<UnixStream>> + Send + 'static,
{
    let shutdown = CancellationToken::new();
    let failure: FailureSlot = Arc::new(Mutex::new(None));
    let incoming = guard_incoming(incoming, failure.clone());

    let signal = shutdown.clone();
    let address = socket_path.clone();
    let task = tokio::spawn(async move {
        let served = Server::builder()
            .add_service(ComputeAgentGrpc::new(service))
            .serve_with_incoming_shutdown(incoming, async move { signal.cancelled().await })
            .await;

        remove_socket(&address).await;

        if let Err(e) = served {
            tracing::error!(address = %address.display(), error = %e, "Compute agent serve failed");
            return Err(AgentError::ServeFailure(e.to_string()));
        }
        let accept_failure = failure.lock().take();
        if let Some(message) = accept_failure {
            tracing::error!(address = %address.display(), error = %message, "Compute agent stopped accepting");
            return Err(AgentError::ServeFailure(message));
        }

        tracing::info!(address = %address.display(), "Compute agent stopped");
        Ok(())
    });

    ComputeAgentHandle {
        socket_path,
        shutdown,
        task,
    }
}

/// Remove the socket file once serving has ended. Already gone is fine.
async fn remove_socket(address: &Path) -> bool {
    match tokio::fs::remove_file(address).await {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!(address = %address.display(), error = %e, "Failed to remove socket");
            false
        }
    }
}

/// A serving compute agent.
pub struct ComputeAgentHandle {
    socket_path: PathBuf,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl ComputeAgentHandle {
    pub fn address(&self) -> &Path {
        &self.socket_path
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting and let in-flight calls finish.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for serving to end.
    ///
    /// `Ok` after a shutdown or a closed listener; `ServeFailure` if the
    /// transport failed.
    pub async fn wait(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(AgentError::ServeFailure(format!("serve task failed: {}", e))),
        }
    }

    pub async fn shutdown_and_wait(self) -> Result<()> {
        self.shutdown();
        self.wait().await
    }
}
