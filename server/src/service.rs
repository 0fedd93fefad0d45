//! ComputeAgent service implementation.
//!
//! Validates requests and hands them to `EndpointAttachment`. Each call
//! runs on its own task: if the client goes away the task is cancelled
//! through its token and still finishes its rollback.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use uvmagent_core::error::{AgentError, Result};
use uvmagent_runtime::EndpointAttachment;

use crate::api::compute_agent_server::ComputeAgent;
use crate::api::*;
use crate::error::agent_error_to_status;

/// gRPC front end for NIC attachment on one UVM.
#[derive(Debug, Clone)]
pub struct ComputeAgentService {
    attachment: EndpointAttachment,
}

impl ComputeAgentService {
    pub fn new(attachment: EndpointAttachment) -> Self {
        Self { attachment }
    }
}

fn require(field: &str, value: &str) -> std::result::Result<(), Status> {
    if value.is_empty() {
        return Err(agent_error_to_status(AgentError::InvalidRequest(format!(
            "{} is required",
            field
        ))));
    }
    Ok(())
}

fn validate(
    container_id: &str,
    nic_id: &str,
    endpoint_name: &str,
) -> std::result::Result<(), Status> {
    require("container_id", container_id)?;
    require("nic_id", nic_id)?;
    require("endpoint_name", endpoint_name)
}

/// Run `op` on its own task, cancelling it if this future is dropped first.
async fn run_detached<F, Fut>(op: F) -> Result<()>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let result = tokio::spawn(op(cancel)).await;
    guard.disarm();

    match result {
        Ok(result) => result,
        Err(e) => Err(AgentError::Other(format!("request task failed: {}", e))),
    }
}

#[tonic::async_trait]
impl ComputeAgent for ComputeAgentService {
    async fn add_nic(
        &self,
        request: Request<AddNicInternalRequest>,
    ) -> std::result::Result<Response<AddNicInternalResponse>, Status> {
        let req = request.into_inner();
        validate(&req.container_id, &req.nic_id, &req.endpoint_name)?;

        tracing::info!(
            container_id = %req.container_id,
            nic_id = %req.nic_id,
            endpoint_name = %req.endpoint_name,
            "ComputeAgent AddNIC"
        );

        let attachment = self.attachment.clone();
        let endpoint_name = req.endpoint_name.clone();
        run_detached(move |cancel| async move {
            attachment
                .attach_nic(&req.container_id, &req.nic_id, &req.endpoint_name, &cancel)
                .await
                .map(|_| ())
        })
        .await
        .map_err(|e| {
            agent_error_to_status(e.context(format!(
                "failed to add endpoint {} to UVM",
                endpoint_name
            )))
        })?;

        Ok(Response::new(AddNicInternalResponse {}))
    }

    async fn delete_nic(
        &self,
        request: Request<DeleteNicInternalRequest>,
    ) -> std::result::Result<Response<DeleteNicInternalResponse>, Status> {
        let req = request.into_inner();
        validate(&req.container_id, &req.nic_id, &req.endpoint_name)?;

        tracing::info!(
            container_id = %req.container_id,
            nic_id = %req.nic_id,
            endpoint_name = %req.endpoint_name,
            "ComputeAgent DeleteNIC"
        );

        let attachment = self.attachment.clone();
        let endpoint_name = req.endpoint_name.clone();
        run_detached(move |cancel| async move {
            attachment
                .detach_nic(&req.container_id, &req.nic_id, &req.endpoint_name, &cancel)
                .await
        })
        .await
        .map_err(|e| {
            agent_error_to_status(e.context(format!(
                "failed to remove endpoint {} from UVM",
                endpoint_name
            )))
        })?;

        Ok(Response::new(DeleteNicInternalResponse {}))
    }
}
