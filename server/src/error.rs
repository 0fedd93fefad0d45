//! gRPC error conversions.

use tonic::Status;
use uvmagent_core::error::AgentError;

/// Convert an AgentError to a gRPC Status.
///
/// The code comes from the innermost error; the message keeps any context
/// the caller added.
pub fn agent_error_to_status(err: AgentError) -> Status {
    let message = err.to_string();
    match err.root() {
        AgentError::EndpointNotFound { .. } => Status::not_found(message),
        AgentError::NicAlreadyAttached { .. } => Status::already_exists(message),
        AgentError::InvalidRequest(_) => Status::invalid_argument(message),
        AgentError::ShareError { .. } => Status::failed_precondition(message),
        AgentError::Timeout(_) => Status::deadline_exceeded(message),
        AgentError::Cancelled(_) => Status::cancelled(message),
        AgentError::GuestCommunication { .. } => Status::unavailable(message),
        _ => Status::internal(message),
    }
}
