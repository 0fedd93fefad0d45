use thiserror::Error;

/// UVM agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Named network endpoint does not exist
    #[error("Endpoint not found: {name}")]
    EndpointNotFound { name: String },

    /// A NIC with this ID is already attached (or attaching) in the namespace
    #[error("NIC {nic_id} already attached to namespace {namespace_id}")]
    NicAlreadyAttached {
        namespace_id: String,
        nic_id: String,
    },

    /// The guest rejected a request or could not be reached
    #[error("Guest communication error: {message}")]
    GuestCommunication { message: String },

    /// The host compute system rejected a modify request
    #[error("Host modify error: {message}")]
    HostModify { message: String },

    /// Share setup failed for a host path
    #[error("Share error: {path} - {message}")]
    ShareError { path: String, message: String },

    /// RPC address could not be bound
    #[error("Failed to bind {address}: {message}")]
    BindFailure { address: String, message: String },

    /// Serve loop hit an unrecoverable transport error
    #[error("Serve failure: {0}")]
    ServeFailure(String),

    /// Request is missing required fields
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The caller cancelled the operation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error with a caller-supplied prefix
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<AgentError>,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Wrap this error with a description of what was being attempted.
    pub fn context(self, context: impl Into<String>) -> Self {
        AgentError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers.
    pub fn root(&self) -> &AgentError {
        match self {
            AgentError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for AgentError {
    fn from(err: serde_yaml::Error) -> Self {
        AgentError::SerializationError(err.to_string())
    }
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_not_found_display() {
        let error = AgentError::EndpointNotFound {
            name: "eth-test".to_string(),
        };
        assert_eq!(error.to_string(), "Endpoint not found: eth-test");
    }

    #[test]
    fn test_nic_already_attached_display() {
        let error = AgentError::NicAlreadyAttached {
            namespace_id: "ns-1".to_string(),
            nic_id: "nic-1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "NIC nic-1 already attached to namespace ns-1"
        );
    }

    #[test]
    fn test_guest_communication_display() {
        let error = AgentError::GuestCommunication {
            message: "connection reset".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Guest communication error: connection reset"
        );
    }

    #[test]
    fn test_bind_failure_display() {
        let error = AgentError::BindFailure {
            address: "/run/computeagent-vm1.sock".to_string(),
            message: "address in use".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to bind /run/computeagent-vm1.sock: address in use"
        );
    }

    #[test]
    fn test_share_error_display() {
        let error = AgentError::ShareError {
            path: "/data".to_string(),
            message: "not found".to_string(),
        };
        assert_eq!(error.to_string(), "Share error: /data - not found");
    }

    #[test]
    fn test_context_wraps_message() {
        let error = AgentError::EndpointNotFound {
            name: "eth0".to_string(),
        }
        .context("failed to get endpoint with name \"eth0\"");
        assert_eq!(
            error.to_string(),
            "failed to get endpoint with name \"eth0\": Endpoint not found: eth0"
        );
    }

    #[test]
    fn test_root_skips_nested_context() {
        let error = AgentError::Timeout("guest".to_string())
            .context("inner")
            .context("outer");
        assert!(matches!(error.root(), AgentError::Timeout(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AgentError = io_error.into();
        assert!(matches!(err, AgentError::IoError(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope");
        let err: AgentError = result.unwrap_err().into();
        assert!(matches!(err, AgentError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let err: AgentError = result.unwrap_err().into();
        assert!(matches!(err, AgentError::SerializationError(_)));
    }
}
