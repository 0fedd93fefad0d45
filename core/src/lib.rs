//! UVM Agent Core - Foundational Types
//!
//! Error taxonomy, configuration, and the data model shared by the
//! runtime (host and guest bookkeeping) and the compute agent server.

pub mod config;
pub mod error;
pub mod guest;
pub mod host;
pub mod network;
pub mod share;

// Re-export commonly used types
pub use config::{AgentConfig, LogFormat, LogLevel};
pub use error::{AgentError, Result};
pub use guest::{GuestOs, GuestResourceRequest, RequestType, ResourceType};
pub use host::{HostModifyRequest, Plan9Flags, VsmbOptions};
pub use network::{NetworkEndpoint, NicAttachment};
pub use share::{ShareMechanism, ShareRequest};

/// UVM agent version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
