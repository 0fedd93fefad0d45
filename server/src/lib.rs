//! UVM Agent Server - ComputeAgent gRPC service.
//!
//! Serves AddNIC/DeleteNIC for one Utility VM over a Unix domain socket
//! and delegates to the runtime's endpoint attachment.

pub mod api;
pub mod error;
pub mod server;
pub mod service;

pub use error::agent_error_to_status;
pub use server::{
    compute_agent_address, trap_closed_conn_err, BoundComputeAgent, ComputeAgentHandle,
    ComputeAgentServer, COMPUTE_AGENT_SOCKET_PREFIX,
};
pub use service::ComputeAgentService;
