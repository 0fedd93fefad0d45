//! ComputeAgent v1 wire types.
//!
//! Field numbers match `computeagent.v1`:
//!
//! ```text
//! service ComputeAgent {
//!     rpc AddNIC(AddNICInternalRequest) returns (AddNICInternalResponse);
//!     rpc DeleteNIC(DeleteNICInternalRequest) returns (DeleteNICInternalResponse);
//! }
//! ```

/// Attach the named endpoint to the UVM as NIC `nic_id`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddNicInternalRequest {
    #[prost(string, tag = "1")]
    pub container_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub nic_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub endpoint_name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddNicInternalResponse {}

/// Detach NIC `nic_id` that was attached from the named endpoint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteNicInternalRequest {
    #[prost(string, tag = "1")]
    pub container_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub nic_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub endpoint_name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteNicInternalResponse {}

include!(concat!(env!("OUT_DIR"), "/computeagent.v1.ComputeAgent.rs"));
