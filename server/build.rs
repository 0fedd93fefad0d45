//! Build script for uvmagent-server
//!
//! Generates the ComputeAgent service glue. Messages are hand-written
//! prost structs in `src/api.rs`, so no protoc is needed.

use tonic_build::manual::{Builder, Method, Service};

fn method(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::api::{}", input))
        .output_type(format!("crate::api::{}", output))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    let service = Service::builder()
        .name("ComputeAgent")
        .package("computeagent.v1")
        .method(method(
            "add_nic",
            "AddNIC",
            "AddNicInternalRequest",
            "AddNicInternalResponse",
        ))
        .method(method(
            "delete_nic",
            "DeleteNIC",
            "DeleteNicInternalRequest",
            "DeleteNicInternalResponse",
        ))
        .build();

    Builder::new().compile(&[service]);

    println!("cargo:rerun-if-changed=build.rs");
}
