//! Build script for generating protobuf code
//!
//! Compiles the control, agent-management, compute agent and node network
//! service definitions under `proto/`. The vendored `protoc` is used so the
//! build does not depend on a system installation.

use std::path::PathBuf;

const PROTOS: &[&str] = &[
    "proto/ncproxygrpc/v0/networkconfigproxy.proto",
    "proto/ncproxygrpc/v1/networkconfigproxy.proto",
    "proto/ncproxyinternal/ncproxyinternal.proto",
    "proto/computeagent/computeagent.proto",
    "proto/nodenetsvc/v1/nodenetsvc.proto",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    for proto in PROTOS {
        println!("cargo:rerun-if-changed={proto}");
    }

    let protos: Vec<PathBuf> = PROTOS.iter().map(PathBuf::from).collect();
    // google/protobuf/any.proto ships with the vendored protoc
    let includes = [PathBuf::from("proto"), protoc_bin_vendored::include_path()?];

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&protos, &includes)?;

    Ok(())
}
