//! Generated protobuf code
//!
//! The modules below are generated at build time by tonic-build from the
//! definitions under `proto/`.

pub mod ncproxygrpc {
    /// Legacy control surface, served through the compatibility shim.
    pub mod v0 {
        tonic::include_proto!("ncproxygrpc.v0");
    }

    /// Current control surface.
    pub mod v1 {
        tonic::include_proto!("ncproxygrpc.v1");
    }
}

/// Agent-management surface served on the local socket.
pub mod ncproxyinternal {
    tonic::include_proto!("ncproxyinternal");
}

/// Outbound protocol spoken to each compute agent.
pub mod computeagent {
    tonic::include_proto!("computeagent");
}

pub mod nodenetsvc {
    pub mod v1 {
        tonic::include_proto!("nodenetsvc.v1");
    }
}
