//! Wire types for the mesh's gRPC surfaces.
//!
//! The modules under [`weft`] are vendored `prost`/`tonic` output for the
//! protobufs in `proto/`, checked in so that builds do not require `protoc`.
//! Keep edits to the `.proto` sources and regenerate; do not patch the
//! generated files by hand.

#![forbid(unsafe_code)]

pub mod weft {
    pub mod registry {
        pub mod v1 {
            include!("gen/weft.registry.v1.rs");
        }
    }

    pub mod discovery {
        pub mod v1 {
            include!("gen/weft.discovery.v1.rs");
        }
    }
}

pub use self::weft::{discovery, registry};
