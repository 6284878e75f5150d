//! Plugin control protocol (`mcpd.plugins.v1`).
//!
//! The generated protobuf/tonic code is vendored so builds do not require
//! `protoc`; regenerate with `tonic-build` when the protocol changes.

#[allow(
    missing_docs,
    unused_variables,
    dead_code,
    clippy::all,
    clippy::pedantic,
    clippy::arithmetic_side_effects
)]
pub mod v1 {
    include!("proto/mcpd.plugins.v1.rs");
}
