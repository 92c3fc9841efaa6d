//! gRPC bindings for the `transport.MicroService` batch exchange.
//!
//! The bindings are committed rather than generated at build time so the
//! workspace builds without `protoc`; `proto/transport.proto` at the
//! repository root is the source of truth. Regenerate with `tonic-build`
//! after editing the proto.

#[allow(clippy::all, missing_docs)]
pub mod transport;
