//! Core model and wire helpers shared by the collector agent and the
//! aggregator server: the transport metric type with its merge rules, the
//! payload codec (gzip, HMAC-SHA256 tag, RSA envelope) and the gRPC
//! bindings for the batch exchange service.

// Forbid unsafe code outside of tests
#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(missing_docs)]

pub mod codec;
pub mod proto;

mod error;
pub use error::*;

mod metric;
pub use metric::*;
