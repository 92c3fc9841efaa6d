//! Shared runtime for the metrics pipeline agents: settings loading, the
//! agent lifecycle trait, the metric repository with its in-memory and
//! relational variants, the deadline-bounded service façade, the snapshot
//! loop and process self-telemetry.

// Forbid unsafe code outside of tests
#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(missing_docs)]

pub mod macros;
pub mod settings;
pub mod storage;

/// Base trait for an agent
mod agent;
pub use agent::*;

mod service;
pub use service::*;

mod shutdown;
pub use shutdown::*;

mod snapshot;
pub use snapshot::*;

mod telemetry;
pub use telemetry::*;
