//! The aggregator receives metric batches over HTTP and gRPC, merges them
//! into the repository (in-memory or Postgres), keeps a durable snapshot on
//! disk and answers read queries for individual metrics or the whole set.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod grpc;
pub mod http;
pub mod settings;

/// Tolerant wire parsing shared by the ingest paths.
pub mod ingest;
