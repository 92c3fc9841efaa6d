//! The collector agent samples runtime and host statistics on a timer and
//! ships them to the aggregator as signed, compressed (and optionally
//! encrypted) batches over HTTP or gRPC, with adaptive retries.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eyre::Result;

use collector_base::agent_main;

use crate::agent::Collector;

mod agent;
mod monitor;
mod sampler;
mod settings;
mod shipper;
mod sink;

#[tokio::main]
async fn main() -> Result<()> {
    agent_main::<Collector>().await
}
