//! Entrypoint for the aggregator server.

#![forbid(unsafe_code)]

use eyre::Result;

use aggregator::agent::Aggregator;
use collector_base::agent_main;

#[tokio::main]
async fn main() -> Result<()> {
    agent_main::<Aggregator>().await
}
