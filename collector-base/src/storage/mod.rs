//! The metric repository: a keyed store of gauges and counters with an
//! in-memory and a relational (Postgres) variant behind one contract.

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;

mod entities;

mod memory;
pub use memory::MemoryStore;

mod sql;
pub use sql::SqlStore;

/// Errors surfaced by a repository variant.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The relational backend failed.
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
}

/// Backing-store contract shared by both variants. Entries are created on
/// first write and never deleted; deadlines are applied by the service
/// façade, not here.
#[async_trait]
pub trait MetricStore: Send + Sync + Debug {
    /// Record a gauge; the latest write wins.
    async fn add_gauge(&self, name: &str, value: f64) -> Result<(), StoreError>;

    /// Merge a counter and return the post-apply value. Ingest mode adds
    /// `delta` to the stored value; `replace` overwrites it and is only
    /// used by snapshot restore.
    async fn add_counter(&self, name: &str, delta: i64, replace: bool) -> Result<i64, StoreError>;

    /// The stored gauge reading, if any.
    async fn gauge(&self, name: &str) -> Result<Option<f64>, StoreError>;

    /// The stored counter value, if any.
    async fn counter(&self, name: &str) -> Result<Option<i64>, StoreError>;

    /// All gauges.
    async fn all_gauges(&self) -> Result<HashMap<String, f64>, StoreError>;

    /// All counters.
    async fn all_counters(&self) -> Result<HashMap<String, i64>, StoreError>;

    /// Apply a batch, preserving the given order within each kind (same-name
    /// counter entries accumulate in ingest mode).
    async fn apply(
        &self,
        gauges: &[(String, f64)],
        counters: &[(String, i64)],
        replace: bool,
    ) -> Result<(), StoreError>;

    /// Backend liveness.
    async fn ping(&self) -> Result<(), StoreError>;
}
