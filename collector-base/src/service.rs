use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use collector_core::{Batch, Metric, MetricKind};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::storage::{MetricStore, StoreError};

/// Default per-call storage deadline, seconds.
pub const DEFAULT_STORE_DEADLINE_SECS: u64 = 10;

/// Errors surfaced by the service façade.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The requested metric is not in the store.
    #[error("metric not found")]
    NotFound,
    /// The storage deadline elapsed.
    #[error("storage deadline of {0:?} exceeded")]
    Timeout(Duration),
    /// The repository failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Snapshot file I/O failed.
    #[error("snapshot io: {0}")]
    Snapshot(#[from] std::io::Error),
    /// A snapshot line did not parse as a transport metric.
    #[error("snapshot line {line}: {source}")]
    SnapshotFormat {
        /// 1-based line number.
        line: usize,
        /// The underlying parse failure.
        source: serde_json::Error,
    },
}

/// Deadline-bounded façade over a repository. All storage calls are capped
/// by the configured per-call deadline; bulk reads come back as transport
/// metrics in a deterministic order (counters first, then gauges, both
/// name-sorted).
#[derive(Clone, Debug)]
pub struct MetricService {
    store: Arc<dyn MetricStore>,
    deadline: Duration,
}

impl MetricService {
    /// Wrap `store` with the given per-call deadline.
    pub fn new(store: Arc<dyn MetricStore>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    async fn bounded<T>(
        &self,
        op: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, ServiceError> {
        match timeout(self.deadline, op).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(ServiceError::Timeout(self.deadline)),
        }
    }

    /// Record a gauge reading.
    pub async fn add_gauge(&self, name: &str, value: f64) -> Result<(), ServiceError> {
        self.bounded(self.store.add_gauge(name, value)).await
    }

    /// Merge a counter and return the post-apply value.
    pub async fn add_counter(
        &self,
        name: &str,
        delta: i64,
        replace: bool,
    ) -> Result<i64, ServiceError> {
        self.bounded(self.store.add_counter(name, delta, replace))
            .await
    }

    /// Look up a gauge.
    pub async fn gauge(&self, name: &str) -> Result<f64, ServiceError> {
        self.bounded(self.store.gauge(name))
            .await?
            .ok_or(ServiceError::NotFound)
    }

    /// Look up a counter.
    pub async fn counter(&self, name: &str) -> Result<i64, ServiceError> {
        self.bounded(self.store.counter(name))
            .await?
            .ok_or(ServiceError::NotFound)
    }

    /// All gauges, keyed by name.
    pub async fn all_gauges(&self) -> Result<HashMap<String, f64>, ServiceError> {
        self.bounded(self.store.all_gauges()).await
    }

    /// All counters, keyed by name.
    pub async fn all_counters(&self) -> Result<HashMap<String, i64>, ServiceError> {
        self.bounded(self.store.all_counters()).await
    }

    /// The whole repository as transport metrics: counters first, then
    /// gauges, each kind name-sorted.
    pub async fn all_metrics(&self) -> Result<Batch, ServiceError> {
        let counters = self.all_counters().await?;
        let gauges = self.all_gauges().await?;

        let mut batch = Batch::with_capacity(counters.len() + gauges.len());
        let mut counters: Vec<_> = counters.into_iter().collect();
        counters.sort_by(|a, b| a.0.cmp(&b.0));
        batch.extend(
            counters
                .into_iter()
                .map(|(name, value)| Metric::counter(name, value)),
        );
        let mut gauges: Vec<_> = gauges.into_iter().collect();
        gauges.sort_by(|a, b| a.0.cmp(&b.0));
        batch.extend(
            gauges
                .into_iter()
                .map(|(name, value)| Metric::gauge(name, value)),
        );
        Ok(batch)
    }

    /// Commit a batch. Entry order is preserved within each kind, so
    /// repeated counter names accumulate in ingest mode; `replace` is the
    /// restore path.
    pub async fn apply_batch(&self, batch: &[Metric], replace: bool) -> Result<(), ServiceError> {
        let mut gauges = Vec::new();
        let mut counters = Vec::new();
        for metric in batch {
            match metric.kind {
                MetricKind::Gauge => {
                    if let Some(value) = metric.value {
                        gauges.push((metric.name.clone(), value));
                    }
                }
                MetricKind::Counter => {
                    if let Some(delta) = metric.delta {
                        counters.push((metric.name.clone(), delta));
                    }
                }
            }
        }
        self.bounded(self.store.apply(&gauges, &counters, replace))
            .await
    }

    /// Dump the repository to `path` as newline-delimited JSON, one
    /// transport metric per line, counters before gauges.
    #[instrument(skip(self))]
    pub async fn snapshot_to(&self, path: &Path) -> Result<(), ServiceError> {
        let batch = self.all_metrics().await?;
        let mut out = String::with_capacity(batch.len() * 64);
        for metric in &batch {
            // Metric serialization cannot fail; the map has string keys only.
            out.push_str(&serde_json::to_string(metric).expect("metric is serializable"));
            out.push('\n');
        }
        tokio::fs::write(path, out).await?;
        debug!(entries = batch.len(), "Wrote snapshot");
        Ok(())
    }

    /// Load a snapshot written by [`Self::snapshot_to`]. Counters are
    /// applied in replace mode so restoring is idempotent. A missing file
    /// is not an error; a fresh deployment simply has nothing to restore.
    #[instrument(skip(self))]
    pub async fn restore_from(&self, path: &Path) -> Result<(), ServiceError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "No snapshot to restore");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut batch = Batch::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let metric: Metric = serde_json::from_str(line)
                .map_err(|source| ServiceError::SnapshotFormat {
                    line: idx + 1,
                    source,
                })?;
            batch.push(metric);
        }
        let entries = batch.len();
        self.apply_batch(&batch, true).await?;
        debug!(entries, "Restored snapshot");
        Ok(())
    }

    /// Backend liveness.
    pub async fn ping(&self) -> Result<(), ServiceError> {
        self.bounded(self.store.ping()).await
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::storage::MemoryStore;

    fn service() -> MetricService {
        MetricService::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(DEFAULT_STORE_DEADLINE_SECS),
        )
    }

    #[tokio::test]
    async fn add_counter_returns_post_apply_value() {
        let svc = service();
        assert_eq!(svc.add_counter("PollCount", 3, false).await.unwrap(), 3);
        assert_eq!(svc.add_counter("PollCount", 5, false).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn missing_metric_is_not_found() {
        let svc = service();
        assert!(matches!(
            svc.gauge("nope").await,
            Err(ServiceError::NotFound)
        ));
        assert!(matches!(
            svc.counter("nope").await,
            Err(ServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn all_metrics_orders_counters_first_then_sorted_gauges() {
        let svc = service();
        svc.add_gauge("Sys", 3.0).await.unwrap();
        svc.add_gauge("Alloc", 1.5).await.unwrap();
        svc.add_counter("PollCount", 8, false).await.unwrap();

        let batch = svc.all_metrics().await.unwrap();
        let names: Vec<_> = batch.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["PollCount", "Alloc", "Sys"]);
        assert_eq!(batch[0].kind, MetricKind::Counter);
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let svc = service();
        svc.add_gauge("Alloc", 1.5).await.unwrap();
        svc.add_counter("PollCount", 8, false).await.unwrap();
        svc.snapshot_to(&path).await.unwrap();

        let restored = service();
        restored.restore_from(&path).await.unwrap();
        assert_eq!(restored.gauge("Alloc").await.unwrap(), 1.5);
        assert_eq!(restored.counter("PollCount").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn restore_is_idempotent_for_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let svc = service();
        svc.add_counter("PollCount", 8, false).await.unwrap();
        svc.snapshot_to(&path).await.unwrap();

        svc.restore_from(&path).await.unwrap();
        svc.restore_from(&path).await.unwrap();
        assert_eq!(svc.counter("PollCount").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn snapshot_lines_put_counters_before_gauges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let svc = service();
        svc.add_gauge("Alloc", 1.5).await.unwrap();
        svc.add_counter("PollCount", 8, false).await.unwrap();
        svc.snapshot_to(&path).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""type":"counter""#));
        assert!(lines[1].contains(r#""type":"gauge""#));
    }

    #[tokio::test]
    async fn restore_missing_file_is_ok() {
        let svc = service();
        svc.restore_from(Path::new("/definitely/not/here.json"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn malformed_snapshot_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(&path, "{\"id\":\"Ok\",\"type\":\"gauge\",\"value\":1}\nnot json\n")
            .unwrap();

        let svc = service();
        assert!(matches!(
            svc.restore_from(&path).await,
            Err(ServiceError::SnapshotFormat { line: 2, .. })
        ));
    }

    /// A store that never answers, to exercise the deadline.
    #[derive(Debug)]
    struct StuckStore;

    #[async_trait]
    impl MetricStore for StuckStore {
        async fn add_gauge(&self, _: &str, _: f64) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn add_counter(&self, _: &str, _: i64, _: bool) -> Result<i64, StoreError> {
            std::future::pending().await
        }
        async fn gauge(&self, _: &str) -> Result<Option<f64>, StoreError> {
            std::future::pending().await
        }
        async fn counter(&self, _: &str) -> Result<Option<i64>, StoreError> {
            std::future::pending().await
        }
        async fn all_gauges(&self) -> Result<HashMap<String, f64>, StoreError> {
            std::future::pending().await
        }
        async fn all_counters(&self) -> Result<HashMap<String, i64>, StoreError> {
            std::future::pending().await
        }
        async fn apply(
            &self,
            _: &[(String, f64)],
            _: &[(String, i64)],
            _: bool,
        ) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_storage_calls() {
        let svc = MetricService::new(Arc::new(StuckStore), Duration::from_secs(10));
        assert!(matches!(
            svc.add_gauge("Alloc", 1.0).await,
            Err(ServiceError::Timeout(_))
        ));
    }
}
