use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{MetricStore, StoreError};

/// The in-memory repository. The two kinds live under independent locks, so
/// a batch touching both is not observed atomically across kinds (callers
/// reject a bad batch before any mutation instead).
#[derive(Debug, Default)]
pub struct MemoryStore {
    gauges: Mutex<HashMap<String, f64>>,
    counters: Mutex<HashMap<String, i64>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn merge_counter(counters: &mut HashMap<String, i64>, name: &str, delta: i64, replace: bool) -> i64 {
        let slot = counters.entry(name.to_owned()).or_insert(0);
        if replace {
            *slot = delta;
        } else {
            *slot += delta;
        }
        *slot
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn add_gauge(&self, name: &str, value: f64) -> Result<(), StoreError> {
        self.gauges.lock().insert(name.to_owned(), value);
        Ok(())
    }

    async fn add_counter(&self, name: &str, delta: i64, replace: bool) -> Result<i64, StoreError> {
        Ok(Self::merge_counter(
            &mut self.counters.lock(),
            name,
            delta,
            replace,
        ))
    }

    async fn gauge(&self, name: &str) -> Result<Option<f64>, StoreError> {
        Ok(self.gauges.lock().get(name).copied())
    }

    async fn counter(&self, name: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.counters.lock().get(name).copied())
    }

    async fn all_gauges(&self) -> Result<HashMap<String, f64>, StoreError> {
        Ok(self.gauges.lock().clone())
    }

    async fn all_counters(&self) -> Result<HashMap<String, i64>, StoreError> {
        Ok(self.counters.lock().clone())
    }

    async fn apply(
        &self,
        gauges: &[(String, f64)],
        counters: &[(String, i64)],
        replace: bool,
    ) -> Result<(), StoreError> {
        {
            let mut stored = self.gauges.lock();
            for (name, value) in gauges {
                stored.insert(name.clone(), *value);
            }
        }
        {
            let mut stored = self.counters.lock();
            for (name, delta) in counters {
                Self::merge_counter(&mut stored, name, *delta, replace);
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn gauge_last_write_wins() {
        let store = MemoryStore::new();
        store.add_gauge("Alloc", 1.5).await.unwrap();
        store.add_gauge("Alloc", 2.25).await.unwrap();
        assert_eq!(store.gauge("Alloc").await.unwrap(), Some(2.25));
    }

    #[tokio::test]
    async fn counter_accumulates_deltas() {
        let store = MemoryStore::new();
        assert_eq!(store.add_counter("PollCount", 3, false).await.unwrap(), 3);
        assert_eq!(store.add_counter("PollCount", 5, false).await.unwrap(), 8);
        assert_eq!(store.counter("PollCount").await.unwrap(), Some(8));
    }

    #[tokio::test]
    async fn replace_overwrites_a_counter() {
        let store = MemoryStore::new();
        store.add_counter("PollCount", 41, false).await.unwrap();
        assert_eq!(store.add_counter("PollCount", 8, true).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn kinds_do_not_collide() {
        let store = MemoryStore::new();
        store.add_gauge("X", 1.0).await.unwrap();
        store.add_counter("X", 2, false).await.unwrap();
        assert_eq!(store.gauge("X").await.unwrap(), Some(1.0));
        assert_eq!(store.counter("X").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn batch_apply_accumulates_same_name_counters() {
        let store = MemoryStore::new();
        store
            .apply(
                &[("Alloc".into(), 1.5), ("Alloc".into(), 2.25)],
                &[("PollCount".into(), 3), ("PollCount".into(), 5)],
                false,
            )
            .await
            .unwrap();
        assert_eq!(store.gauge("Alloc").await.unwrap(), Some(2.25));
        assert_eq!(store.counter("PollCount").await.unwrap(), Some(8));
    }

    #[tokio::test]
    async fn missing_entries_read_as_none() {
        let store = MemoryStore::new();
        assert_eq!(store.gauge("nope").await.unwrap(), None);
        assert_eq!(store.counter("nope").await.unwrap(), None);
    }
}
