use std::sync::Arc;

use collector_core::{Batch, Metric};
use parking_lot::Mutex;

/// Runtime readings taken by a sampling worker.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuntimeStats {
    /// Resident set size, bytes.
    pub resident: f64,
    /// Virtual memory size, bytes.
    pub virt: f64,
    /// Fresh draw for the `RandomValue` gauge.
    pub random_value: f64,
}

/// Host readings taken by a sampling worker.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostStats {
    /// Total physical memory, bytes.
    pub total_memory: f64,
    /// Free physical memory, bytes.
    pub free_memory: f64,
    /// CPU utilisation summed over cores, percent.
    pub cpu_utilization: f64,
}

/// The gauge slots of one sample. The slot names mirror the wire contract;
/// slots without a process analog on this runtime stay at zero so the
/// series remain present for consumers keyed on the full set.
#[derive(Clone, Debug, Default)]
struct Slots {
    alloc: f64,
    buck_hash_sys: f64,
    frees: f64,
    gc_cpu_fraction: f64,
    gc_sys: f64,
    heap_alloc: f64,
    heap_idle: f64,
    heap_inuse: f64,
    heap_objects: f64,
    heap_released: f64,
    heap_sys: f64,
    last_gc: f64,
    lookups: f64,
    m_cache_inuse: f64,
    m_cache_sys: f64,
    m_span_inuse: f64,
    m_span_sys: f64,
    mallocs: f64,
    next_gc: f64,
    num_forced_gc: f64,
    num_gc: f64,
    other_sys: f64,
    pause_total_ns: f64,
    stack_inuse: f64,
    stack_sys: f64,
    sys: f64,
    total_alloc: f64,

    total_memory: f64,
    free_memory: f64,
    cpu_utilization: f64,

    random_value: f64,
    poll_count: i64,
}

/// The agent's sampling buffer: written by the sampling workers, read by
/// the shipper. A single mutex guards all slots; readers snapshot by value
/// and never hold the lock across I/O.
#[derive(Debug, Default)]
pub struct Monitor {
    slots: Mutex<Slots>,
}

impl Monitor {
    /// A zeroed monitor.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a runtime sample; bumps `PollCount` and refreshes
    /// `RandomValue` as part of the same tick.
    pub fn record_runtime(&self, stats: RuntimeStats) {
        let mut slots = self.slots.lock();
        slots.alloc = stats.resident;
        slots.heap_alloc = stats.resident;
        slots.heap_inuse = stats.resident;
        slots.heap_sys = stats.virt;
        slots.heap_idle = (stats.virt - stats.resident).max(0.0);
        slots.sys = stats.virt;
        slots.total_alloc = slots.total_alloc.max(stats.resident);
        slots.random_value = stats.random_value;
        slots.poll_count += 1;
    }

    /// Record a host sample.
    pub fn record_host(&self, stats: HostStats) {
        let mut slots = self.slots.lock();
        slots.total_memory = stats.total_memory;
        slots.free_memory = stats.free_memory;
        slots.cpu_utilization = stats.cpu_utilization;
    }

    /// The current `PollCount`.
    pub fn poll_count(&self) -> i64 {
        self.slots.lock().poll_count
    }

    /// The current `RandomValue`.
    pub fn random_value(&self) -> f64 {
        self.slots.lock().random_value
    }

    /// Snapshot the buffer as a batch: `PollCount` first, then every gauge
    /// in a fixed order.
    pub fn snapshot(&self) -> Batch {
        let s = self.slots.lock().clone();
        vec![
            Metric::counter("PollCount", s.poll_count),
            Metric::gauge("Alloc", s.alloc),
            Metric::gauge("BuckHashSys", s.buck_hash_sys),
            Metric::gauge("Frees", s.frees),
            Metric::gauge("GCCPUFraction", s.gc_cpu_fraction),
            Metric::gauge("GCSys", s.gc_sys),
            Metric::gauge("HeapAlloc", s.heap_alloc),
            Metric::gauge("HeapIdle", s.heap_idle),
            Metric::gauge("HeapInuse", s.heap_inuse),
            Metric::gauge("HeapObjects", s.heap_objects),
            Metric::gauge("HeapReleased", s.heap_released),
            Metric::gauge("HeapSys", s.heap_sys),
            Metric::gauge("LastGC", s.last_gc),
            Metric::gauge("Lookups", s.lookups),
            Metric::gauge("MCacheInuse", s.m_cache_inuse),
            Metric::gauge("MCacheSys", s.m_cache_sys),
            Metric::gauge("MSpanInuse", s.m_span_inuse),
            Metric::gauge("MSpanSys", s.m_span_sys),
            Metric::gauge("Mallocs", s.mallocs),
            Metric::gauge("NextGC", s.next_gc),
            Metric::gauge("NumForcedGC", s.num_forced_gc),
            Metric::gauge("NumGC", s.num_gc),
            Metric::gauge("OtherSys", s.other_sys),
            Metric::gauge("PauseTotalNs", s.pause_total_ns),
            Metric::gauge("StackInuse", s.stack_inuse),
            Metric::gauge("StackSys", s.stack_sys),
            Metric::gauge("Sys", s.sys),
            Metric::gauge("TotalAlloc", s.total_alloc),
            Metric::gauge("TotalMemory", s.total_memory),
            Metric::gauge("FreeMemory", s.free_memory),
            Metric::gauge("CPUutilization1", s.cpu_utilization),
            Metric::gauge("RandomValue", s.random_value),
        ]
    }
}

#[cfg(test)]
mod test {
    use collector_core::MetricKind;

    use super::*;

    #[test]
    fn poll_count_leads_the_snapshot() {
        let monitor = Monitor::new();
        let batch = monitor.snapshot();
        assert_eq!(batch[0].name, "PollCount");
        assert_eq!(batch[0].kind, MetricKind::Counter);
        assert!(batch[1..].iter().all(|m| m.kind == MetricKind::Gauge));
    }

    #[test]
    fn snapshot_carries_the_full_gauge_set() {
        let monitor = Monitor::new();
        let batch = monitor.snapshot();
        // PollCount plus 31 gauges.
        assert_eq!(batch.len(), 32);
        for name in ["TotalMemory", "FreeMemory", "CPUutilization1", "RandomValue"] {
            assert!(batch.iter().any(|m| m.name == name), "{name} missing");
        }
        assert_eq!(batch.last().unwrap().name, "RandomValue");
    }

    #[test]
    fn runtime_samples_accumulate_poll_count() {
        let monitor = Monitor::new();
        monitor.record_runtime(RuntimeStats {
            resident: 100.0,
            virt: 400.0,
            random_value: 1.0,
        });
        monitor.record_runtime(RuntimeStats {
            resident: 200.0,
            virt: 400.0,
            random_value: 2.0,
        });
        assert_eq!(monitor.poll_count(), 2);
        assert_eq!(monitor.random_value(), 2.0);

        let batch = monitor.snapshot();
        let alloc = batch.iter().find(|m| m.name == "Alloc").unwrap();
        assert_eq!(alloc.value, Some(200.0));
        let idle = batch.iter().find(|m| m.name == "HeapIdle").unwrap();
        assert_eq!(idle.value, Some(200.0));
    }

    #[test]
    fn host_samples_land_in_their_slots() {
        let monitor = Monitor::new();
        monitor.record_host(HostStats {
            total_memory: 16.0,
            free_memory: 8.0,
            cpu_utilization: 42.0,
        });
        let batch = monitor.snapshot();
        let total = batch.iter().find(|m| m.name == "TotalMemory").unwrap();
        assert_eq!(total.value, Some(16.0));
        assert_eq!(monitor.poll_count(), 0);
    }
}
