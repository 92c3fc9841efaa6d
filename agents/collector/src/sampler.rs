use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use rand::rngs::OsRng;
use rand::Rng;
use sysinfo::{CpuExt, ProcessExt, System, SystemExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info_span, instrument::Instrumented, trace, warn, Instrument};

use collector_base::ShutdownListener;

use crate::monitor::{HostStats, Monitor, RuntimeStats};

/// Upper bound (exclusive) for `RandomValue`.
const MAX_RANDOM: u64 = 1000;
/// The draw keeps 53 bits of CSPRNG output, the full mantissa of an f64.
const RANDOM_SHIFT: u32 = 53;

/// One unit of sampling work.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Job {
    /// Read process statistics, bump `PollCount`, redraw `RandomValue`.
    Runtime,
    /// Read host memory totals and per-core CPU utilisation.
    Host,
}

/// The timer-driven sampler. Every `poll_interval` it emits the two job
/// kinds into a bounded queue of width `rate_limit`, consumed by a worker
/// pool of the same width. A full queue blocks the producer, which couples
/// the sampling rate to the processing rate.
#[derive(Debug)]
pub struct Sampler {
    monitor: Arc<Monitor>,
    poll_interval: Duration,
    rate_limit: usize,
}

impl Sampler {
    /// New sampler over `monitor`.
    pub fn new(monitor: Arc<Monitor>, poll_interval: Duration, rate_limit: usize) -> Self {
        Self {
            monitor,
            poll_interval,
            rate_limit: rate_limit.max(1),
        }
    }

    /// Run until shutdown. The job queue is closed first; workers drain
    /// what is in flight and are joined before the task returns.
    pub fn spawn(self, mut shutdown: ShutdownListener) -> Instrumented<JoinHandle<Result<()>>> {
        let span = info_span!("sampler");
        tokio::spawn(async move {
            let (tx, rx) = mpsc::channel::<Job>(self.rate_limit);
            let rx = Arc::new(Mutex::new(rx));

            let workers: Vec<JoinHandle<()>> = (0..self.rate_limit)
                .map(|id| {
                    let monitor = self.monitor.clone();
                    let rx = rx.clone();
                    tokio::spawn(
                        worker(monitor, rx).instrument(info_span!("sample_worker", id)),
                    )
                })
                .collect();

            let mut ticker = interval_at(
                Instant::now() + self.poll_interval,
                self.poll_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        trace!("Dispatching sample jobs");
                        // A closed channel means every worker is gone.
                        if tx.send(Job::Runtime).await.is_err()
                            || tx.send(Job::Host).await.is_err()
                        {
                            warn!("Sample workers exited early");
                            break;
                        }
                    }
                }
            }

            drop(tx);
            for worker in workers {
                worker.await?;
            }
            debug!("Sampler drained");
            Ok(())
        })
        .instrument(span)
    }
}

async fn worker(monitor: Arc<Monitor>, rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
    let mut system = System::new();
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else { break };
        match job {
            Job::Runtime => monitor.record_runtime(read_runtime(&mut system)),
            Job::Host => monitor.record_host(read_host(&mut system)),
        }
    }
}

fn read_runtime(system: &mut System) -> RuntimeStats {
    let mut stats = RuntimeStats {
        random_value: random_value(),
        ..Default::default()
    };
    if let Ok(pid) = sysinfo::get_current_pid() {
        system.refresh_process(pid);
        if let Some(process) = system.process(pid) {
            stats.resident = process.memory() as f64;
            stats.virt = process.virtual_memory() as f64;
        }
    }
    stats
}

fn read_host(system: &mut System) -> HostStats {
    system.refresh_memory();
    // Utilisation is measured against the previous refresh; the first tick
    // reads as zero.
    system.refresh_cpu();
    HostStats {
        total_memory: system.total_memory() as f64,
        free_memory: system.free_memory() as f64,
        cpu_utilization: system.cpus().iter().map(|c| c.cpu_usage() as f64).sum(),
    }
}

/// A float in `[0, 1000)` derived from a 53-bit-shifted CSPRNG integer.
fn random_value() -> f64 {
    let raw = OsRng.gen_range(0..(MAX_RANDOM << RANDOM_SHIFT));
    raw as f64 / (1u64 << RANDOM_SHIFT) as f64
}
