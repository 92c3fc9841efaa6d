use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info_span, instrument::Instrumented, Instrument};

use crate::{MetricService, ShutdownListener};

/// Spawn the snapshot loop.
///
/// With `every == None` (a zero store interval) the repository is dumped
/// once at startup and the task then parks until shutdown; otherwise it is
/// dumped every interval. Either way one final snapshot is written while
/// draining, so a clean shutdown never loses the tail. A failed write is
/// logged and the loop keeps going; durability degrades, the pipeline does
/// not.
pub fn spawn_snapshot_loop(
    service: Arc<MetricService>,
    path: PathBuf,
    every: Option<Duration>,
    mut shutdown: ShutdownListener,
) -> Instrumented<JoinHandle<Result<()>>> {
    let span = info_span!("snapshot_loop");
    tokio::spawn(async move {
        match every {
            None => {
                write_snapshot(&service, &path).await;
                shutdown.recv().await;
            }
            Some(period) => {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = ticker.tick() => write_snapshot(&service, &path).await,
                    }
                }
            }
        }
        write_snapshot(&service, &path).await;
        Ok(())
    })
    .instrument(span)
}

async fn write_snapshot(service: &MetricService, path: &std::path::Path) {
    if let Err(err) = service.snapshot_to(path).await {
        error!(?err, path = %path.display(), "Error writing snapshot");
    }
}
