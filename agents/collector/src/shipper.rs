use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info_span, instrument::Instrumented, warn, Instrument};

use collector_base::{CoreMetrics, ShutdownListener};
use collector_core::codec::envelope::EncryptKey;
use collector_core::codec::{gzip, signing};

use crate::monitor::Monitor;
use crate::sink::{MetricSink, Payload};

/// The adaptive backoff of a send cycle: first retry after
/// `start_interval`, each subsequent wait grows by `increment`, at most
/// `max_attempts` attempts in total.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Wait before the first retry.
    pub start_interval: Duration,
    /// Added to the wait after every failed attempt.
    pub increment: Duration,
    /// Attempts before the cycle gives up.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            start_interval: Duration::from_secs(1),
            increment: Duration::from_secs(2),
            max_attempts: 3,
        }
    }
}

/// The timer-driven send loop. Every `report_interval` it snapshots the
/// monitor, wraps the batch (JSON → tag → gzip → optional envelope) and
/// hands it to the sink; failed sends back off per the retry policy. While
/// a cycle is retrying, further ticks are suppressed so sends do not pile
/// up.
pub struct Shipper {
    monitor: Arc<Monitor>,
    sink: Arc<dyn MetricSink>,
    hmac_key: Option<String>,
    encrypt_key: Option<EncryptKey>,
    report_interval: Duration,
    retry: RetryPolicy,
    metrics: Arc<CoreMetrics>,
}

impl Shipper {
    /// New shipper reading from `monitor` and delivering into `sink`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        monitor: Arc<Monitor>,
        sink: Arc<dyn MetricSink>,
        hmac_key: Option<String>,
        encrypt_key: Option<EncryptKey>,
        report_interval: Duration,
        retry: RetryPolicy,
        metrics: Arc<CoreMetrics>,
    ) -> Self {
        Self {
            monitor,
            sink,
            hmac_key,
            encrypt_key,
            report_interval,
            retry,
            metrics,
        }
    }

    /// Run until shutdown; in-flight cycles are drained before returning.
    pub fn spawn(self, mut shutdown: ShutdownListener) -> Instrumented<JoinHandle<Result<()>>> {
        let span = info_span!("shipper");
        tokio::spawn(async move {
            let in_retry = Arc::new(AtomicBool::new(false));
            let mut cycles: JoinSet<()> = JoinSet::new();

            let mut ticker = interval_at(
                Instant::now() + self.report_interval,
                self.report_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        while cycles.try_join_next().is_some() {}
                        if in_retry.load(Ordering::Acquire) {
                            debug!("Previous send still retrying; tick suppressed");
                            continue;
                        }
                        match self.encode() {
                            Ok(payload) => {
                                cycles.spawn(
                                    send_cycle(
                                        self.sink.clone(),
                                        payload,
                                        self.retry,
                                        in_retry.clone(),
                                        self.metrics.clone(),
                                    )
                                    .instrument(info_span!("send_cycle")),
                                );
                            }
                            Err(err) => warn!(?err, "Could not encode batch"),
                        }
                    }
                }
            }

            while let Some(cycle) = cycles.join_next().await {
                cycle?;
            }
            debug!("Shipper drained");
            Ok(())
        })
        .instrument(span)
    }

    /// Snapshot and wrap one batch for the wire.
    fn encode(&self) -> Result<Payload> {
        let batch = self.monitor.snapshot();
        let plain = serde_json::to_vec(&batch)?;
        // The tag covers the plain JSON; the server verifies after inflating.
        let tag = self.hmac_key.as_deref().map(|key| signing::sign(&plain, key));
        let mut body = gzip::compress(&plain)?;
        if let Some(key) = &self.encrypt_key {
            body = key.encrypt(&body)?;
        }
        Ok(Payload { body, tag })
    }
}

async fn send_cycle(
    sink: Arc<dyn MetricSink>,
    payload: Payload,
    retry: RetryPolicy,
    in_retry: Arc<AtomicBool>,
    metrics: Arc<CoreMetrics>,
) {
    let transport = sink.transport();
    let mut wait = retry.start_interval;

    for attempt in 1..=retry.max_attempts {
        let started = Instant::now();
        let result = sink.send(payload.clone()).await;
        metrics.observe_ship_attempt(transport, started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                in_retry.store(false, Ordering::Release);
                metrics.observe_batch_shipped(transport, "ok");
                debug!(attempt, "Batch shipped");
                return;
            }
            Err(err) => {
                warn!(attempt, %err, "Error sending metrics batch");
                in_retry.store(true, Ordering::Release);
                if attempt == retry.max_attempts {
                    break;
                }
                sleep(wait).await;
                wait += retry.increment;
            }
        }
    }

    in_retry.store(false, Ordering::Release);
    metrics.observe_batch_shipped(transport, "exhausted");
}
