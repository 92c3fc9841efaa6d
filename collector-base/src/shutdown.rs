use std::sync::Arc;

use eyre::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, info_span, instrument::Instrumented, Instrument};

/// Cooperative shutdown fan-out. Each component holds a [`ShutdownListener`]
/// and winds down its loop when the signal fires; the supervisor joins the
/// drained tasks afterwards.
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// New, untriggered.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A listener handle for a component task.
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Fire the signal. Idempotent; later calls are no-ops.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// A component's view of the shutdown signal.
#[derive(Clone, Debug)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolve once shutdown has been triggered. Resolves immediately if it
    /// already was.
    pub async fn recv(&mut self) {
        // The sender lives in `Shutdown`; a closed channel means the
        // supervisor is gone, which shuts us down just as well.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }

    /// Whether shutdown has been triggered, without waiting.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Spawn the task that waits for INT/TERM/QUIT and trips the shared
/// shutdown signal. Signals after the first are ignored; components are
/// already draining.
pub fn spawn_signal_waiter(shutdown: Shutdown) -> Instrumented<JoinHandle<Result<()>>> {
    let span = info_span!("signal_waiter");
    tokio::spawn(async move {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut quit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = interrupt.recv() => info!(signal = "SIGINT", "Shutting down"),
            _ = terminate.recv() => info!(signal = "SIGTERM", "Shutting down"),
            _ = quit.recv() => info!(signal = "SIGQUIT", "Shutting down"),
        }
        shutdown.trigger();
        Ok(())
    })
    .instrument(span)
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn listeners_observe_the_trigger() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.listener();
        assert!(!listener.is_triggered());

        let waiter = tokio::spawn(async move { listener.recv().await });
        shutdown.trigger();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn recv_after_trigger_resolves_immediately() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut listener = shutdown.listener();
        assert!(listener.is_triggered());
        listener.recv().await;
    }
}
