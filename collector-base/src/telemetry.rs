//! Process self-telemetry, distinct from the metric pipeline payload: the
//! agents observe themselves with a prometheus registry and optionally
//! serve it over HTTP.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    histogram_opts, labels, opts, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, Registry,
};
use tokio::task::JoinHandle;
use tracing::info;

/// Prefix for all self-telemetry instruments.
const NAMESPACE: &str = "collector";

/// Macro to prefix a string with the namespace.
macro_rules! namespaced {
    ($name:expr) => {
        format!("{}_{}", NAMESPACE, $name)
    };
}

/// Self-telemetry instruments shared across the pipeline agents.
pub struct CoreMetrics {
    /// Registry for adding new instruments and gathering reports
    registry: Registry,
    listen_port: Option<u16>,
    agent_name: String,

    batches_shipped: IntCounterVec,
    ship_attempt_duration: HistogramVec,
    ingest_requests: IntCounterVec,
    stored_series: IntGaugeVec,
    snapshot_writes: IntCounterVec,
}

impl CoreMetrics {
    /// Track metrics for a particular agent name.
    ///
    /// - `for_agent` name of the agent these metrics are tracking.
    /// - `listen_port` port to start the HTTP server on. If None the server
    ///   will not be started.
    /// - `registry` prometheus registry to attach the metrics to
    pub fn new(
        for_agent: &str,
        listen_port: Option<u16>,
        registry: Registry,
    ) -> prometheus::Result<Self> {
        let const_labels: HashMap<String, String> = labels! {
            namespaced!("baselib_version") => env!("CARGO_PKG_VERSION").into(),
            "agent".into() => for_agent.into(),
        };
        let const_labels_ref = const_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect::<HashMap<_, _>>();

        let batches_shipped = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("batches_shipped_total"),
                "Number of batch send cycles by transport and outcome",
                const_labels_ref
            ),
            &["transport", "outcome"],
            registry
        )?;

        let ship_attempt_duration = register_histogram_vec_with_registry!(
            histogram_opts!(
                namespaced!("ship_attempt_duration_seconds"),
                "Wall time of individual send attempts",
                prometheus::exponential_buckets(0.05, 2.0, 10)?,
                const_labels.clone()
            ),
            &["transport"],
            registry
        )?;

        let ingest_requests = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("ingest_requests_total"),
                "Ingest requests by route and response status",
                const_labels_ref
            ),
            &["route", "status"],
            registry
        )?;

        let stored_series = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced!("stored_series"),
                "Series currently held by the repository, by kind",
                const_labels_ref
            ),
            &["kind"],
            registry
        )?;

        let snapshot_writes = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("snapshot_writes_total"),
                "Snapshot dumps by outcome",
                const_labels_ref
            ),
            &["outcome"],
            registry
        )?;

        Ok(Self {
            registry,
            listen_port,
            agent_name: for_agent.into(),
            batches_shipped,
            ship_attempt_duration,
            ingest_requests,
            stored_series,
            snapshot_writes,
        })
    }

    /// Count one completed send cycle.
    pub fn observe_batch_shipped(&self, transport: &str, outcome: &str) {
        self.batches_shipped
            .with_label_values(&[transport, outcome])
            .inc();
    }

    /// Time one send attempt.
    pub fn observe_ship_attempt(&self, transport: &str, seconds: f64) {
        self.ship_attempt_duration
            .with_label_values(&[transport])
            .observe(seconds);
    }

    /// Count one ingest request.
    pub fn observe_ingest(&self, route: &str, status: u16) {
        self.ingest_requests
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Record the repository size per kind.
    pub fn set_stored_series(&self, kind: &str, count: i64) {
        self.stored_series.with_label_values(&[kind]).set(count);
    }

    /// Count one snapshot write.
    pub fn observe_snapshot(&self, outcome: &str) {
        self.snapshot_writes.with_label_values(&[outcome]).inc();
    }

    /// The registry, for attaching further instruments.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run an HTTP server serving OpenMetrics format reports on `/metrics`.
    /// A no-op when no listen port is configured.
    pub fn run_http_server(self: &Arc<Self>) -> JoinHandle<()> {
        let Some(port) = self.listen_port else {
            return tokio::spawn(async {});
        };
        info!(port, "starting self-telemetry server on 0.0.0.0");

        let server = self.clone();
        tokio::spawn(async move {
            let app = Router::new().route(
                "/metrics",
                get(move || async move {
                    match server.gather() {
                        Ok(report) => (
                            StatusCode::OK,
                            [("Content-Type", "text/plain; charset=utf-8")],
                            report,
                        )
                            .into_response(),
                        Err(_) => {
                            (StatusCode::NOT_FOUND, "Failed to encode metrics").into_response()
                        }
                    }
                }),
            );

            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            axum::Server::bind(&addr)
                .serve(app.into_make_service())
                .await
                .expect("Failed to start telemetry server");
        })
    }

    /// Gather available metrics into an encoded (plaintext, OpenMetrics
    /// format) report.
    pub fn gather(&self) -> prometheus::Result<Vec<u8>> {
        let collected_metrics = self.registry.gather();
        let mut out_buf = Vec::with_capacity(1024 * 64);
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&collected_metrics, &mut out_buf)?;
        Ok(out_buf)
    }
}

impl Debug for CoreMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CoreMetrics {{ agent_name: {}, listen_port: {:?} }}",
            self.agent_name, self.listen_port
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn instruments_show_up_in_the_report() {
        let metrics = CoreMetrics::new("test", None, Registry::new()).unwrap();
        metrics.observe_ingest("/updates/", 200);
        metrics.set_stored_series("gauge", 29);
        let report = String::from_utf8(metrics.gather().unwrap()).unwrap();
        assert!(report.contains("collector_ingest_requests_total"));
        assert!(report.contains("collector_stored_series"));
    }
}
